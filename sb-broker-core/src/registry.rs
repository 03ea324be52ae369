//! Connection Registry (C6, §4.6): three process-wide maps threaded
//! explicitly through the `Broker`, replacing the source's global
//! `hashmap`s per the §9 "global mutable state" design note.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::connection::Connection;

pub struct Registry {
    connections: HashMap<u64, Rc<RefCell<Connection>>>,
    plugin_keys: HashMap<String, u64>,
    callids: HashMap<u64, String>,
    next_con_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            plugin_keys: HashMap::new(),
            callids: HashMap::new(),
            next_con_id: 1,
        }
    }

    pub fn next_con_id(&mut self) -> u64 {
        let id = self.next_con_id;
        self.next_con_id += 1;
        id
    }

    pub fn insert_connection(&mut self, con: Rc<RefCell<Connection>>) {
        let id = con.borrow().id;
        self.connections.insert(id, con);
    }

    pub fn connection(&self, id: u64) -> Option<Rc<RefCell<Connection>>> {
        self.connections.get(&id).cloned()
    }

    /// Removes a connection and any plugin-key binding that pointed to it,
    /// plus any callid mapping recording it as the caller awaiting a result
    /// — otherwise a connection that closes mid-call leaks that entry forever.
    /// Matches invariant: a connection leaves the registry exactly when its
    /// refcount (here: liveness) drops to zero.
    pub fn remove_connection(&mut self, id: u64) {
        if let Some(con) = self.connections.remove(&id) {
            let key = con.borrow().plugin_key.clone();
            if let Some(key) = key {
                self.plugin_keys.remove(&key);
                self.callids.retain(|_, caller| *caller != key);
            }
        }
    }

    pub fn bind_plugin_key(&mut self, plugin_key: String, con_id: u64) {
        self.plugin_keys.insert(plugin_key, con_id);
    }

    pub fn connection_id_for_plugin_key(&self, plugin_key: &str) -> Option<u64> {
        self.plugin_keys.get(plugin_key).copied()
    }

    pub fn record_callid(&mut self, callid: u64, caller_plugin_key: String) {
        self.callids.insert(callid, caller_plugin_key);
    }

    pub fn caller_for_callid(&self, callid: u64) -> Option<String> {
        self.callids.get(&callid).cloned()
    }

    pub fn remove_callid(&mut self, callid: u64) {
        self.callids.remove(&callid);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
