//! The reference [`BrokerApi`] implementation bound into [`Broker`] at
//! startup.
//!
//! Spec §1 scopes the outward API verbs' *business logic* (how a plugin's
//! registered functions and metadata are catalogued, access-controlled,
//! etc.) out of this system — only their dispatch contract is in scope.
//! This type implements exactly that contract and nothing more: it
//! acknowledges `register`, and forwards `run`/`result` payloads between
//! the two plugins named in the call, using [`Broker::deliver_call`] (the
//! same fire-and-forget push the source's `api_run`/`api_result` use —
//! the callee answers with its own `result` request rather than a
//! correlated response, per spec §4.5/§8 scenario S2).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use sb_broker_core::{Broker, BrokerApi, BrokerError};
use sb_broker_proto::Value;
use tracing::{debug, info};

pub struct ForwardingApi {
    broker: RefCell<Weak<Broker>>,
}

impl ForwardingApi {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { broker: RefCell::new(Weak::new()) })
    }

    /// Wires the back-reference to the owning [`Broker`] once it exists,
    /// breaking the `Broker -> dyn BrokerApi -> Broker` cycle with a `Weak`.
    pub fn bind(&self, broker: &Rc<Broker>) {
        *self.broker.borrow_mut() = Rc::downgrade(broker);
    }

    fn broker(&self) -> Result<Rc<Broker>, BrokerError> {
        self.broker
            .borrow()
            .upgrade()
            .ok_or_else(|| BrokerError::Resource("broker shut down".into()))
    }
}

impl BrokerApi for ForwardingApi {
    fn register(
        &self,
        con_id: u64,
        msgid: u32,
        pluginkey: &str,
        name: &str,
        description: &str,
        author: &str,
        license: &str,
        functions: &[Value],
    ) -> Result<(), BrokerError> {
        info!(
            pluginkey, name, description, author, license,
            function_count = functions.len(),
            "plugin registered"
        );
        self.broker()?.send_response(con_id, msgid, vec![Value::Uint(0)])
    }

    fn run(
        &self,
        target_pluginkey: &str,
        function_name: &str,
        callid: u64,
        args: &[Value],
        _con_id: u64,
        _msgid: u32,
    ) -> Result<(), BrokerError> {
        debug!(target_pluginkey, function_name, callid, "forwarding call to plugin");
        self.broker()?.deliver_call(target_pluginkey, function_name, args.to_vec())
    }

    fn result(
        &self,
        target_pluginkey: &str,
        callid: u64,
        args: &[Value],
        _con_id: u64,
        _msgid: u32,
    ) -> Result<(), BrokerError> {
        debug!(target_pluginkey, callid, "forwarding result to caller");
        self.broker()?.deliver_call(target_pluginkey, "result", args.to_vec())
    }
}
