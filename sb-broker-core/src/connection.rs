//! Connection Engine data model (C4, §3/§4.4): the per-peer state that
//! `engine.rs` drives through C1→C2→C3 and into dispatch.

use tokio::sync::{mpsc, oneshot};

use sb_broker_proto::{Framer, ServerTunnel, Value};

use crate::equeue::EventQueue;

/// An in-flight outbound request awaiting a response (§3).
///
/// `notify` is the cooperative-suspension handle from §5/§9: `send_request`
/// parks on the paired [`oneshot::Receiver`] instead of re-entering the
/// event loop manually.
pub struct CallInfo {
    pub msgid: u32,
    pub hasresponse: bool,
    pub errorresponse: bool,
    pub response: Vec<Value>,
    notify: Option<oneshot::Sender<()>>,
}

impl CallInfo {
    pub fn new(msgid: u32) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                msgid,
                hasresponse: false,
                errorresponse: false,
                response: Vec::new(),
                notify: Some(tx),
            },
            rx,
        )
    }

    /// Wakes the suspended `send_request` caller, if it hasn't already
    /// returned on connection close.
    pub fn resolve(&mut self) {
        if let Some(tx) = self.notify.take() {
            let _ = tx.send(());
        }
    }
}

/// A queued (non-async) dispatch, deferred onto the per-connection
/// [`EventQueue`] — see §4.4's "enqueue an event... then drain the queue".
pub struct QueuedDispatch {
    pub msgid: u32,
    pub result: crate::errors::ApiError,
}

pub struct Connection {
    pub id: u64,
    pub msgid: u32,
    pub closed: bool,
    pub tunnel: ServerTunnel,
    pub framer: Framer,
    pub plugin_key: Option<String>,
    pub call_vector: Vec<CallInfo>,
    pub queue: EventQueue<QueuedDispatch>,
    pub outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Connection {
    pub fn new(id: u64, outbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id,
            msgid: 1,
            closed: false,
            tunnel: ServerTunnel::new(),
            framer: Framer::new(),
            plugin_key: None,
            call_vector: Vec::new(),
            queue: EventQueue::new(),
            outbound_tx,
        }
    }

    pub fn next_msgid(&mut self) -> u32 {
        let id = self.msgid;
        self.msgid += 1;
        id
    }

    /// Marks every outstanding call as errored, as `call_set_error` does on
    /// protocol desync and on close (§4.4, §8 invariant 5).
    pub fn fail_all_calls(&mut self) {
        for call in self.call_vector.iter_mut() {
            call.errorresponse = true;
            call.hasresponse = true;
            call.resolve();
        }
    }
}
