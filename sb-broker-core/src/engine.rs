//! Connection Engine (C4, §4.4): drives the handshake, classifies deserialized
//! messages, and correlates outgoing requests with responses.
//!
//! Reimplementation decisions carried over from `spec.md` §9 / `SPEC_FULL.md`
//! §9: connections are looked up through the registry by id on every touch
//! (option (b), no raw refcounting); the three registries and the dispatch
//! table are owned by one `Broker` value threaded explicitly through every
//! call; `connection_close` is idempotent via `closed = true`.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use sb_broker_crypto::{LongTermKeyPair, MinuteKeyRing};
use sb_broker_proto::codec::{classify, serialize_value, ErrorResponseMessage, Message, RequestMessage, Value};
use sb_broker_proto::wire::{self, RecordHeader};

use crate::connection::{Connection, QueuedDispatch};
use crate::dispatch::{self, BrokerApi};
use crate::errors::{ApiError, BrokerError};
use crate::registry::Registry;

pub use sb_broker_proto::codec::MESSAGE_RESPONSE_UNKNOWN;

/// Default cap on events drained from a connection's queue per call to
/// [`Broker::drain_pending_events`], so one connection with many queued
/// non-async dispatches can't starve the task's other work (§4.7, §4.10).
pub const DEFAULT_QUEUE_DRAIN_BATCH: usize = 32;

pub struct Broker {
    pub registry: RefCell<Registry>,
    pub api: Rc<dyn BrokerApi>,
    pub server_longterm: LongTermKeyPair,
    pub minute_keys: RefCell<MinuteKeyRing>,
    queue_drain_batch: usize,
}

impl Broker {
    pub fn new(api: Rc<dyn BrokerApi>, server_longterm: LongTermKeyPair) -> Self {
        Self::with_queue_drain_batch(api, server_longterm, DEFAULT_QUEUE_DRAIN_BATCH)
    }

    pub fn with_queue_drain_batch(
        api: Rc<dyn BrokerApi>,
        server_longterm: LongTermKeyPair,
        queue_drain_batch: usize,
    ) -> Self {
        Self {
            registry: RefCell::new(Registry::new()),
            api,
            server_longterm,
            minute_keys: RefCell::new(MinuteKeyRing::new()),
            queue_drain_batch,
        }
    }

    /// Called by the owning task's 60 s timer (§4.1, §9).
    pub fn rotate_minute_key(&self) {
        self.minute_keys.borrow_mut().rotate();
        debug!("minute key rotated");
    }

    /// Accepts a new peer (`connection_create`): allocates a connection id,
    /// builds the per-connection state, and adds it to the registry with
    /// refcount effectively 1 (§3's lifecycle).
    pub fn create_connection(&self, outbound_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>) -> Rc<RefCell<Connection>> {
        let id = self.registry.borrow_mut().next_con_id();
        let con = Rc::new(RefCell::new(Connection::new(id, outbound_tx)));
        self.registry.borrow_mut().insert_connection(con.clone());
        debug!(con_id = id, "connection created");
        con
    }

    /// Feeds freshly-read bytes through the framer/tunnel for a connection in
    /// `INITIAL` or `COOKIE_SENT`, handling exactly one fixed-size handshake
    /// packet (§4.1/§4.4). Returns bytes to write back to the peer, if any.
    pub fn drive_handshake(&self, con: &Rc<RefCell<Connection>>, bytes: &[u8]) -> Option<Vec<u8>> {
        let mut c = con.borrow_mut();
        c.framer.fill(bytes);

        match c.tunnel.phase() {
            sb_broker_proto::TunnelPhase::Initial => {
                let packet = c.framer.next_fixed(wire::HELLO_LEN)?;
                let minute_keys = self.minute_keys.borrow();
                match c.tunnel.handle_hello(&packet, &self.server_longterm, &minute_keys) {
                    Ok(cookie) => {
                        debug!(con_id = c.id, "hello accepted, cookie sent");
                        Some(cookie)
                    }
                    Err(e) => {
                        warn!(con_id = c.id, error = %e, "hello rejected");
                        None
                    }
                }
            }
            sb_broker_proto::TunnelPhase::CookieSent => {
                let packet = c.framer.next_fixed(wire::INITIATE_LEN)?;
                let minute_keys = self.minute_keys.borrow();
                match c.tunnel.handle_initiate(&packet, &minute_keys) {
                    Ok((plugin_key, initial_plaintext)) => {
                        debug!(con_id = c.id, plugin_key = %plugin_key, "tunnel established");
                        c.plugin_key = Some(plugin_key.clone());
                        drop(minute_keys);
                        let con_id = c.id;
                        drop(c);
                        self.registry.borrow_mut().bind_plugin_key(plugin_key, con_id);
                        self.deliver_plaintext(con, &initial_plaintext);
                        None
                    }
                    Err(e) => {
                        warn!(con_id = c.id, error = %e, "initiate rejected, resetting to initial");
                        None
                    }
                }
            }
            sb_broker_proto::TunnelPhase::Established => None,
        }
    }

    /// Drains as many complete Message records as are currently buffered
    /// (§4.4 "In ESTABLISHED, drain as many messages as the stream currently
    /// allows").
    pub fn drive_established(&self, con: &Rc<RefCell<Connection>>, bytes: &[u8]) {
        con.borrow_mut().framer.fill(bytes);

        loop {
            let record = {
                let mut c = con.borrow_mut();
                match c.framer.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(con_id = c.id, error = %e, "bad record header, closing");
                        drop(c);
                        self.connection_close(con);
                        return;
                    }
                }
            };

            let plaintext = {
                let mut c = con.borrow_mut();
                let header = match RecordHeader::parse(&record) {
                    Some(h) => h,
                    None => {
                        drop(c);
                        self.connection_close(con);
                        return;
                    }
                };
                match c.tunnel.decrypt_record(&header, &record[wire::RECORD_HEADER_LEN..]) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!(con_id = c.id, error = %e, "record decrypt failed, closing");
                        drop(c);
                        self.connection_close(con);
                        return;
                    }
                }
            };

            self.deliver_plaintext(con, &plaintext);
        }
    }

    fn deliver_plaintext(&self, con: &Rc<RefCell<Connection>>, plaintext: &[u8]) {
        let mut cursor = sb_broker_proto::codec::Cursor::new(plaintext);
        while cursor.remaining() > 0 {
            let value = match cursor.read_value() {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, "message decode stopped");
                    break;
                }
            };
            match classify(value) {
                Ok(message) => self.handle_message(con, message),
                Err(e) => {
                    warn!(error = %e, "message classification failed");
                    let mut error = ApiError::new();
                    error.set(BrokerError::Validation(format!("could not classify message: {e}")));
                    self.finish_request(con, MESSAGE_RESPONSE_UNKNOWN, error);
                }
            }
        }
    }

    fn handle_message(&self, con: &Rc<RefCell<Connection>>, message: Message) {
        match message {
            Message::Request(req) => self.handle_request(con, req),
            other => self.handle_response(con, other),
        }
    }

    /// §4.4 request path.
    fn handle_request(&self, con: &Rc<RefCell<Connection>>, req: RequestMessage) {
        let (con_id, plugin_key) = {
            let c = con.borrow();
            (c.id, c.plugin_key.clone().unwrap_or_default())
        };

        let (info, result) = match dispatch::lookup(&req.method) {
            Some(info) => {
                let result = self.invoke(&req, con_id, &plugin_key);
                (info, result)
            }
            None => {
                trace!(method = %req.method, "could not dispatch method");
                (dispatch::error_info(), Err(BrokerError::Validation("could not dispatch method".into())))
            }
        };

        let mut error = ApiError::new();
        if let Err(e) = result {
            error.set(e);
        }

        if info.is_async {
            self.finish_request(con, req.msgid, error);
        } else {
            con.borrow_mut().queue.push(QueuedDispatch { msgid: req.msgid, result: error });
            self.drain_queue(con);
        }
    }

    /// True if the connection's event queue still has work left after the
    /// last batch (§4.7) — the owning task should reschedule a call to
    /// [`Broker::drain_pending_events`] when this returns `true`.
    pub fn has_pending_events(&self, con: &Rc<RefCell<Connection>>) -> bool {
        !con.borrow().queue.is_empty()
    }

    /// Drains up to the configured batch size of deferred dispatches (§4.7,
    /// §4.10). Call repeatedly (cooperatively yielding between calls) while
    /// [`Broker::has_pending_events`] is true.
    pub fn drain_pending_events(&self, con: &Rc<RefCell<Connection>>) {
        self.drain_queue(con);
    }

    fn invoke(&self, req: &RequestMessage, con_id: u64, plugin_key: &str) -> Result<(), BrokerError> {
        match req.method.as_str() {
            "register" => dispatch::handle_register(&req.params, con_id, req.msgid, plugin_key, self.api.as_ref()),
            "run" => {
                let mut registry = self.registry.borrow_mut();
                dispatch::handle_run(&req.params, con_id, req.msgid, plugin_key, self.api.as_ref(), &mut registry)
            }
            "result" => {
                let mut registry = self.registry.borrow_mut();
                dispatch::handle_result(&req.params, con_id, req.msgid, self.api.as_ref(), &mut registry)
            }
            "error" => dispatch::handle_error(),
            _ => Err(BrokerError::Validation("could not dispatch method".into())),
        }
    }

    fn drain_queue(&self, con: &Rc<RefCell<Connection>>) {
        for _ in 0..self.queue_drain_batch {
            let next = con.borrow_mut().queue.pop();
            match next {
                Some(q) => self.finish_request(con, q.msgid, q.result),
                None => break,
            }
        }
    }

    fn finish_request(&self, con: &Rc<RefCell<Connection>>, msgid: u32, error: ApiError) {
        let Some(error) = error.take() else { return };

        let response = ErrorResponseMessage {
            msgid,
            error: broker_error_to_value(&error),
        };

        self.write_record(con, &response.to_value());
    }

    /// §4.4 response path: accept only the topmost call-vector entry;
    /// anything else is a protocol desync (§4.4, §8 scenario S3).
    fn handle_response(&self, con: &Rc<RefCell<Connection>>, message: Message) {
        let (msgid, errored, payload) = match message {
            Message::Response(r) => (r.msgid, false, r.params),
            Message::ErrorResponse(e) => (e.msgid, true, vec![e.error]),
            Message::Request(_) => unreachable!("requests are routed separately"),
        };

        let mut c = con.borrow_mut();
        let valid = c.call_vector.last().map(|call| call.msgid) == Some(msgid);

        if !valid {
            warn!(con_id = c.id, "response with unmatched msgid, desynced");
            c.fail_all_calls();
            drop(c);
            self.connection_close(con);
            return;
        }

        let call = c.call_vector.last_mut().expect("validated above");
        call.hasresponse = true;
        call.errorresponse = errored;
        call.response = payload;
        call.resolve();
    }

    /// Outgoing request (§4.4 `send_request`). Suspends on a `oneshot`
    /// signalled by the response path or by `connection_close` (§5, §9).
    pub async fn send_request(
        &self,
        plugin_key: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(u32, Vec<Value>), BrokerError> {
        let con = {
            let registry = self.registry.borrow();
            let con_id = registry
                .connection_id_for_plugin_key(plugin_key)
                .ok_or_else(|| BrokerError::Validation("plugin not registered".into()))?;
            registry
                .connection(con_id)
                .ok_or_else(|| BrokerError::Validation("plugin not registered".into()))?
        };

        let (msgid, rx) = {
            let mut c = con.borrow_mut();
            let msgid = c.next_msgid();
            let (call, rx) = crate::connection::CallInfo::new(msgid);
            c.call_vector.push(call);
            let request = RequestMessage { msgid, method: method.to_string(), params };
            drop(c);
            self.write_record(&con, &request.to_value());
            (msgid, rx)
        };

        let _ = rx.await;

        let mut c = con.borrow_mut();
        let idx = c
            .call_vector
            .iter()
            .position(|call| call.msgid == msgid)
            .expect("our own call stays until we remove it");
        let call = c.call_vector.remove(idx);

        if call.errorresponse {
            Err(BrokerError::Protocol("call errored".into()))
        } else {
            Ok((call.msgid, call.response))
        }
    }

    /// Pushes a request to a plugin without waiting for (or correlating
    /// through the call vector) a reply — the mechanism `BrokerApi::run`
    /// and `BrokerApi::result` use to forward a call and its eventual
    /// result between two plugins (§4.5's `run`/`result`, spec §1's "relays
    /// the result back to the caller"). The callee answers asynchronously
    /// with its own `result` request rather than a correlated `Response`,
    /// so no `CallInfo` is recorded for this send.
    pub fn deliver_call(&self, plugin_key: &str, method: &str, params: Vec<Value>) -> Result<(), BrokerError> {
        let con = {
            let registry = self.registry.borrow();
            let con_id = registry
                .connection_id_for_plugin_key(plugin_key)
                .ok_or_else(|| BrokerError::Validation("plugin not registered".into()))?;
            registry
                .connection(con_id)
                .ok_or_else(|| BrokerError::Validation("plugin not registered".into()))?
        };

        let msgid = con.borrow_mut().next_msgid();
        let request = RequestMessage { msgid, method: method.to_string(), params };
        self.write_record(&con, &request.to_value());
        Ok(())
    }

    /// Outgoing response (§4.4 `send_response`).
    pub fn send_response(&self, con_id: u64, msgid: u32, params: Vec<Value>) -> Result<(), BrokerError> {
        let con = self
            .registry
            .borrow()
            .connection(con_id)
            .ok_or_else(|| BrokerError::Validation("plugin not registered".into()))?;

        let response = sb_broker_proto::codec::ResponseMessage { msgid, params };
        self.write_record(&con, &response.to_value());
        Ok(())
    }

    fn write_record(&self, con: &Rc<RefCell<Connection>>, value: &Value) {
        let mut c = con.borrow_mut();
        let plaintext = serialize_value(value);
        match c.tunnel.encrypt_record(&plaintext) {
            Ok(bytes) => {
                let _ = c.outbound_tx.send(bytes);
            }
            Err(e) => warn!(con_id = c.id, error = %e, "encrypt failed, dropping write"),
        }
    }

    /// Idempotent close (§4.4, §9's bugfix: `closed = true`, not the
    /// source's `con->closed = 0`).
    pub fn connection_close(&self, con: &Rc<RefCell<Connection>>) {
        let mut c = con.borrow_mut();
        if c.closed {
            return;
        }
        c.closed = true;
        c.fail_all_calls();
        let id = c.id;
        drop(c);
        self.registry.borrow_mut().remove_connection(id);
        debug!(con_id = id, "connection closed");
    }
}

fn broker_error_to_value(error: &BrokerError) -> Value {
    Value::Array(vec![
        Value::Str(error.kind().to_string()),
        Value::Str(error.message().to_string()),
    ])
}
