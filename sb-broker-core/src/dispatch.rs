//! Dispatch Table (C5, §4.5), grounded directly on
//! `rpc/connection/dispatch.c`'s `handle_register`/`handle_run`/
//! `handle_result`/`handle_error` validation logic.
//!
//! The business logic each handler calls out to (`api_register`, `api_run`,
//! `api_result`) is out of scope (spec §1's "outward API verbs' business
//! logic"); [`BrokerApi`] is the contract those handlers dispatch through.

use sb_broker_proto::Value;

use crate::errors::BrokerError;
use crate::registry::Registry;

/// The embedding application's implementation of the three outward verbs.
/// A connection's dispatch path calls these after validating the wire
/// message; `sb-broker-server` supplies the process's single instance.
pub trait BrokerApi {
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
    ) -> Result<(), BrokerError>;

    fn run(
        &self,
        target_pluginkey: &str,
        function_name: &str,
        callid: u64,
        args: &[Value],
        con_id: u64,
        msgid: u32,
    ) -> Result<(), BrokerError>;

    fn result(
        &self,
        target_pluginkey: &str,
        callid: u64,
        args: &[Value],
        con_id: u64,
        msgid: u32,
    ) -> Result<(), BrokerError>;
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchInfo {
    pub name: &'static str,
    pub is_async: bool,
}

const DISPATCH_TABLE: &[DispatchInfo] = &[
    DispatchInfo { name: "register", is_async: true },
    DispatchInfo { name: "run", is_async: true },
    DispatchInfo { name: "result", is_async: true },
    DispatchInfo { name: "error", is_async: true },
];

/// Looks up a method name in the built-in table. There is no user-extensible
/// registration path — the four built-in verbs are the whole table, as in
/// the source's `dispatch_table_init`.
pub fn lookup(method: &str) -> Option<DispatchInfo> {
    DISPATCH_TABLE.iter().find(|d| d.name == method).copied()
}

pub fn error_info() -> DispatchInfo {
    DispatchInfo { name: "error", is_async: true }
}

fn validation(msg: impl Into<String>) -> BrokerError {
    BrokerError::Validation(msg.into())
}

/// `register(meta=[name, description, author, license], functions)`.
pub fn handle_register(
    params: &[Value],
    con_id: u64,
    msgid: u32,
    pluginkey: &str,
    api: &dyn BrokerApi,
) -> Result<(), BrokerError> {
    if params.len() != 2 {
        return Err(validation("register: invalid params size"));
    }

    let meta = params[0]
        .as_array()
        .ok_or_else(|| validation("register: meta params has wrong type"))?;

    if meta.len() != 4 {
        return Err(validation("register: invalid meta params size"));
    }

    let name = meta[0].as_str().ok_or_else(|| validation("register: meta element has wrong type"))?;
    let description = meta[1].as_str().ok_or_else(|| validation("register: meta element has wrong type"))?;
    let author = meta[2].as_str().ok_or_else(|| validation("register: meta element has wrong type"))?;
    let license = meta[3].as_str().ok_or_else(|| validation("register: meta element has wrong type"))?;

    let functions = params[1]
        .as_array()
        .ok_or_else(|| validation("register: functions has wrong type"))?;

    api.register(con_id, msgid, pluginkey, name, description, author, license, functions)
}

/// `run(meta=[targetpluginkey, nil], function_name, args)`.
pub fn handle_run(
    params: &[Value],
    con_id: u64,
    msgid: u32,
    pluginkey: &str,
    api: &dyn BrokerApi,
    registry: &mut Registry,
) -> Result<(), BrokerError> {
    if params.len() != 3 {
        return Err(validation("run: invalid params size"));
    }

    let meta = params[0]
        .as_array()
        .ok_or_else(|| validation("run: meta params has wrong type"))?;

    if meta.len() != 2 {
        return Err(validation("run: invalid meta params size"));
    }

    let target = meta[0].as_str().ok_or_else(|| validation("run: meta elements have wrong type"))?;
    if target.len() != sb_broker_crypto::PLUGINKEY_HEX_LEN {
        return Err(validation("run: invalid meta params size"));
    }
    let target_pluginkey = target.to_uppercase();

    if !matches!(meta[1], Value::Nil) {
        return Err(validation("run: meta elements have wrong type"));
    }

    let function_name = params[1].as_str().ok_or_else(|| validation("run: function string has wrong type"))?;

    let args = params[2]
        .as_array()
        .ok_or_else(|| validation("run: function string has wrong type"))?;

    let callid = random_callid();
    registry.record_callid(callid, pluginkey.to_string());

    api.run(&target_pluginkey, function_name, callid, args, con_id, msgid)
}

/// `result(meta=[callid], args)`.
pub fn handle_result(
    params: &[Value],
    con_id: u64,
    msgid: u32,
    api: &dyn BrokerApi,
    registry: &mut Registry,
) -> Result<(), BrokerError> {
    if params.len() != 2 {
        return Err(validation("result: invalid params size"));
    }

    let meta = params[0]
        .as_array()
        .ok_or_else(|| validation("result: meta params has wrong type"))?;

    if meta.len() != 1 {
        return Err(validation("result: invalid meta params size"));
    }

    let callid = meta[0].as_uint().ok_or_else(|| validation("result: meta elements have wrong type"))?;

    let args = params[1]
        .as_array()
        .ok_or_else(|| validation("result: function string has wrong type"))?;

    let target_pluginkey = registry
        .caller_for_callid(callid)
        .ok_or_else(|| validation("Failed to find target's key associated with given callid."))?;

    // The callid mapping is consumed here whether or not delivery to the
    // caller succeeds — otherwise a dead caller connection leaks its entry
    // in `registry.callids` forever.
    registry.remove_callid(callid);

    api.result(&target_pluginkey, callid, args, con_id, msgid)
}

/// No-op: used for protocol-level error replies (§4.5).
pub fn handle_error() -> Result<(), BrokerError> {
    Ok(())
}

fn random_callid() -> u64 {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("getrandom failed");
    u64::from_le_bytes(buf) % 281_474_976_710_656 // 2^48
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopApi;

    impl BrokerApi for NoopApi {
        fn register(
            &self,
            _con_id: u64,
            _msgid: u32,
            _pluginkey: &str,
            _name: &str,
            _description: &str,
            _author: &str,
            _license: &str,
            _functions: &[Value],
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        fn run(
            &self,
            _target_pluginkey: &str,
            _function_name: &str,
            _callid: u64,
            _args: &[Value],
            _con_id: u64,
            _msgid: u32,
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        fn result(
            &self,
            _target_pluginkey: &str,
            _callid: u64,
            _args: &[Value],
            _con_id: u64,
            _msgid: u32,
        ) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn plugin_key() -> String {
        "A".repeat(sb_broker_crypto::PLUGINKEY_HEX_LEN)
    }

    #[test]
    fn lookup_finds_all_four_builtins_and_nothing_else() {
        for name in ["register", "run", "result", "error"] {
            assert!(lookup(name).is_some(), "{name} should be dispatchable");
        }
        assert!(lookup("frobnicate").is_none());
    }

    #[test]
    fn register_rejects_wrong_arity() {
        let err = handle_register(&[Value::Nil], 1, 1, "key", &NoopApi).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn register_rejects_meta_with_wrong_element_count() {
        let params = vec![
            Value::Array(vec![Value::Str("only one".into())]),
            Value::Array(vec![]),
        ];
        assert!(handle_register(&params, 1, 1, "key", &NoopApi).is_err());
    }

    #[test]
    fn register_accepts_well_formed_meta() {
        let params = vec![
            Value::Array(vec![
                Value::Str("plugA".into()),
                Value::Str("desc".into()),
                Value::Str("me".into()),
                Value::Str("MIT".into()),
            ]),
            Value::Array(vec![Value::Str("add".into())]),
        ];
        assert!(handle_register(&params, 1, 1, "key", &NoopApi).is_ok());
    }

    #[test]
    fn run_rejects_target_pluginkey_of_wrong_length() {
        let mut registry = Registry::new();
        let params = vec![
            Value::Array(vec![Value::Str("short".into()), Value::Nil]),
            Value::Str("ping".into()),
            Value::Array(vec![]),
        ];
        let err = handle_run(&params, 1, 1, "caller", &NoopApi, &mut registry).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn run_rejects_non_nil_second_meta_element() {
        let mut registry = Registry::new();
        let params = vec![
            Value::Array(vec![Value::Str(plugin_key()), Value::Uint(0)]),
            Value::Str("ping".into()),
            Value::Array(vec![]),
        ];
        assert!(handle_run(&params, 1, 1, "caller", &NoopApi, &mut registry).is_err());
    }

    #[test]
    fn run_records_callid_for_the_calling_plugin() {
        use std::cell::Cell;

        struct CapturingApi {
            seen_callid: Cell<Option<u64>>,
        }

        impl BrokerApi for CapturingApi {
            fn register(
                &self,
                _: u64,
                _: u32,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
                _: &[Value],
            ) -> Result<(), BrokerError> {
                Ok(())
            }

            fn run(
                &self,
                _target_pluginkey: &str,
                _function_name: &str,
                callid: u64,
                _args: &[Value],
                _con_id: u64,
                _msgid: u32,
            ) -> Result<(), BrokerError> {
                self.seen_callid.set(Some(callid));
                Ok(())
            }

            fn result(&self, _: &str, _: u64, _: &[Value], _: u64, _: u32) -> Result<(), BrokerError> {
                Ok(())
            }
        }

        let mut registry = Registry::new();
        let params = vec![
            Value::Array(vec![Value::Str(plugin_key().to_lowercase()), Value::Nil]),
            Value::Str("ping".into()),
            Value::Array(vec![]),
        ];
        let api = CapturingApi { seen_callid: Cell::new(None) };
        handle_run(&params, 1, 1, "caller-key", &api, &mut registry).unwrap();

        let callid = api.seen_callid.get().expect("api.run was invoked with a callid");
        assert_eq!(registry.caller_for_callid(callid), Some("caller-key".to_string()));
    }

    #[test]
    fn result_with_unknown_callid_is_a_validation_error() {
        let mut registry = Registry::new();
        let params = vec![Value::Array(vec![Value::Uint(9999)]), Value::Array(vec![])];
        let err = handle_result(&params, 1, 1, &NoopApi, &mut registry).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn result_consumes_the_callid_mapping_exactly_once() {
        let mut registry = Registry::new();
        registry.record_callid(42, "caller-key".into());
        let params = vec![Value::Array(vec![Value::Uint(42)]), Value::Array(vec![])];

        assert!(handle_result(&params, 1, 1, &NoopApi, &mut registry).is_ok());
        assert!(registry.caller_for_callid(42).is_none());

        let err = handle_result(&params, 1, 1, &NoopApi, &mut registry).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
