//! JSON-RPC 2.0 core types for the node ⇄ plugin conversation.
//!
//! These structs intentionally mirror the [JSON-RPC 2.0 spec](https://www.jsonrpc.org/specification).
//! Both directions use the same envelope: the node sends commands,
//! notifications and hooks on the plugin's stdin, the plugin answers on
//! stdout and makes its own calls over the RPC socket.
//!
//! Usage example (with `serde_json`):
//! ```ignore
//! use lnplugin::jsonrpc::{Id, Request};
//!
//! let req = Request::call(Id::Number(1), "getinfo", Some(json!({})));
//! let s = serde_json::to_string(&req).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// `id` MAY be a number or a string; the node's own ids are echoed back
/// verbatim whichever form they take. Ids the plugin mints for outbound
/// calls are always monotonically increasing numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
}

/// JSON-RPC 2.0 Request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Omitted for *notifications*.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// JSON-RPC 2.0 Error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 Response object.
/// Exactly one of `result` or `error` **must** be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

// -----------------------------------------------------------------------------
// Helper constructors – make it ergonomic to build requests and responses.
// -----------------------------------------------------------------------------
impl Request {
    /// Create a *notification* (no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Create a *call* expecting a response.
    pub fn call(id: Id, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }
}

impl Response {
    /// Convenience helper for a successful result.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Convenience helper for an error result.
    pub fn fail(id: Id, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_request() {
        let req = Request::call(Id::Number(1), "getinfo", Some(json!({"k": "v"})));
        let s = serde_json::to_string(&req).unwrap();
        let de: Request = serde_json::from_str(&s).unwrap();
        assert_eq!(de.method, "getinfo");
        assert_eq!(de.id, Some(Id::Number(1)));
    }

    #[test]
    fn roundtrip_response() {
        let resp = Response::success(Id::String("abc".into()), json!({"ok": true}));
        let s = serde_json::to_string(&resp).unwrap();
        let de: Response = serde_json::from_str(&s).unwrap();
        assert_eq!(de.result.unwrap()["ok"], json!(true));
    }

    #[test]
    fn notification_has_no_id() {
        let notif = Request::notification("log", Some(json!({"level": "info"})));
        let v = serde_json::to_value(&notif).unwrap();
        assert!(v.get("id").is_none());
    }

    #[test]
    fn string_id_is_echoed_verbatim() {
        let resp = Response::fail(Id::String("x-7".into()), -32601, "Method not found", None);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["id"], json!("x-7"));
        assert_eq!(v["error"]["code"], json!(-32601));
        assert!(v.get("result").is_none());
    }
}
