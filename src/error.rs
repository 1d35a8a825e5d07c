use serde_json::Value;
use thiserror::Error;

/// Errors the runtime can hit while talking to the node.
///
/// Everything here is fatal from the loop's point of view except
/// [`Error::ConnectionClosed`], which the runner turns into a clean
/// shutdown (the node going away is how plugins are told to stop).
/// Handler-level failures are not errors: they become ordinary JSON-RPC
/// error responses via `command_done_err` and the plugin keeps running.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON from the node: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("did not receive '{expected}' yet, but got '{got}' instead")]
    Handshake { expected: &'static str, got: String },

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("reply with unknown id {0}")]
    UnknownReplyId(u64),

    #[error("option '{name}': {reason}")]
    Option { name: String, reason: String },

    #[error("init failed: {0}")]
    Init(String),

    #[error("error reply to '{method}': {error}")]
    Rpc { method: String, error: Value },

    #[error("connection to the node closed")]
    ConnectionClosed,
}
