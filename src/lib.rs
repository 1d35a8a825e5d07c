//! Runtime library for Lightning node plugins.
//!
//! A plugin is a subprocess the node launches and speaks JSON-RPC 2.0
//! with over the plugin's stdin/stdout, every object terminated by a
//! blank line. This crate supplies the scaffolding every plugin needs:
//! the framed transport, the `getmanifest`/`init` handshake, dispatch to
//! registered command/notification/hook handlers, an asynchronous channel
//! for calling back into the node over its Unix RPC socket, and one-shot
//! timers, all driven by a single cooperative event loop.
//!
//! Handlers finish by routing their [`Command`] through a finalizer
//! (producing the response) or parking it in an outbound request or
//! timer; the [`CommandResult`] they must return is the proof that one of
//! those happened.

pub mod command;
pub mod error;
pub mod framing;
pub mod jsonrpc;
pub mod logging;
pub mod manifest;
pub mod network;
pub mod options;
pub mod plugin;
pub mod runtime;
mod timer;

pub use command::{forward_error, forward_result, Command, CommandResult};
pub use error::Error;
pub use jsonrpc::Id;
pub use logging::LogLevel;
pub use network::Network;
pub use options::{bool_option, string_option, u64_option, ConfigOption};
pub use plugin::Plugin;
pub use runtime::{Builder, Runner, RpcCommand};
pub use timer::TimerHandle;
