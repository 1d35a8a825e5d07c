//! Command lifecycle: one value per in-flight request from the node.
//!
//! A `Command` is created when a message arrives and destroyed exactly
//! once, by whichever finalizer eventually answers it. Handlers signal
//! which of those happened through [`CommandResult`]: `Complete` means a
//! finalizer already consumed the command inside this call, `Pending`
//! means ownership moved elsewhere (into an outbound request or a timer)
//! and something else will finalize it later. `CommandResult` values can
//! only be minted by the runtime, so a handler cannot claim completion
//! without actually finalizing, and cannot touch a command it gave away.

use serde_json::Value;

use crate::error::Error;
use crate::jsonrpc::Id;
use crate::plugin::Plugin;

/// One inbound request (or notification) being handled.
#[derive(Debug)]
pub struct Command {
    id: Option<Id>,
    method: String,
    usage_only: bool,
}

impl Command {
    pub(crate) fn new(id: Option<Id>, method: String) -> Self {
        Self {
            id,
            method,
            usage_only: false,
        }
    }

    /// A synthesized command used once per registered method at startup,
    /// asking the handler to declare its parameter schema.
    pub(crate) fn usage_probe(method: String) -> Self {
        Self {
            id: None,
            method,
            usage_only: true,
        }
    }

    /// The inbound id, absent for notifications.
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub(crate) fn take_id(self) -> Option<Id> {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// No id means no reply is expected.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// True while the startup usage probe runs. Handlers must call
    /// `command_set_usage` and return immediately in this mode; `params`
    /// is `None` and there is nothing to answer.
    pub fn usage_only(&self) -> bool {
        self.usage_only
    }
}

/// Proof that a handler routed its command through the runtime.
#[must_use = "return this from the handler; dropping it loses track of the command"]
pub struct CommandResult {
    disposition: Disposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The command outlives this call; a reply callback or timer owns it.
    Pending,
    /// A finalizer already produced the response and freed the command.
    Complete,
}

impl CommandResult {
    pub(crate) fn pending() -> Self {
        Self {
            disposition: Disposition::Pending,
        }
    }

    pub(crate) fn complete() -> Self {
        Self {
            disposition: Disposition::Complete,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.disposition == Disposition::Pending
    }
}

// -----------------------------------------------------------------------------
// Handler signatures
// -----------------------------------------------------------------------------

/// Handler for a registered command, notification subscription or hook.
/// `params` is `None` only during the usage probe.
pub type CommandCallback =
    Box<dyn Fn(&mut Plugin, Command, Option<&Value>) -> Result<CommandResult, Error> + Send>;

/// Success/error continuation of an outbound RPC. Receives the command
/// back, the `result` (or `error`) member of the reply, and must finalize
/// or re-park the command.
pub type ReplyCallback =
    Box<dyn FnOnce(&mut Plugin, Command, &Value) -> Result<CommandResult, Error> + Send>;

/// Runs once after the node's `init` has been processed.
pub type InitCallback = Box<dyn FnOnce(&mut Plugin, &Value) -> Result<(), Error> + Send>;

/// One-shot timer continuation; ends by calling `timer_complete`.
pub type TimerCallback =
    Box<dyn FnOnce(&mut Plugin) -> Result<CommandResult, Error> + Send>;

/// Reply continuation that splices the subordinate call's `result` into
/// this command's response verbatim. Pass to `send_outreq` to build a
/// transparent proxy.
pub fn forward_result(
    plugin: &mut Plugin,
    cmd: Command,
    result: &Value,
) -> Result<CommandResult, Error> {
    Ok(plugin.command_success(cmd, result.clone()))
}

/// Like [`forward_result`] for the error side: pushes the subordinate
/// call's `error` member through unchanged.
pub fn forward_error(
    plugin: &mut Plugin,
    cmd: Command,
    error: &Value,
) -> Result<CommandResult, Error> {
    Ok(plugin.command_err_raw(cmd, error.clone()))
}
