//! The host state threaded through the event loop.
//!
//! One `Plugin` value exists per process. It owns everything that must
//! outlive a single loop iteration: the outbound-request table, the usage
//! map, the write queues for both descriptors, the handshake flags and
//! the timer wheel. Handlers receive `&mut Plugin` and act on the world
//! exclusively through it: responses and outbound calls are queued here
//! and the loop drains them, so one object is always written whole.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::command::{Command, CommandResult, ReplyCallback};
use crate::error::Error;
use crate::jsonrpc::{Id, Request, Response};
use crate::logging::LogLevel;
use crate::network::Network;
use crate::timer::{TimerHandle, TimerWheel};

/// An outbound RPC awaiting its reply. Holds the originating command so
/// the reply can be turned into that command's response; the command
/// moves in here at `send_outreq` and moves back out into whichever
/// callback the reply selects.
pub(crate) struct OutRequest {
    pub(crate) cmd: Command,
    pub(crate) on_ok: ReplyCallback,
    pub(crate) on_err: ReplyCallback,
}

pub struct Plugin {
    pub(crate) manifested: bool,
    pub(crate) initialized: bool,
    dynamic: bool,

    /// Next id to mint for an outbound call. Starts at 1: id 0 is
    /// reserved for the synchronous init-time calls.
    next_outreq_id: u64,
    pub(crate) out_reqs: HashMap<u64, OutRequest>,

    usage: HashMap<String, String>,

    /// Serialized objects awaiting the loop's write pass, in production
    /// order. One entry per complete JSON object.
    pub(crate) out_queue: VecDeque<Vec<u8>>,
    pub(crate) rpc_queue: VecDeque<Vec<u8>>,

    pub(crate) timers: Arc<Mutex<TimerWheel>>,
    in_timer: usize,

    deprecated_apis: bool,
    network: Option<Network>,
}

impl Plugin {
    pub(crate) fn new(dynamic: bool) -> Self {
        Self {
            manifested: false,
            initialized: false,
            dynamic,
            next_outreq_id: 1,
            out_reqs: HashMap::new(),
            usage: HashMap::new(),
            out_queue: VecDeque::new(),
            rpc_queue: VecDeque::new(),
            timers: Arc::new(Mutex::new(TimerWheel::default())),
            in_timer: 0,
            deprecated_apis: false,
            network: None,
        }
    }

    // -------------------------------------------------------------------------
    // Finalizers: each consumes the command, queues at most one response
    // and returns the Complete proof.
    // -------------------------------------------------------------------------

    /// Answer the command with `result` and free it.
    pub fn command_success(&mut self, cmd: Command, result: Value) -> CommandResult {
        if let Some(id) = cmd.take_id() {
            self.push_node(&Response::success(id, result));
        }
        CommandResult::complete()
    }

    /// Answer with a bare string, or an empty object when there is
    /// nothing to say.
    pub fn command_success_str(&mut self, cmd: Command, s: Option<&str>) -> CommandResult {
        let result = match s {
            Some(s) => Value::String(s.to_owned()),
            None => json!({}),
        };
        self.command_success(cmd, result)
    }

    /// Answer the command with a JSON-RPC error and free it. The code is
    /// whatever taxonomy the handler chose; the runtime passes it through.
    pub fn command_done_err(
        &mut self,
        cmd: Command,
        code: i64,
        message: &str,
        data: Option<Value>,
    ) -> CommandResult {
        if let Some(id) = cmd.take_id() {
            self.push_node(&Response::fail(id, code, message, data));
        }
        CommandResult::complete()
    }

    /// [`Plugin::command_done_err`] without a data member.
    pub fn command_fail(&mut self, cmd: Command, code: i64, message: &str) -> CommandResult {
        self.command_done_err(cmd, code, message, None)
    }

    /// Answer with a raw error value spliced in verbatim, e.g. one
    /// received from a subordinate call.
    pub fn command_err_raw(&mut self, cmd: Command, error: Value) -> CommandResult {
        if let Some(id) = cmd.take_id() {
            self.push_node(&json!({
                "jsonrpc": crate::jsonrpc::JSONRPC_VERSION,
                "id": id,
                "error": error,
            }));
        }
        CommandResult::complete()
    }

    /// Record the command's usage string during the startup probe and
    /// free the probe command. Probing is idempotent; two *different*
    /// usages for one method are a bug in the plugin.
    pub fn command_set_usage(
        &mut self,
        cmd: Command,
        usage: &str,
    ) -> Result<CommandResult, Error> {
        match self.usage.get(cmd.method()) {
            Some(existing) if existing == usage => {}
            Some(_) => {
                return Err(Error::Protocol(format!(
                    "two usages for command {}?",
                    cmd.method()
                )))
            }
            None => {
                self.usage.insert(cmd.method().to_owned(), usage.to_owned());
            }
        }
        Ok(CommandResult::complete())
    }

    /// Finish a notification: nothing is written, the command is freed.
    pub fn notification_handled(&mut self, cmd: Command) -> CommandResult {
        drop(cmd);
        CommandResult::complete()
    }

    // -------------------------------------------------------------------------
    // Outbound calls into the node
    // -------------------------------------------------------------------------

    /// Start an asynchronous call into the node. The command moves into
    /// the request table and comes back through `on_ok` or `on_err` when
    /// the reply arrives; until then it is `Pending`.
    ///
    /// Requests go on the wire in the order this is called; replies
    /// correlate strictly by id and may arrive in any order.
    pub fn send_outreq<F, E>(
        &mut self,
        cmd: Command,
        method: &str,
        params: Value,
        on_ok: F,
        on_err: E,
    ) -> CommandResult
    where
        F: FnOnce(&mut Plugin, Command, &Value) -> Result<CommandResult, Error> + Send + 'static,
        E: FnOnce(&mut Plugin, Command, &Value) -> Result<CommandResult, Error> + Send + 'static,
    {
        let id = self.next_outreq_id;
        self.next_outreq_id += 1;

        let req = Request::call(Id::Number(id), method, Some(params));
        self.push_rpc(&req);
        self.out_reqs.insert(
            id,
            OutRequest {
                cmd,
                on_ok: Box::new(on_ok),
                on_err: Box::new(on_err),
            },
        );
        CommandResult::pending()
    }

    // -------------------------------------------------------------------------
    // Logging and timers
    // -------------------------------------------------------------------------

    /// Queue a `log` notification for the node. No id, no reply.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let notif = Request::notification(
            "log",
            Some(json!({ "level": level, "message": message.into() })),
        );
        self.push_node(&notif);
    }

    /// Schedule `cb` to run once after `delay`. The returned handle owns
    /// the registration; drop it to cancel, `detach()` it to let the
    /// timer fire unowned. Timers cannot be rescheduled; cancel and
    /// create a new one.
    pub fn timer<F>(&mut self, delay: Duration, cb: F) -> TimerHandle
    where
        F: FnOnce(&mut Plugin) -> Result<CommandResult, Error> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let key = self.timers.lock().unwrap().insert(deadline, Box::new(cb));
        TimerHandle::new(&self.timers, key)
    }

    /// Ends a timer callback, balancing the increment taken when it
    /// fired.
    pub fn timer_complete(&mut self) -> CommandResult {
        assert!(self.in_timer > 0, "timer_complete outside a timer callback");
        self.in_timer -= 1;
        CommandResult::complete()
    }

    pub(crate) fn begin_timer(&mut self) {
        self.in_timer += 1;
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.lock().unwrap().next_deadline()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Whether the node allows deprecated APIs, read via `listconfigs`
    /// while handling `init`.
    pub fn deprecated_apis(&self) -> bool {
        self.deprecated_apis
    }

    pub(crate) fn set_deprecated_apis(&mut self, allowed: bool) {
        self.deprecated_apis = allowed;
    }

    /// The chain this node runs on; available once `init` has been
    /// handled.
    pub fn network(&self) -> Option<Network> {
        self.network
    }

    pub(crate) fn set_network(&mut self, network: Network) {
        self.network = Some(network);
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub(crate) fn usage_for(&self, method: &str) -> Option<&str> {
        self.usage.get(method).map(String::as_str)
    }

    // -------------------------------------------------------------------------

    fn push_node(&mut self, value: &impl serde::Serialize) {
        self.out_queue
            .push_back(serde_json::to_vec(value).unwrap());
    }

    fn push_rpc(&mut self, value: &impl serde::Serialize) {
        self.rpc_queue
            .push_back(serde_json::to_vec(value).unwrap());
    }
}
