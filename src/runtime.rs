//! The runtime that wires **stdin / stdout** JSON-RPC traffic to the
//! registered handlers, and the node's RPC socket to the outbound-request
//! table.
//!
//! One cooperative loop owns all four I/O directions. Each turn it first
//! serves a reply already buffered on the RPC socket (so a backlog of
//! replies is never starved by network readiness), then waits on
//! node-stdin, the RPC socket and the next timer, then drains the write
//! queues one whole object at a time.
//!
//! Usage:
//! ```ignore
//! use lnplugin::{Builder, RpcCommand};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let result = Builder::new()
//!         .command(RpcCommand::new("hello", "Greet the caller", hello))
//!         .run_stdio()
//!         .await;
//!     if result.is_err() {
//!         std::process::exit(1);
//!     }
//! }
//! ```

use std::path::Path;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::command::{Command, CommandCallback, CommandResult, InitCallback};
use crate::error::Error;
use crate::framing::{self, FrameReader, FrameWriter};
use crate::jsonrpc::{Id, Request};
use crate::logging::LogLevel;
use crate::manifest::{Manifest, OptionSpec, RpcMethodSpec};
use crate::network::Network;
use crate::options::ConfigOption;
use crate::plugin::Plugin;

// -----------------------------------------------------------------------------
// Registration
// -----------------------------------------------------------------------------

/// A command the plugin exposes to the node's users.
pub struct RpcCommand {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) long_description: Option<String>,
    pub(crate) handler: CommandCallback,
}

impl RpcCommand {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn(&mut Plugin, Command, Option<&Value>) -> Result<CommandResult, Error>
            + Send
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            long_description: None,
            handler: Box::new(handler),
        }
    }

    pub fn long_description(mut self, text: impl Into<String>) -> Self {
        self.long_description = Some(text.into());
        self
    }
}

struct Registry {
    commands: Vec<RpcCommand>,
    subscriptions: Vec<(String, CommandCallback)>,
    hooks: Vec<(String, CommandCallback)>,
    options: Vec<ConfigOption>,
    init: Option<InitCallback>,
}

/// Declares what the plugin registers, then starts the runtime.
pub struct Builder {
    registry: Registry,
    dynamic: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            registry: Registry {
                commands: Vec::new(),
                subscriptions: Vec::new(),
                hooks: Vec::new(),
                options: Vec::new(),
                init: None,
            },
            dynamic: false,
        }
    }

    /// Whether the node may stop and restart this plugin at will.
    pub fn dynamic(mut self, restartable: bool) -> Self {
        self.dynamic = restartable;
        self
    }

    pub fn command(mut self, command: RpcCommand) -> Self {
        self.registry.commands.push(command);
        self
    }

    /// Subscribe to a notification. Plugins must subscribe to exactly
    /// what they handle: an unsubscribed notification arriving is fatal.
    pub fn subscribe(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&mut Plugin, Command, Option<&Value>) -> Result<CommandResult, Error>
            + Send
            + 'static,
    ) -> Self {
        self.registry
            .subscriptions
            .push((name.into(), Box::new(handler)));
        self
    }

    /// Register a hook. The node waits for the hook's reply before
    /// continuing, so hooks are searched before commands on dispatch.
    pub fn hook(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&mut Plugin, Command, Option<&Value>) -> Result<CommandResult, Error>
            + Send
            + 'static,
    ) -> Self {
        self.registry.hooks.push((name.into(), Box::new(handler)));
        self
    }

    pub fn option(mut self, option: ConfigOption) -> Self {
        self.registry.options.push(option);
        self
    }

    /// Runs once after `init` has been processed, with the node's
    /// `configuration` object.
    pub fn on_init(
        mut self,
        f: impl FnOnce(&mut Plugin, &Value) -> Result<(), Error> + Send + 'static,
    ) -> Self {
        self.registry.init = Some(Box::new(f));
        self
    }

    /// Wire the runtime to arbitrary streams. Production uses
    /// [`Builder::run_stdio`]; tests drive this over in-memory pipes.
    pub fn build<R, W>(self, reader: R, writer: W) -> Runner<R, W>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        Runner {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            rpc: None,
            plugin: Plugin::new(self.dynamic),
            registry: self.registry,
        }
    }

    /// Run against the real stdin/stdout. Returns `Ok(())` when the node
    /// goes away; the embedding binary should exit 0 then, and exit 1 on
    /// any `Err`.
    pub async fn run_stdio(self) -> Result<(), Error> {
        self.build(tokio::io::stdin(), tokio::io::stdout())
            .run()
            .await
    }
}

// -----------------------------------------------------------------------------
// Runner
// -----------------------------------------------------------------------------

pub struct Runner<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    rpc: Option<FrameReader<UnixStream>>,
    plugin: Plugin,
    registry: Registry,
}

enum Wake {
    Node(usize),
    Rpc(usize),
    Timer,
}

impl<R, W> Runner<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Drive the plugin until the node disconnects (`Ok`) or a fatal
    /// error occurs (`Err`, after a best-effort `log` notification).
    pub async fn run(mut self) -> Result<(), Error> {
        match self.run_inner().await {
            Ok(()) => Ok(()),
            Err(Error::ConnectionClosed) => Ok(()),
            Err(err) => {
                error!(error = %err, "fatal plugin error");
                self.plugin.log(LogLevel::Error, err.to_string());
                let _ = self.flush().await;
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), Error> {
        self.probe_usage()?;
        self.flush().await?;

        loop {
            // A reply already buffered on the RPC socket is served before
            // any new I/O, exactly one per turn.
            if let Some(frame) = self.rpc.as_mut().and_then(FrameReader::pop_frame) {
                if !framing::is_blank(&frame) {
                    self.handle_rpc_reply(&frame)?;
                    self.flush().await?;
                }
                continue;
            }

            let deadline = self.plugin.next_timer_deadline();
            let wake = {
                let reader = &mut self.reader;
                let rpc = &mut self.rpc;
                tokio::select! {
                    biased;
                    n = reader.fill() => Wake::Node(n?),
                    n = async {
                        match rpc.as_mut() {
                            Some(conn) => conn.fill().await,
                            None => std::future::pending::<std::io::Result<usize>>().await,
                        }
                    } => Wake::Rpc(n?),
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => Wake::Timer,
                }
            };

            match wake {
                // Either descriptor closing means the node went away;
                // that is the normal way for a plugin to stop.
                Wake::Node(0) | Wake::Rpc(0) => return Ok(()),
                Wake::Node(_) => {
                    while let Some(frame) = self.reader.pop_frame() {
                        if framing::is_blank(&frame) {
                            continue;
                        }
                        self.dispatch(&frame).await?;
                    }
                }
                Wake::Rpc(_) => {} // picked up at the top of the loop
                Wake::Timer => self.fire_due_timers()?,
            }

            self.flush().await?;
        }
    }

    // -------------------------------------------------------------------------
    // Inbound dispatch & handshake
    // -------------------------------------------------------------------------

    async fn dispatch(&mut self, frame: &[u8]) -> Result<(), Error> {
        let msg: Value = serde_json::from_slice(frame)?;
        if msg.get("jsonrpc").is_none() {
            return Err(Error::Protocol(
                "message does not contain \"jsonrpc\" field".into(),
            ));
        }
        let method = msg
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol(format!("message missing \"method\": {msg}")))?
            .to_owned();
        let params = msg
            .get("params")
            .ok_or_else(|| Error::Protocol(format!("message missing \"params\": {msg}")))?;
        let cmd = Command::new(parse_inbound_id(&msg)?, method.clone());
        debug!(%method, notification = cmd.is_notification(), "inbound message");

        if !self.plugin.manifested {
            return if method == "getmanifest" {
                self.handle_getmanifest(cmd);
                self.plugin.manifested = true;
                Ok(())
            } else {
                Err(Error::Handshake {
                    expected: "getmanifest",
                    got: method,
                })
            };
        }
        if !self.plugin.initialized {
            return if method == "init" {
                self.handle_init(cmd, params).await?;
                self.plugin.initialized = true;
                Ok(())
            } else {
                Err(Error::Handshake {
                    expected: "init",
                    got: method,
                })
            };
        }

        if cmd.is_notification() {
            if let Some((_, handler)) = self
                .registry
                .subscriptions
                .iter()
                .find(|(name, _)| *name == method)
            {
                let _ = handler(&mut self.plugin, cmd, Some(params))?;
                return Ok(());
            }
            return Err(Error::UnknownMethod(method));
        }

        // Hooks are searched before commands.
        if let Some((_, handler)) = self.registry.hooks.iter().find(|(name, _)| *name == method) {
            let _ = handler(&mut self.plugin, cmd, Some(params))?;
            return Ok(());
        }
        if let Some(entry) = self.registry.commands.iter().find(|c| c.name == method) {
            let _ = (entry.handler)(&mut self.plugin, cmd, Some(params))?;
            return Ok(());
        }
        Err(Error::UnknownMethod(method))
    }

    fn handle_getmanifest(&mut self, cmd: Command) {
        let manifest = Manifest {
            options: self
                .registry
                .options
                .iter()
                .map(|o| OptionSpec {
                    name: o.name.clone(),
                    value_type: o.value_type.clone(),
                    description: o.description.clone(),
                })
                .collect(),
            rpcmethods: self
                .registry
                .commands
                .iter()
                .map(|c| RpcMethodSpec {
                    name: c.name.clone(),
                    usage: self.plugin.usage_for(&c.name).unwrap_or_default().to_owned(),
                    description: c.description.clone(),
                    long_description: c.long_description.clone(),
                })
                .collect(),
            subscriptions: self
                .registry
                .subscriptions
                .iter()
                .map(|(name, _)| name.clone())
                .collect(),
            hooks: self
                .registry
                .hooks
                .iter()
                .map(|(name, _)| name.clone())
                .collect(),
            dynamic: Manifest::dynamic_flag(self.plugin.is_dynamic()),
        };
        let _ = self
            .plugin
            .command_success(cmd, serde_json::to_value(manifest).unwrap());
    }

    async fn handle_init(&mut self, cmd: Command, params: &Value) -> Result<(), Error> {
        let config = params
            .get("configuration")
            .ok_or_else(|| Error::Protocol("init without configuration".into()))?;

        // Move into the lightning directory: other files are relative.
        let dir = config
            .get("lightning-dir")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Init("configuration missing lightning-dir".into()))?;
        std::env::set_current_dir(dir).map_err(|e| Error::Init(format!("chdir to {dir}: {e}")))?;

        let network = config
            .get("network")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Init("configuration missing network".into()))?;
        let network: Network = network
            .parse()
            .map_err(|_| Error::Init(format!("unknown network '{network}'")))?;
        self.plugin.set_network(network);

        let rpc_file = config
            .get("rpc-file")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Init("configuration missing rpc-file".into()))?;
        let rpc_path = Path::new(dir).join(rpc_file);
        let stream = UnixStream::connect(&rpc_path).await.map_err(|e| {
            Error::Init(format!("connecting to '{}': {e}", rpc_path.display()))
        })?;
        self.rpc = Some(FrameReader::new(stream));

        let allow = self
            .rpc_delve(
                "listconfigs",
                json!({ "config": "allow-deprecated-apis" }),
                ".allow-deprecated-apis",
            )
            .await?;
        self.plugin.set_deprecated_apis(allow == "true");

        if let Some(opts) = params.get("options").and_then(Value::as_object) {
            for (name, value) in opts {
                // Unregistered names are ignored.
                let Some(opt) = self.registry.options.iter().find(|o| o.name == *name) else {
                    continue;
                };
                (opt.handler)(value).map_err(|reason| Error::Option {
                    name: name.clone(),
                    reason,
                })?;
            }
        }

        if let Some(init) = self.registry.init.take() {
            init(&mut self.plugin, config)?;
        }

        let _ = self.plugin.command_success_str(cmd, None);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // RPC socket: synchronous init-time reads and the reply path
    // -------------------------------------------------------------------------

    /// Send a request with id 0 and block on this socket until the reply
    /// arrives, then walk the dotted `path` into its result. Only used
    /// while handling `init`, before the outbound table is in play.
    async fn rpc_delve(&mut self, method: &str, params: Value, path: &str) -> Result<String, Error> {
        let conn = self
            .rpc
            .as_mut()
            .ok_or_else(|| Error::Protocol("rpc_delve before the RPC socket exists".into()))?;
        let req = Request::call(Id::Number(0), method, Some(params));
        framing::write_framed(conn.inner_mut(), &serde_json::to_vec(&req).unwrap()).await?;

        let frame = conn.read_frame().await?.ok_or(Error::ConnectionClosed)?;
        let reply: Value = serde_json::from_slice(&frame)?;
        if let Some(err) = reply.get("error") {
            return Err(Error::Rpc {
                method: method.to_owned(),
                error: err.clone(),
            });
        }
        let result = reply.get("result").ok_or_else(|| {
            Error::Protocol(format!("reply to {method} with no 'result' nor 'error'"))
        })?;
        let found = delve(result, path).ok_or_else(|| {
            Error::Protocol(format!("could not find {path} in reply to {method}"))
        })?;
        Ok(match found {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn handle_rpc_reply(&mut self, frame: &[u8]) -> Result<(), Error> {
        let reply: Value = serde_json::from_slice(frame)?;
        let id = reply
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Protocol(format!("reply without numeric id: {reply}")))?;
        let out = self
            .plugin
            .out_reqs
            .remove(&id)
            .ok_or(Error::UnknownReplyId(id))?;

        let res = if let Some(err) = reply.get("error") {
            (out.on_err)(&mut self.plugin, out.cmd, err)?
        } else if let Some(result) = reply.get("result") {
            (out.on_ok)(&mut self.plugin, out.cmd, result)?
        } else {
            return Err(Error::Protocol(format!(
                "reply with no 'result' nor 'error': {reply}"
            )));
        };
        let _ = res; // Pending and Complete are both legitimate here.
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Timers, usage probe, write drain
    // -------------------------------------------------------------------------

    fn fire_due_timers(&mut self) -> Result<(), Error> {
        loop {
            let due = self.plugin.timers.lock().unwrap().pop_due(Instant::now());
            let Some(cb) = due else { return Ok(()) };
            self.plugin.begin_timer();
            let _ = cb(&mut self.plugin)?;
        }
    }

    /// Run every registered command once in usage-probe mode so the
    /// manifest can advertise parameter schemas.
    fn probe_usage(&mut self) -> Result<(), Error> {
        for entry in &self.registry.commands {
            let probe = Command::usage_probe(entry.name.clone());
            let res = (entry.handler)(&mut self.plugin, probe, None)?;
            if res.is_pending() {
                return Err(Error::Protocol(format!(
                    "usage probe for {} left the command pending",
                    entry.name
                )));
            }
            if self.plugin.usage_for(&entry.name).is_none() {
                return Err(Error::Protocol(format!(
                    "command {} did not set a usage string",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Drain the write queues, one whole object at a time: responses and
    /// log notifications to the node's stdout, outbound requests to the
    /// RPC socket. stdout going away is a clean shutdown, not an error.
    async fn flush(&mut self) -> Result<(), Error> {
        fn gone_or_fatal(e: std::io::Error) -> Error {
            match e.kind() {
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                    Error::ConnectionClosed
                }
                _ => Error::Io(e),
            }
        }

        while let Some(obj) = self.plugin.out_queue.pop_front() {
            self.writer.write_obj(&obj).await.map_err(gone_or_fatal)?;
        }
        while let Some(obj) = self.plugin.rpc_queue.pop_front() {
            let conn = self.rpc.as_mut().ok_or_else(|| {
                Error::Protocol("outbound RPC queued before init connected the socket".into())
            })?;
            framing::write_framed(conn.inner_mut(), &obj)
                .await
                .map_err(gone_or_fatal)?;
        }
        Ok(())
    }
}

fn parse_inbound_id(msg: &Value) -> Result<Option<Id>, Error> {
    match msg.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| Some(Id::Number(v)))
            .ok_or_else(|| Error::Protocol(format!("JSON id '{n}' is not an unsigned number"))),
        Some(Value::String(s)) => Ok(Some(Id::String(s.clone()))),
        Some(other) => Err(Error::Protocol(format!(
            "JSON id '{other}' has an unsupported type"
        ))),
    }
}

/// Walk a dotted path (".a.b") into a JSON value.
fn delve<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
    for seg in path.trim_start_matches('.').split('.') {
        value = value.get(seg)?;
    }
    Some(value)
}
