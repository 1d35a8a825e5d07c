//! End-to-end tests: a mock node drives the runtime over in-memory pipes
//! and a real Unix socket, exactly the way lightningd would over
//! stdin/stdout and the RPC file.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use lnplugin::framing::{write_framed, FrameReader};
use lnplugin::{
    forward_error, forward_result, Builder, Command, CommandResult, ConfigOption, Error, LogLevel,
    Network, Plugin, RpcCommand,
};

/// Handling `init` chdirs into the lightning directory, and the process
/// cwd is shared across the test runner's threads. Every test that
/// drives `init` holds this lock for its whole run.
static INIT_CWD: Mutex<()> = Mutex::new(());

fn cwd_lock() -> MutexGuard<'static, ()> {
    INIT_CWD.lock().unwrap_or_else(|e| e.into_inner())
}

// -----------------------------------------------------------------------------
// Harness
// -----------------------------------------------------------------------------

/// The node's side of the conversation.
struct Node {
    to_plugin: DuplexStream,
    from_plugin: FrameReader<DuplexStream>,
    runner: JoinHandle<Result<(), Error>>,
}

impl Node {
    async fn send(&mut self, v: Value) -> Result<()> {
        self.to_plugin
            .write_all(serde_json::to_string(&v)?.as_bytes())
            .await?;
        self.to_plugin.write_all(b"\n\n").await?;
        Ok(())
    }

    /// Next raw frame off the plugin's stdout, terminator included.
    async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        self.from_plugin
            .read_frame()
            .await?
            .ok_or_else(|| anyhow!("plugin closed stdout"))
    }

    async fn recv(&mut self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.recv_frame().await?)?)
    }
}

fn spawn(builder: Builder) -> Node {
    let (to_plugin, plugin_stdin) = tokio::io::duplex(64 * 1024);
    let (plugin_stdout, from_plugin) = tokio::io::duplex(64 * 1024);
    let runner = builder.build(plugin_stdin, plugin_stdout);
    Node {
        to_plugin,
        from_plugin: FrameReader::new(from_plugin),
        runner: tokio::spawn(runner.run()),
    }
}

fn hello(plugin: &mut Plugin, cmd: Command, params: Option<&Value>) -> Result<CommandResult, Error> {
    if cmd.usage_only() {
        return plugin.command_set_usage(cmd, "[name]");
    }
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("world")
        .to_owned();
    Ok(plugin.command_success(cmd, json!({ "greeting": format!("hello {name}") })))
}

fn echo_getinfo(
    plugin: &mut Plugin,
    cmd: Command,
    _params: Option<&Value>,
) -> Result<CommandResult, Error> {
    if cmd.usage_only() {
        return plugin.command_set_usage(cmd, "");
    }
    Ok(plugin.send_outreq(cmd, "getinfo", json!({}), forward_result, forward_error))
}

fn test_builder() -> Builder {
    Builder::new()
        .option(ConfigOption::new(
            "greeting",
            "string",
            "What to greet with",
            |_| Ok(()),
        ))
        .command(RpcCommand::new("hello", "Greet the caller", hello))
        .command(
            RpcCommand::new("echo-getinfo", "Proxy getinfo through the node", echo_getinfo)
                .long_description("Forwards whatever getinfo returns, verbatim."),
        )
        .subscribe("connect", |plugin, cmd, _params| {
            Ok(plugin.notification_handled(cmd))
        })
        .hook("peer_connected", |plugin, cmd, _params| {
            Ok(plugin.command_success(cmd, json!({ "result": "continue" })))
        })
}

/// Bind a mock `lightning-rpc` socket in a fresh directory and serve the
/// init-time `listconfigs` probe; hands the connection back for whatever
/// the test wants to do next.
fn mock_rpc() -> Result<(tempfile::TempDir, JoinHandle<FrameReader<UnixStream>>)> {
    let dir = tempfile::tempdir()?;
    let listener = UnixListener::bind(dir.path().join("lightning-rpc"))?;
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = FrameReader::new(stream);
        let frame = conn.read_frame().await.unwrap().unwrap();
        let req: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(req["method"], json!("listconfigs"));
        assert_eq!(req["id"], json!(0));
        reply(
            &mut conn,
            json!({"jsonrpc": "2.0", "id": 0, "result": {"allow-deprecated-apis": "true"}}),
        )
        .await;
        conn
    });
    Ok((dir, accept))
}

async fn reply(conn: &mut FrameReader<UnixStream>, v: Value) {
    write_framed(conn.inner_mut(), &serde_json::to_vec(&v).unwrap())
        .await
        .unwrap();
}

async fn handshake(node: &mut Node, dir: &str) -> Result<()> {
    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}))
        .await?;
    let manifest = node.recv().await?;
    assert_eq!(manifest["id"], json!(1));

    node.send(json!({"jsonrpc": "2.0", "id": 2, "method": "init", "params": {
        "configuration": {
            "lightning-dir": dir,
            "network": "regtest",
            "rpc-file": "lightning-rpc",
        },
        "options": {},
    }}))
    .await?;
    let resp = node.recv().await?;
    assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 2, "result": {}}));
    Ok(())
}

// -----------------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------------

#[tokio::test]
async fn manifest_lists_registrations_and_frames_cleanly() -> Result<()> {
    let mut node = spawn(test_builder());
    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}))
        .await?;

    let frame = node.recv_frame().await?;
    assert!(frame.ends_with(b"\n\n"), "every object ends with a blank line");
    let body = &frame[..frame.len() - 2];
    assert!(
        !body.windows(2).any(|w| w == b"\n\n"),
        "no terminator inside the object"
    );

    let resp: Value = serde_json::from_slice(&frame)?;
    assert_eq!(resp["id"], json!(1));
    let result = &resp["result"];
    assert_eq!(result["options"][0]["name"], json!("greeting"));
    assert_eq!(result["options"][0]["type"], json!("string"));
    assert_eq!(result["rpcmethods"][0]["name"], json!("hello"));
    assert_eq!(result["rpcmethods"][0]["usage"], json!("[name]"));
    assert_eq!(
        result["rpcmethods"][1]["long_description"],
        json!("Forwards whatever getinfo returns, verbatim.")
    );
    assert_eq!(result["subscriptions"], json!(["connect"]));
    assert_eq!(result["hooks"], json!(["peer_connected"]));
    assert_eq!(result["dynamic"], json!("false"));
    Ok(())
}

#[tokio::test]
async fn init_connects_the_rpc_socket_and_replies_empty() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let mut node = spawn(test_builder());
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    // The mock asserted it saw listconfigs with id 0.
    let _conn = accept.await?;
    Ok(())
}

#[tokio::test]
async fn outreq_result_is_forwarded_under_the_inbound_id() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let mut node = spawn(test_builder());
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    let mut rpc = accept.await?;

    node.send(json!({"jsonrpc": "2.0", "id": 7, "method": "echo-getinfo", "params": {}}))
        .await?;

    let frame = rpc.read_frame().await?.ok_or_else(|| anyhow!("rpc closed"))?;
    let req: Value = serde_json::from_slice(&frame)?;
    assert_eq!(req["method"], json!("getinfo"));
    let outreq_id = req["id"].as_u64().expect("outbound ids are numeric");
    assert_eq!(outreq_id, 1, "first minted id after the reserved 0");

    reply(
        &mut rpc,
        json!({"jsonrpc": "2.0", "id": outreq_id, "result": {"alias": "x"}}),
    )
    .await;

    let resp = node.recv().await?;
    assert_eq!(
        resp,
        json!({"jsonrpc": "2.0", "id": 7, "result": {"alias": "x"}})
    );
    Ok(())
}

#[tokio::test]
async fn permuted_replies_complete_their_own_commands() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let mut node = spawn(test_builder());
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    let mut rpc = accept.await?;

    node.send(json!({"jsonrpc": "2.0", "id": 10, "method": "echo-getinfo", "params": {}}))
        .await?;
    node.send(json!({"jsonrpc": "2.0", "id": 11, "method": "echo-getinfo", "params": {}}))
        .await?;

    let mut outreq_ids = Vec::new();
    for _ in 0..2 {
        let frame = rpc.read_frame().await?.ok_or_else(|| anyhow!("rpc closed"))?;
        let req: Value = serde_json::from_slice(&frame)?;
        outreq_ids.push(req["id"].as_u64().unwrap());
    }
    assert_eq!(outreq_ids, vec![1, 2], "requests go out in call order");

    // Answer the second call first; its command must finish first.
    reply(
        &mut rpc,
        json!({"jsonrpc": "2.0", "id": outreq_ids[1], "result": {"n": 2}}),
    )
    .await;
    reply(
        &mut rpc,
        json!({"jsonrpc": "2.0", "id": outreq_ids[0], "result": {"n": 1}}),
    )
    .await;

    let first = node.recv().await?;
    assert_eq!(first["id"], json!(11));
    assert_eq!(first["result"]["n"], json!(2));
    let second = node.recv().await?;
    assert_eq!(second["id"], json!(10));
    assert_eq!(second["result"]["n"], json!(1));
    Ok(())
}

#[tokio::test]
async fn notifications_and_hooks_dispatch_in_ready_state() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let mut node = spawn(test_builder());
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    let _conn = accept.await?;

    // A notification produces no reply; the next thing on stdout is the
    // answer to the command that follows it.
    node.send(json!({"jsonrpc": "2.0", "method": "connect", "params": {"id": "peer"}}))
        .await?;
    node.send(json!({"jsonrpc": "2.0", "id": 3, "method": "hello", "params": {"name": "node"}}))
        .await?;
    let resp = node.recv().await?;
    assert_eq!(resp["id"], json!(3));
    assert_eq!(resp["result"]["greeting"], json!("hello node"));

    node.send(json!({"jsonrpc": "2.0", "id": 9, "method": "peer_connected", "params": {}}))
        .await?;
    let resp = node.recv().await?;
    assert_eq!(resp["id"], json!(9));
    assert_eq!(resp["result"]["result"], json!("continue"));
    Ok(())
}

#[tokio::test]
async fn unknown_method_after_handshake_is_fatal() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let mut node = spawn(test_builder());
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    let _conn = accept.await?;

    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "nosuchmethod", "params": {}}))
        .await?;
    let result = node.runner.await?;
    assert!(matches!(result, Err(Error::UnknownMethod(m)) if m == "nosuchmethod"));
    Ok(())
}

#[tokio::test]
async fn commands_before_getmanifest_are_fatal() -> Result<()> {
    let mut node = spawn(test_builder());
    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "hello", "params": {}}))
        .await?;
    let result = node.runner.await?;
    assert!(matches!(
        result,
        Err(Error::Handshake { expected: "getmanifest", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn only_init_is_accepted_after_the_manifest() -> Result<()> {
    let mut node = spawn(test_builder());
    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}))
        .await?;
    let _ = node.recv().await?;
    node.send(json!({"jsonrpc": "2.0", "id": 2, "method": "hello", "params": {}}))
        .await?;
    let result = node.runner.await?;
    assert!(matches!(
        result,
        Err(Error::Handshake { expected: "init", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn timer_fires_once_and_sends_only_a_log() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, accept) = mock_rpc()?;
    let builder = test_builder().on_init(|plugin, _config| {
        // By now init has recorded what listconfigs and the
        // configuration object said.
        assert!(plugin.deprecated_apis());
        assert_eq!(plugin.network(), Some(Network::Regtest));
        plugin
            .timer(Duration::from_millis(50), |p| {
                p.log(LogLevel::Info, "tick");
                Ok(p.timer_complete())
            })
            .detach();
        Ok(())
    });
    let mut node = spawn(builder);
    let started = Instant::now();
    handshake(&mut node, dir.path().to_str().unwrap()).await?;
    let _conn = accept.await?;

    let notif = node.recv().await?;
    let elapsed = started.elapsed();
    assert_eq!(notif["method"], json!("log"));
    assert_eq!(notif["params"]["level"], json!("info"));
    assert_eq!(notif["params"]["message"], json!("tick"));
    assert!(notif.get("id").is_none(), "log notifications carry no id");
    assert!(
        elapsed >= Duration::from_millis(45),
        "fired too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "fired too late: {elapsed:?}"
    );
    Ok(())
}

#[tokio::test]
async fn stdin_eof_is_a_clean_shutdown() -> Result<()> {
    let node = spawn(test_builder());
    drop(node.to_plugin);
    assert!(node.runner.await?.is_ok());
    Ok(())
}

#[tokio::test]
async fn rejected_option_values_are_fatal() -> Result<()> {
    let _cwd = cwd_lock();
    let (dir, _accept) = mock_rpc()?;
    let builder = Builder::new()
        .option(ConfigOption::new(
            "retries",
            "string",
            "How often to retry",
            |v| lnplugin::u64_option(v).map(|_| ()),
        ))
        .command(RpcCommand::new("hello", "Greet the caller", hello));
    let mut node = spawn(builder);

    node.send(json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}))
        .await?;
    let _ = node.recv().await?;
    node.send(json!({"jsonrpc": "2.0", "id": 2, "method": "init", "params": {
        "configuration": {
            "lightning-dir": dir.path().to_str().unwrap(),
            "network": "regtest",
            "rpc-file": "lightning-rpc",
        },
        "options": {"retries": "not-a-number"},
    }}))
    .await?;
    let result = node.runner.await?;
    assert!(matches!(result, Err(Error::Option { name, .. }) if name == "retries"));
    Ok(())
}
