//! End-to-end scenarios driven through the fully assembled
//! [`conduit_server::App`]: the gate, a dynamic tool registration and
//! call, and admission control under concurrent load.

use tokio_util::sync::CancellationToken;

use conduit_protocol::Transport;
use conduit_server::{build, Config};

fn enabled_admin_config() -> Config {
    let mut config = Config::default();
    config.tools.admin_registration_enabled = true;
    config.security.dynamic_registration_enabled = true;
    config.tools.admin_policy =
        conduit_tools::AdminPolicy { mode: conduit_tools::AdminPolicyMode::LocalStdioOnly, token_env_var: None };
    config
}

async fn send(app: &conduit_server::App, line: &str) -> serde_json::Value {
    let response = app
        .dispatcher
        .dispatch(line, CancellationToken::new())
        .await
        .expect("expected a response line");
    serde_json::from_str(&response).unwrap()
}

/// Parses a `tools/call` success envelope's embedded text payload back
/// into JSON (the pipeline wraps every result as `{content:[{text}], isError}`).
fn tool_payload(response: &serde_json::Value) -> serde_json::Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn scenario_s1_gate_then_initialize_then_list() {
    let app = build(&Config::default(), Transport::Stdio);

    let rejected = send(&app, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#).await;
    assert_eq!(rejected["error"]["code"], -32002);
    assert_eq!(rejected["error"]["data"]["code"], "NOT_INITIALIZED");

    let init = send(
        &app,
        r#"{"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
    )
    .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "conduit");

    let none = app
        .dispatcher
        .dispatch(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#, CancellationToken::new())
        .await;
    assert!(none.is_none());

    let listed = send(&app, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list","params":{}}"#).await;
    let tools = listed["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "health"));
    assert!(tools.iter().any(|t| t["name"] == "agent/sendMessage"));
}

#[tokio::test]
async fn scenario_s2_dynamic_echo_tool_pipeline() {
    let app = build(&enabled_admin_config(), Transport::Stdio);

    let _ = send(&app, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
    app.dispatcher
        .dispatch(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#, CancellationToken::new())
        .await;

    let registered = send(
        &app,
        r#"{"jsonrpc":"2.0","id":2,"method":"admin/registerTool","params":{
            "name":"echo",
            "description":"echoes its arguments",
            "toolType":"echo",
            "inputSchema":{"type":"object","properties":{"message":{"type":"string"}},"required":["message"]}
        }}"#,
    )
    .await;
    assert_eq!(registered["result"]["success"], true);

    let ok = send(
        &app,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
    )
    .await;
    assert_eq!(ok["result"]["isError"], false);
    assert_eq!(tool_payload(&ok)["message"], "hi");

    let missing_arg = send(
        &app,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#,
    )
    .await;
    assert_eq!(missing_arg["result"]["isError"], true);
    assert_eq!(tool_payload(&missing_arg)["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unknown_method_is_rejected_before_initialize_by_the_gate() {
    let app = build(&Config::default(), Transport::Stdio);
    let rejected = send(&app, r#"{"jsonrpc":"2.0","id":1,"method":"not/a/real/method","params":{}}"#).await;
    assert_eq!(rejected["error"]["code"], -32002);
}

mod concurrency {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use conduit_error::StructuredError;
    use conduit_protocol::{Transport, ToolContext, ToolDefinition};
    use conduit_registry::ToolHandler;
    use conduit_server::{build, Config};

    /// A handler that sleeps 200ms, tracking how many calls are in flight
    /// at once so the test can observe the semaphore actually bounding
    /// parallelism rather than serializing every call.
    struct Slow {
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Slow {
        async fn call(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::String("done".to_string()))
        }
    }

    /// Three concurrent 200ms-blocking `tools/call` invocations against a
    /// two-slot resource manager: two run in parallel, the third is
    /// rejected outright (admission control fails fast, it doesn't queue).
    #[tokio::test]
    async fn three_concurrent_calls_are_bounded_by_the_admission_semaphore() {
        let mut config = Config::default();
        config.resources.max_concurrent_executions = 2;
        let app = build(&config, Transport::Stdio);

        let _ = super::send(&app, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        app.dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#, CancellationToken::new())
            .await;

        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Slow { current: current.clone(), max_seen: max_seen.clone() });
        let definition = ToolDefinition {
            name: "slow".to_string(),
            description: "sleeps 200ms".to_string(),
            input_schema: serde_json::json!({ "type": "object", "properties": {}, "required": [] }),
            version: None,
            is_dynamic: false,
        };
        app.registry.register(definition, handler, &conduit_core::Logger::stderr()).unwrap();

        let call = |id: u64| {
            let app = &app;
            async move {
                super::send(app, &format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"tools/call","params":{{"name":"slow","arguments":{{}}}}}}"#))
                    .await
            }
        };

        let (a, b, c) = tokio::join!(call(2), call(3), call(4));
        let results = [a, b, c];

        assert_eq!(max_seen.load(Ordering::SeqCst), 2, "semaphore should cap in-flight calls at 2");

        let exhausted = results.iter().filter(|r| super::tool_payload(r)["code"] == "RESOURCE_EXHAUSTED").count();
        assert_eq!(exhausted, 1, "exactly one of three calls should be rejected by admission control");
    }
}
