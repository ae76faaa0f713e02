//! Consumer-side tests: correlation, timeouts, friendly values, local
//! routing, and full registry + provider + consumer round trips.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::net::TcpListener;

use beacon_client::{
    ConditionEvaluator, LocalServiceRegistry, ReferenceConfig, RpcBootstrap, RpcClient,
    ServiceClient,
};
use beacon_common::protocol::{Message, RpcRequest, RpcResponse, ServiceInfo};
use beacon_common::transport::{read_message, write_message};
use beacon_common::RpcError;
use beacon_registry::{RegistryClientOptions, RegistryConfig, RegistryServer, RunningRegistry};
use beacon_server::{ProviderServer, RunningProvider, ServiceDescriptor, ServiceHandler};

fn fast_registry_config() -> RegistryConfig {
    RegistryConfig {
        port: 0,
        sweep_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_secs(10),
        reader_idle: Duration::from_secs(5),
        ..RegistryConfig::default()
    }
}

fn fast_client_options() -> RegistryClientOptions {
    RegistryClientOptions {
        call_timeout: Duration::from_secs(2),
        connect_attempts: 3,
        connect_retry_interval: Duration::from_millis(50),
        connect_deadline: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        register_retry_pause: Duration::from_millis(50),
        registration_refresh_ticks: 1,
    }
}

async fn spawn_registry() -> RunningRegistry {
    RegistryServer::spawn(fast_registry_config()).await.unwrap()
}

async fn consumer(registry: &RunningRegistry) -> Arc<RpcClient> {
    Arc::new(
        RpcClient::connect_with_options(
            registry.addr.to_string(),
            Duration::from_secs(2),
            fast_client_options(),
        )
        .await
        .unwrap(),
    )
}

fn echo_handler() -> Arc<dyn ServiceHandler> {
    Arc::new(|method: &str, params: &[Value]| match method {
        "say" => Ok(params.first().cloned().unwrap_or(Value::Null)),
        "explode" => Err(RpcError::LocalInvocation("provider exploded".into())),
        other => Err(RpcError::Protocol(format!("no such method: {other}"))),
    })
}

async fn spawn_provider(registry: &RunningRegistry) -> RunningProvider {
    let mut provider = ProviderServer::new(registry.addr.to_string(), "127.0.0.1", 0)
        .registry_options(fast_client_options());
    provider.register_service(ServiceDescriptor::new("Echo"), echo_handler());
    provider.start().await.unwrap()
}

fn request(param: Value) -> RpcRequest {
    RpcRequest::new("Echo", "say", vec![param], "1.0.0", "")
}

/// Registers a hand-rolled provider endpoint directly in the registry's
/// store, so tests can script the provider's exact wire behavior.
async fn seed_provider_address(registry: &RunningRegistry, address: &str) {
    registry
        .store
        .register(ServiceInfo::new("Echo", "1.0.0", "", address))
        .await;
}

#[tokio::test]
async fn responses_correlate_by_request_id_under_reordering() {
    let registry = spawn_registry().await;

    // A scripted provider that reads two requests and answers them in
    // reverse order.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    seed_provider_address(&registry, &addr).await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let first = read_message(&mut stream).await.unwrap().unwrap();
        let second = read_message(&mut stream).await.unwrap().unwrap();
        for msg in [second, first] {
            let req = msg.as_request().unwrap();
            let resp = RpcResponse::success(req.parameters[0].clone());
            write_message(&mut stream, &Message::response(msg.request_id, &resp).unwrap())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let client = consumer(&registry).await;
    let pending_one = client.send_request(&request(json!("one"))).await.unwrap();
    let pending_two = client.send_request(&request(json!("two"))).await.unwrap();
    assert_eq!(pending_one.request_id(), 1);
    assert_eq!(pending_two.request_id(), 2);

    let (one, two) = tokio::join!(
        pending_one.wait(Duration::from_secs(2)),
        pending_two.wait(Duration::from_secs(2)),
    );
    // Each caller sees its own body despite the reversed arrival order.
    assert_eq!(one.unwrap().data, json!("one"));
    assert_eq!(two.unwrap().data, json!("two"));

    client.close().await;
}

#[tokio::test]
async fn unknown_response_ids_are_dropped() {
    let registry = spawn_registry().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    seed_provider_address(&registry, &addr).await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let msg = read_message(&mut stream).await.unwrap().unwrap();
        // First an unsolicited response nobody asked for, then the real one.
        let bogus = RpcResponse::success(json!("bogus"));
        write_message(&mut stream, &Message::response(9999, &bogus).unwrap())
            .await
            .unwrap();
        let req = msg.as_request().unwrap();
        let real = RpcResponse::success(req.parameters[0].clone());
        write_message(&mut stream, &Message::response(msg.request_id, &real).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let client = consumer(&registry).await;
    let pending = client.send_request(&request(json!("real"))).await.unwrap();
    let response = pending.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(response.data, json!("real"));

    client.close().await;
}

#[tokio::test]
async fn awaiter_honors_its_deadline() {
    let registry = spawn_registry().await;

    // A provider that accepts and reads but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    seed_provider_address(&registry, &addr).await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_message(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let client = consumer(&registry).await;
    let pending = client.send_request(&request(json!("never"))).await.unwrap();

    let started = Instant::now();
    let result = pending.wait(Duration::from_millis(300)).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(RpcError::Timeout(300))));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(1), "deadline overshot: {elapsed:?}");

    client.close().await;
}

#[tokio::test]
async fn no_providers_is_service_not_found() {
    let registry = spawn_registry().await;
    let client = consumer(&registry).await;

    let err = client.send_request(&request(json!("x"))).await.unwrap_err();
    match err {
        RpcError::ServiceNotFound(key) => assert_eq!(key, "Echo_1.0.0_"),
        other => panic!("expected ServiceNotFound, got {other}"),
    }

    client.close().await;
}

#[tokio::test]
async fn connection_teardown_fails_all_pending_requests() {
    let registry = spawn_registry().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    seed_provider_address(&registry, &addr).await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Read both requests, answer neither, slam the door.
        let _ = read_message(&mut stream).await;
        let _ = read_message(&mut stream).await;
        drop(stream);
    });

    let client = consumer(&registry).await;
    let pending_one = client.send_request(&request(json!("a"))).await.unwrap();
    let pending_two = client.send_request(&request(json!("b"))).await.unwrap();

    let (one, two) = tokio::join!(
        pending_one.wait(Duration::from_secs(2)),
        pending_two.wait(Duration::from_secs(2)),
    );
    assert!(matches!(one, Err(RpcError::Transport(_))));
    assert!(matches!(two, Err(RpcError::Transport(_))));

    client.close().await;
}

#[tokio::test]
async fn inactive_cached_connection_is_replaced_on_next_use() {
    let registry = spawn_registry().await;

    // A provider that serves exactly one request per connection and then
    // hangs up, forcing the cache to evict and redial.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    seed_provider_address(&registry, &addr).await;

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            if let Ok(Some(msg)) = read_message(&mut stream).await {
                let req = msg.as_request().unwrap();
                let resp = RpcResponse::success(req.parameters[0].clone());
                let _ = write_message(
                    &mut stream,
                    &Message::response(msg.request_id, &resp).unwrap(),
                )
                .await;
            }
            drop(stream);
        }
    });

    let client = consumer(&registry).await;

    let first = client.call(&request(json!("first"))).await.unwrap();
    assert_eq!(first.data, json!("first"));

    // Give the demultiplexer a beat to observe the hangup, then call again
    // over the same address: the stale connection is evicted and redialed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client.call(&request(json!("second"))).await.unwrap();
    assert_eq!(second.data, json!("second"));

    client.close().await;
}

#[tokio::test]
async fn end_to_end_typed_call_round_trip() {
    let registry = spawn_registry().await;
    let provider = spawn_provider(&registry).await;
    let client = consumer(&registry).await;

    let surface = ServiceClient::new(
        client.clone(),
        Arc::new(LocalServiceRegistry::new()),
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo").timeout(Duration::from_secs(2)),
    );

    let answer: String = surface.call("say", vec![json!("round trip")]).await;
    assert_eq!(answer, "round trip");

    provider.shutdown().await;
    client.close().await;
}

#[tokio::test]
async fn missing_service_yields_the_friendly_string() {
    let registry = spawn_registry().await;
    let client = consumer(&registry).await;

    let surface = ServiceClient::new(
        client.clone(),
        Arc::new(LocalServiceRegistry::new()),
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("com.ex.UserService").timeout(Duration::from_secs(2)),
    );

    let answer: String = surface.call("getUser", vec![json!(123)]).await;
    assert_eq!(answer, "error: service not found: com.ex.UserService_1.0.0_");

    // The friendly value is type-appropriate across return types.
    let zero: i64 = surface.call("getUser", vec![json!(123)]).await;
    assert_eq!(zero, 0);
    let flag: bool = surface.call("getUser", vec![json!(123)]).await;
    assert!(!flag);
    let list: Vec<String> = surface.call("getUser", vec![json!(123)]).await;
    assert!(list.is_empty());
    let opt: Option<String> = surface.call("getUser", vec![json!(123)]).await;
    assert!(opt.is_none());

    client.close().await;
}

#[tokio::test]
async fn false_condition_routes_to_the_local_service() {
    let registry = spawn_registry().await;
    let client = consumer(&registry).await;

    let locals = Arc::new(LocalServiceRegistry::new());
    locals.register_local(
        "Echo",
        "1.0.0",
        "",
        Arc::new(|_: &str, _: &[Value]| Ok(json!("from local"))),
    );

    let surface = ServiceClient::new(
        client.clone(),
        locals,
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo")
            .timeout(Duration::from_secs(2))
            .enable_local_service(true)
            .condition("boolfalse"),
    );

    // No provider exists anywhere; the local implementation answers.
    let answer: String = surface.call("say", vec![json!("ignored")]).await;
    assert_eq!(answer, "from local");

    client.close().await;
}

#[tokio::test]
async fn true_condition_prefers_remote_over_local() {
    let registry = spawn_registry().await;
    let provider = spawn_provider(&registry).await;
    let client = consumer(&registry).await;

    let locals = Arc::new(LocalServiceRegistry::new());
    locals.register_local(
        "Echo",
        "1.0.0",
        "",
        Arc::new(|_: &str, _: &[Value]| Ok(json!("from local"))),
    );

    let surface = ServiceClient::new(
        client.clone(),
        locals,
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo")
            .timeout(Duration::from_secs(2))
            .enable_local_service(true)
            .condition("booltrue"),
    );

    let answer: String = surface.call("say", vec![json!("from remote")]).await;
    assert_eq!(answer, "from remote");

    provider.shutdown().await;
    client.close().await;
}

#[tokio::test]
async fn remote_failure_falls_back_to_registered_fallback() {
    let registry = spawn_registry().await;
    let provider = spawn_provider(&registry).await;
    let client = consumer(&registry).await;

    let locals = Arc::new(LocalServiceRegistry::new());
    locals.register_fallback(
        "Echo",
        Arc::new(|_: &str, _: &[Value]| Ok(json!("from fallback"))),
    );

    let surface = ServiceClient::new(
        client.clone(),
        locals,
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo")
            .timeout(Duration::from_secs(2))
            .enable_local_service(true),
    );

    // The provider's handler fails this method; the fallback answers.
    let answer: String = surface.call("explode", vec![]).await;
    assert_eq!(answer, "from fallback");

    provider.shutdown().await;
    client.close().await;
}

#[tokio::test]
async fn zero_default_answers_when_nothing_is_registered() {
    let registry = spawn_registry().await;
    let client = consumer(&registry).await;

    let surface = ServiceClient::new(
        client.clone(),
        Arc::new(LocalServiceRegistry::new()),
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo")
            .timeout(Duration::from_secs(2))
            .enable_local_service(true),
    );

    // No provider, no local, no fallback: the zero default's null converts
    // to the type-appropriate zero.
    let zero: i32 = surface.call("say", vec![]).await;
    assert_eq!(zero, 0);
    let nothing: Value = surface.call("say", vec![]).await;
    assert_eq!(nothing, Value::Null);

    client.close().await;
}

#[tokio::test]
async fn error_propagating_surface_raises_instead_of_degrading() {
    let registry = spawn_registry().await;
    let client = consumer(&registry).await;

    let surface = ServiceClient::new(
        client.clone(),
        Arc::new(LocalServiceRegistry::new()),
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo").timeout(Duration::from_secs(2)),
    );

    let err = surface.call_future("say", vec![json!(1)]).await.unwrap_err();
    assert!(matches!(err, RpcError::ServiceNotFound(_)));

    client.close().await;
}

#[tokio::test]
async fn random_balance_spreads_calls_across_providers() {
    let registry = spawn_registry().await;

    // Two providers answer with their own marker; over enough calls the
    // uniform-random pick must reach both.
    async fn marked_provider(registry: &RunningRegistry, marker: &'static str) -> RunningProvider {
        let mut provider = ProviderServer::new(registry.addr.to_string(), "127.0.0.1", 0)
            .registry_options(fast_client_options());
        provider.register_service(
            ServiceDescriptor::new("Echo"),
            Arc::new(move |_: &str, _: &[Value]| Ok(json!(marker))),
        );
        provider.start().await.unwrap()
    }

    let provider_a = marked_provider(&registry, "a").await;
    let provider_b = marked_provider(&registry, "b").await;

    let client = consumer(&registry).await;
    let mut seen_a = 0;
    let mut seen_b = 0;
    for _ in 0..40 {
        let response = client.call(&request(json!("x"))).await.unwrap();
        match response.data.as_str() {
            Some("a") => seen_a += 1,
            Some("b") => seen_b += 1,
            other => panic!("unexpected marker {other:?}"),
        }
    }
    // 40 uniform picks missing one of two providers entirely has
    // probability 2^-39; both must have been hit.
    assert!(seen_a > 0, "provider a never selected");
    assert!(seen_b > 0, "provider b never selected");

    provider_a.shutdown().await;
    provider_b.shutdown().await;
    client.close().await;
}

#[tokio::test]
async fn bootstrap_wires_shared_surfaces() {
    let registry = spawn_registry().await;
    let provider = spawn_provider(&registry).await;

    let bootstrap = RpcBootstrap::connect_with_options(
        registry.addr.to_string(),
        Duration::from_secs(2),
        fast_client_options(),
    )
    .await
    .unwrap();

    // Local registrations made through the bootstrap are visible to every
    // surface it creates.
    bootstrap.locals().register_local(
        "Offline",
        "1.0.0",
        "",
        Arc::new(|_: &str, _: &[Value]| Ok(json!("local answer"))),
    );

    let echo = bootstrap.service(ReferenceConfig::new("Echo").timeout(Duration::from_secs(2)));
    let answer: String = echo.call("say", vec![json!("via bootstrap")]).await;
    assert_eq!(answer, "via bootstrap");

    let offline = bootstrap.service(
        ReferenceConfig::new("Offline")
            .timeout(Duration::from_secs(2))
            .enable_local_service(true)
            .condition("boolfalse"),
    );
    let answer: String = offline.call("anything", vec![]).await;
    assert_eq!(answer, "local answer");

    provider.shutdown().await;
    bootstrap.shutdown().await;
}

#[tokio::test]
async fn remote_error_surfaces_through_call_future() {
    let registry = spawn_registry().await;
    let provider = spawn_provider(&registry).await;
    let client = consumer(&registry).await;

    let surface = ServiceClient::new(
        client.clone(),
        Arc::new(LocalServiceRegistry::new()),
        Arc::new(ConditionEvaluator::new()),
        ReferenceConfig::new("Echo").timeout(Duration::from_secs(2)),
    );

    let err = surface.call_future("explode", vec![]).await.unwrap_err();
    match err {
        RpcError::Remote(message) => assert!(message.contains("provider exploded")),
        other => panic!("expected Remote, got {other}"),
    }

    provider.shutdown().await;
    client.close().await;
}
