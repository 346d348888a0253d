use eventide_http::{
    error::{ErrorType, ProtocolViolation},
    request::Request,
    routing,
    strategy::{AcquireTokenFuture, TokenStrategy, TokenType},
    transport::{SendFuture, Transport},
    Client,
};
use eventide_http_ratelimiting::{CompiledRoute, Method, RouteTemplate};
use hyper::{header::AUTHORIZATION, Body, Response};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::time::{Duration, Instant};

const TOKEN: &str = "Bot test-token";

#[derive(Debug)]
enum Scripted {
    ConnectionError,
    Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: &'static str,
    },
}

#[derive(Debug)]
struct Script {
    responses: Mutex<Vec<Scripted>>,
    auth_seen: Mutex<Vec<Option<String>>>,
    hits: AtomicUsize,
}

impl Script {
    fn new(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            auth_seen: Mutex::new(Vec::new()),
            hits: AtomicUsize::new(0),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct ScriptedTransport(Arc<Script>);

impl Transport for ScriptedTransport {
    fn send(&self, request: hyper::Request<Body>) -> SendFuture {
        self.0.hits.fetch_add(1, Ordering::Relaxed);
        self.0.auth_seen.lock().unwrap().push(
            request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        );

        let next = {
            let mut responses = self.0.responses.lock().unwrap();
            assert!(!responses.is_empty(), "transport script exhausted");

            responses.remove(0)
        };

        Box::pin(async move {
            match next {
                Scripted::ConnectionError => Err("connection reset by peer".into()),
                Scripted::Reply {
                    status,
                    headers,
                    body,
                } => {
                    let mut builder = Response::builder().status(status);

                    for (name, value) in headers {
                        builder = builder.header(name, value);
                    }

                    Ok(builder.body(Body::from(body)).unwrap())
                }
            }
        })
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn ratelimit_headers(remaining: u64, limit: u64, reset_after: f64) -> Vec<(&'static str, String)> {
    vec![
        ("x-ratelimit-bucket", "a1b2c3".to_owned()),
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", remaining.to_string()),
        ("x-ratelimit-reset", (epoch_now() + reset_after).to_string()),
        ("x-ratelimit-reset-after", reset_after.to_string()),
    ]
}

fn ok_json(body: &'static str) -> Scripted {
    let mut headers = vec![("content-type", "application/json".to_owned())];
    headers.extend(ratelimit_headers(4, 5, 1.0));

    Scripted::Reply {
        status: 200,
        headers,
        body,
    }
}

fn status_reply(status: u16) -> Scripted {
    Scripted::Reply {
        status,
        headers: Vec::new(),
        body: "",
    }
}

fn message_route() -> CompiledRoute {
    routing::CHANNEL_MESSAGES.compile(Method::Post, &[("channel_id", "123")])
}

fn client_for(script: &Arc<Script>) -> Client {
    Client::builder()
        .token("test-token".to_owned())
        .backoff(2.0, 16.0, 0.0)
        .transport(Box::new(ScriptedTransport(Arc::clone(script))))
        .build()
}

#[tokio::test(start_paused = true)]
async fn json_response_is_decoded() {
    let script = Script::new(vec![ok_json(r#"{"id":"1"}"#)]);
    let client = client_for(&script);

    let request = Request::builder(message_route())
        .json(br#"{"content":"ping"}"#.to_vec())
        .build();
    let message: Option<serde_json::Value> = client.request(request).await.unwrap();

    assert_eq!("1", message.unwrap()["id"]);
    assert_eq!(1, script.hits());
    assert_eq!(vec![Some(TOKEN.to_owned())], *script.auth_seen.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn no_content_returns_none() {
    let script = Script::new(vec![Scripted::Reply {
        status: 204,
        headers: ratelimit_headers(4, 5, 1.0),
        body: "",
    }]);
    let client = client_for(&script);

    let request = Request::builder(message_route()).build();
    let message: Option<serde_json::Value> = client.request(request).await.unwrap();

    assert!(message.is_none());
}

#[tokio::test(start_paused = true)]
async fn non_json_success_is_a_protocol_error() {
    let script = Script::new(vec![Scripted::Reply {
        status: 200,
        headers: vec![("content-type", "text/html".to_owned())],
        body: "<html></html>",
    }]);
    let client = client_for(&script);

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind(),
        ErrorType::Protocol {
            violation: ProtocolViolation::NotJson { .. },
            ..
        },
    ));
}

#[tokio::test(start_paused = true)]
async fn global_429_throttles_and_retries_once() {
    let mut headers = vec![("content-type", "application/json".to_owned())];
    headers.extend(ratelimit_headers(0, 5, 1.0));

    let script = Script::new(vec![
        Scripted::Reply {
            status: 429,
            headers,
            body: r#"{"retry_after":2.5,"global":true,"message":"You are being rate limited."}"#,
        },
        ok_json("{}"),
    ]);
    let client = client_for(&script);

    let now = Instant::now();
    let request = Request::builder(message_route()).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert_eq!(2, script.hits());
    assert!(
        now.elapsed() >= Duration::from_millis(2500),
        "retry did not wait out the global throttle",
    );
}

#[tokio::test(start_paused = true)]
async fn route_429_sleeps_and_retries() {
    let mut headers = vec![("content-type", "application/json".to_owned())];
    headers.extend(ratelimit_headers(1, 5, 1.0));

    let script = Script::new(vec![
        Scripted::Reply {
            status: 429,
            headers,
            body: r#"{"retry_after":0.3,"global":false}"#,
        },
        ok_json("{}"),
    ]);
    let client = client_for(&script);

    let now = Instant::now();
    let request = Request::builder(message_route()).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert_eq!(2, script.hits());
    assert!(now.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn user_scoped_429_retries_through_the_bucket() {
    let mut headers = vec![
        ("content-type", "application/json".to_owned()),
        ("x-ratelimit-scope", "user".to_owned()),
    ];
    headers.extend(ratelimit_headers(0, 5, 1.0));

    let script = Script::new(vec![
        Scripted::Reply {
            status: 429,
            headers,
            body: r#"{"retry_after":0.3,"global":false}"#,
        },
        ok_json("{}"),
    ]);
    let client = client_for(&script);

    let now = Instant::now();
    let request = Request::builder(message_route()).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert_eq!(2, script.hits());
    assert!(
        now.elapsed() < Duration::from_secs(1),
        "anomaly retry should only wait for the window",
    );
}

#[tokio::test(start_paused = true)]
async fn too_long_429_surfaces() {
    let mut headers = vec![("content-type", "application/json".to_owned())];
    headers.extend(ratelimit_headers(0, 5, 1.0));

    let script = Script::new(vec![Scripted::Reply {
        status: 429,
        headers,
        body: r#"{"retry_after":10.0,"global":false}"#,
    }]);
    let client = Client::builder()
        .token("test-token".to_owned())
        .max_rate_limit(Duration::from_secs(5))
        .transport(Box::new(ScriptedTransport(Arc::clone(&script))))
        .build();

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind(),
        ErrorType::RatelimitTooLong { global: false, .. },
    ));
    assert_eq!(1, script.hits());
}

#[tokio::test(start_paused = true)]
async fn missing_retry_after_is_a_protocol_error() {
    let script = Script::new(vec![Scripted::Reply {
        status: 429,
        headers: vec![("content-type", "application/json".to_owned())],
        body: r#"{"message":"no retry_after here"}"#,
    }]);
    let client = client_for(&script);

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind(),
        ErrorType::Protocol {
            violation: ProtocolViolation::MissingRetryAfter,
            ..
        },
    ));
}

#[tokio::test(start_paused = true)]
async fn retryable_statuses_exhaust_the_budget() {
    let script = Script::new(vec![
        status_reply(503),
        status_reply(503),
        status_reply(503),
        status_reply(503),
    ]);
    let client = client_for(&script);

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind(),
        ErrorType::Response { status, .. } if status.as_u16() == 503,
    ));
    assert_eq!(4, script.hits(), "three retries means four attempts");
}

#[tokio::test(start_paused = true)]
async fn larger_budget_allows_one_more_attempt() {
    let script = Script::new(vec![
        status_reply(503),
        status_reply(503),
        status_reply(503),
        status_reply(503),
        status_reply(503),
    ]);
    let client = Client::builder()
        .token("test-token".to_owned())
        .backoff(2.0, 16.0, 0.0)
        .max_retries(4)
        .transport(Box::new(ScriptedTransport(Arc::clone(&script))))
        .build();

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(error.kind(), ErrorType::Response { .. }));
    assert_eq!(5, script.hits());
}

#[tokio::test(start_paused = true)]
async fn connection_errors_are_retried_with_backoff() {
    let script = Script::new(vec![Scripted::ConnectionError, ok_json("{}")]);
    let client = client_for(&script);

    let now = Instant::now();
    let request = Request::builder(message_route()).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert_eq!(2, script.hits());
    assert!(
        now.elapsed() >= Duration::from_secs(1),
        "first backoff sleep should be base^0 = 1s",
    );
}

#[tokio::test(start_paused = true)]
async fn connection_errors_exhaust_the_budget() {
    let script = Script::new(vec![Scripted::ConnectionError]);
    let client = Client::builder()
        .token("test-token".to_owned())
        .max_retries(0)
        .transport(Box::new(ScriptedTransport(Arc::clone(&script))))
        .build();

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(error.kind(), ErrorType::RequestError));
    assert_eq!(1, script.hits());
}

#[derive(Debug)]
struct Rotation {
    tokens: Mutex<Vec<&'static str>>,
    invalidated: Mutex<Vec<String>>,
}

#[derive(Debug)]
struct RotatingStrategy(Arc<Rotation>);

impl TokenStrategy for RotatingStrategy {
    fn token_type(&self) -> TokenType {
        TokenType::Bearer
    }

    fn acquire<'a>(&'a self, _: &'a Client) -> AcquireTokenFuture<'a> {
        Box::pin(async move {
            let token = self.0.tokens.lock().unwrap().remove(0);

            Ok(format!("Bearer {}", token))
        })
    }

    fn invalidate(&self, token: &str) {
        self.0.invalidated.lock().unwrap().push(token.to_owned());
    }
}

fn rotation(tokens: Vec<&'static str>) -> Arc<Rotation> {
    Arc::new(Rotation {
        tokens: Mutex::new(tokens),
        invalidated: Mutex::new(Vec::new()),
    })
}

#[tokio::test(start_paused = true)]
async fn unauthorized_re_authenticates_once() {
    let script = Script::new(vec![status_reply(401), ok_json("{}")]);
    let tokens = rotation(vec!["first", "second"]);
    let client = Client::builder()
        .token_strategy(Box::new(RotatingStrategy(Arc::clone(&tokens))))
        .transport(Box::new(ScriptedTransport(Arc::clone(&script))))
        .build();

    let request = Request::builder(message_route()).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert_eq!(
        vec![Some("Bearer first".to_owned()), Some("Bearer second".to_owned())],
        *script.auth_seen.lock().unwrap(),
    );
    assert_eq!(vec!["Bearer first".to_owned()], *tokens.invalidated.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn second_unauthorized_surfaces() {
    let script = Script::new(vec![status_reply(401), status_reply(401)]);
    let tokens = rotation(vec!["first", "second"]);
    let client = Client::builder()
        .token_strategy(Box::new(RotatingStrategy(Arc::clone(&tokens))))
        .transport(Box::new(ScriptedTransport(Arc::clone(&script))))
        .build();

    let request = Request::builder(message_route()).build();
    let error = client
        .request::<serde_json::Value>(request)
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind(),
        ErrorType::Response { status, .. } if status.as_u16() == 401,
    ));
    assert_eq!(2, script.hits());
    assert_eq!(1, tokens.invalidated.lock().unwrap().len());
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_calls_resolve_one_bucket() {
    let script = Script::new(vec![ok_json("{}"), ok_json("{}")]);
    let client = client_for(&script);

    let first = {
        let client = client.clone();

        tokio::spawn(async move {
            let request = Request::builder(message_route()).build();

            client.request::<serde_json::Value>(request).await
        })
    };
    let second = {
        let client = client.clone();

        tokio::spawn(async move {
            let request = Request::builder(message_route()).build();

            client.request::<serde_json::Value>(request).await
        })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(2, script.hits());

    let bucket = client
        .ratelimiter()
        .acquire_bucket(&message_route(), Some(TOKEN))
        .unwrap();
    assert!(!bucket.is_unknown(), "the probe response did not resolve the bucket");
    assert!(bucket.name().starts_with("a1b2c3;"));
}

static UNDECLARED: RouteTemplate = RouteTemplate::without_ratelimits("/undeclared", &[]);

#[tokio::test(start_paused = true)]
async fn bucket_header_marks_an_undeclared_route() {
    let script = Script::new(vec![ok_json("{}")]);
    let client = client_for(&script);

    assert!(!UNDECLARED.has_ratelimits());

    let request = Request::builder(UNDECLARED.compile(Method::Get, &[])).build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert!(
        UNDECLARED.has_ratelimits(),
        "an unexpected bucket header should flip the route's flag",
    );
}

#[tokio::test(start_paused = true)]
async fn unlimited_routes_only_pass_the_global_limiter() {
    let script = Script::new(vec![Scripted::Reply {
        status: 200,
        headers: vec![("content-type", "application/json".to_owned())],
        body: r#"{"access_token":"abc"}"#,
    }]);
    let client = client_for(&script);

    client.ratelimiter().throttle(Duration::from_secs(1));

    let now = Instant::now();
    let request = Request::builder(routing::OAUTH2_TOKEN.compile(Method::Post, &[]))
        .unauthenticated()
        .build();
    client
        .request::<serde_json::Value>(request)
        .await
        .unwrap();

    assert!(
        now.elapsed() >= Duration::from_secs(1),
        "the global throttle was not honored",
    );
    assert_eq!(vec![None], *script.auth_seen.lock().unwrap());
}
