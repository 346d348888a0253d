mod builder;

pub(crate) mod connector;

pub use self::builder::ClientBuilder;

use crate::{
    api_error::RatelimitedApiError,
    error::{Error, ErrorType, ProtocolViolation, Result},
    json,
    request::{Request, RequestAuth},
    strategy::TokenStrategy,
    transport::Transport,
};
use eventide_http_ratelimiting::{
    headers::{Present, RatelimitScope},
    Backoff, BucketManager, CompiledRoute, Method, RatelimitHeaders,
};
use hyper::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    Body, Request as HyperRequest, StatusCode,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::time::{self, Duration, Instant};

/// Content type of JSON bodies.
const APPLICATION_JSON: &str = "application/json";

/// Header carrying the percent-encoded audit log reason.
const X_AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Statuses recovered from with backoff while the retry budget lasts.
const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Cap on immediate retries of user-scoped 429s, which recur while another
/// client shares the token.
const MAX_ANOMALY_RETRIES: u8 = 3;

/// User agent sent with every request.
const USER_AGENT_VALUE: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_REPOSITORY"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ") Eventide-rs",
);

#[derive(Debug)]
struct State {
    backoff: Backoff,
    base_url: Box<str>,
    bucket_manager: BucketManager,
    max_retries: u8,
    request_counter: AtomicU64,
    timeout: Duration,
    token: Option<Box<str>>,
    token_strategy: Option<Box<dyn TokenStrategy>>,
    transport: Box<dyn Transport>,
}

impl Drop for State {
    fn drop(&mut self) {
        // Cancels queued acquisitions and the garbage collector.
        let _ = self.bucket_manager.close();
    }
}

/// Parts of a successful response.
#[derive(Debug)]
pub struct RawResponse {
    /// Status code of the response.
    pub status: StatusCode,
    /// Headers of the response.
    pub headers: HeaderMap,
    /// Raw body of the response.
    pub body: Vec<u8>,
}

/// The REST API client.
///
/// The client owns the rate limiting state for its token: every request
/// acquires the right bucket (and the global limiter) before any I/O
/// happens, and feeds the response's rate limit headers back afterwards.
/// 429 responses are waited out and retried, transient 5xx statuses and
/// connection failures are retried with capped exponential backoff, and when
/// a [`TokenStrategy`] is configured an unauthorized response triggers one
/// re-authentication per call.
///
/// # Cloning
///
/// The client wraps its state in an `Arc`, so it can be cloned and passed
/// around tasks cheaply. All clones share rate limit state.
///
/// # Examples
///
/// ```rust,no_run
/// use eventide_http::Client;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let client = Client::new("my token".to_owned());
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    state: Arc<State>,
}

impl Client {
    /// Create a new client with a token and default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(token: String) -> Self {
        ClientBuilder::default().token(token).build()
    }

    /// Create a new builder to configure a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Immutable reference to the configured token, if any.
    ///
    /// If the initial token was not prefixed with its scheme, it is here.
    pub fn token(&self) -> Option<&str> {
        self.state.token.as_deref()
    }

    /// The rate limiter used by the client.
    pub fn ratelimiter(&self) -> &BucketManager {
        &self.state.bucket_manager
    }

    /// Perform a request, deserializing the JSON response.
    ///
    /// Returns `None` for a 204 response.
    ///
    /// # Errors
    ///
    /// Same as [`request_raw`], plus an error of type [`Parsing`] if
    /// deserializing the body fails.
    ///
    /// [`Parsing`]: ErrorType::Parsing
    /// [`request_raw`]: Self::request_raw
    pub async fn request<T: DeserializeOwned>(&self, request: Request) -> Result<Option<T>> {
        let response = self.request_raw(request).await?;

        if response.status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        json::from_bytes(&response.body)
            .map(Some)
            .map_err(|source| Error {
                kind: ErrorType::Parsing {
                    body: response.body,
                },
                source: Some(Box::new(source)),
            })
    }

    /// Perform a request, returning the raw parts of the successful
    /// response.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`Response`] for a status that is neither a
    /// success nor recovered from; of type [`RatelimitTooLong`] when a
    /// predicted or reported rate limit exceeds the configured ceiling; of
    /// type [`RequestError`] or [`RequestTimedOut`] once connection failures
    /// or timeouts exhaust the retry budget; and of type [`Protocol`] when
    /// the response shape violates expectations.
    ///
    /// [`Protocol`]: ErrorType::Protocol
    /// [`RatelimitTooLong`]: ErrorType::RatelimitTooLong
    /// [`RequestError`]: ErrorType::RequestError
    /// [`RequestTimedOut`]: ErrorType::RequestTimedOut
    /// [`Response`]: ErrorType::Response
    #[allow(clippy::too_many_lines)]
    pub async fn request_raw(&self, request: Request) -> Result<RawResponse> {
        let Request {
            auth: auth_source,
            mut form,
            json: json_body,
            reason,
            route,
        } = request;

        let mut base_headers = HeaderMap::new();
        base_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        if let Some(reason) = reason {
            let encoded = utf8_percent_encode(&reason, NON_ALPHANUMERIC).to_string();
            let value = HeaderValue::from_str(&encoded).map_err(|source| Error {
                kind: ErrorType::CreatingHeader {
                    name: X_AUDIT_LOG_REASON.to_owned(),
                },
                source: Some(Box::new(source)),
            })?;

            base_headers.insert(X_AUDIT_LOG_REASON, value);
        }

        let mut can_re_auth = false;
        let mut auth = match auth_source {
            RequestAuth::Token(token) => Some(token),
            RequestAuth::Skip => None,
            RequestAuth::Inherit => match &self.state.token_strategy {
                Some(strategy) => {
                    can_re_auth = true;

                    Some(strategy.acquire(self).await?)
                }
                None => self.state.token.as_deref().map(str::to_owned),
            },
        };

        let url = format!("{}{}", self.state.base_url, route.path());

        // Initiated the first time something has to be retried, to save a
        // little memory when nothing goes wrong.
        let mut backoff: Option<Backoff> = None;
        let mut retry_count: u8 = 0;
        let mut anomaly_retries: u8 = 0;

        loop {
            let lease = if route.has_ratelimits() {
                let bucket = self
                    .state
                    .bucket_manager
                    .acquire_bucket(&route, auth.as_deref())
                    .map_err(Error::from_ratelimit)?;

                Some(bucket.acquire().await.map_err(Error::from_ratelimit)?)
            } else {
                self.state
                    .bucket_manager
                    .acquire_global()
                    .await
                    .map_err(Error::from_ratelimit)?;

                None
            };

            let mut builder = HyperRequest::builder()
                .method(hyper_method(route.method()))
                .uri(url.as_str());

            // A deferred body is built inside the acquisition scope, so its
            // inputs are not consumed before the request can actually go out.
            let body = if let Some(form) = form.as_mut() {
                let (content_type, bytes) = form.build().map_err(|source| Error {
                    kind: ErrorType::BuildingRequest,
                    source: Some(source),
                })?;

                if let Some(headers) = builder.headers_mut() {
                    if let Ok(value) = HeaderValue::try_from(content_type) {
                        headers.insert(CONTENT_TYPE, value);
                    }

                    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                }

                Body::from(bytes)
            } else if let Some(bytes) = &json_body {
                if let Some(headers) = builder.headers_mut() {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                }

                Body::from(bytes.clone())
            } else {
                if matches!(route.method(), Method::Patch | Method::Post | Method::Put) {
                    if let Some(headers) = builder.headers_mut() {
                        headers.insert(CONTENT_LENGTH, HeaderValue::from(0_usize));
                    }
                }

                Body::empty()
            };

            if let Some(headers) = builder.headers_mut() {
                for (name, value) in &base_headers {
                    headers.insert(name, value.clone());
                }

                if let Some(auth) = &auth {
                    let value = HeaderValue::from_str(auth).map_err(|source| {
                        #[allow(clippy::borrow_interior_mutable_const)]
                        let name = AUTHORIZATION.to_string();

                        Error {
                            kind: ErrorType::CreatingHeader { name },
                            source: Some(Box::new(source)),
                        }
                    })?;

                    headers.insert(AUTHORIZATION, value);
                }
            }

            let req = builder.body(body).map_err(|source| Error {
                kind: ErrorType::BuildingRequest,
                source: Some(Box::new(source)),
            })?;

            let request_id = self.state.request_counter.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(id = request_id, method = %route.method(), %url, "sending request");
            let start = Instant::now();

            let result = time::timeout(self.state.timeout, self.state.transport.send(req)).await;

            let response = match result {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => {
                    drop(lease);

                    if retry_count >= self.state.max_retries {
                        return Err(Error {
                            kind: ErrorType::RequestError,
                            source: Some(source),
                        });
                    }

                    let wait = self.next_backoff(&mut backoff);
                    retry_count += 1;
                    tracing::warn!(
                        id = request_id,
                        seconds = wait.as_secs_f64(),
                        remaining = self.state.max_retries - retry_count,
                        "connection error, backing off and retrying",
                    );

                    time::sleep(wait).await;

                    continue;
                }
                Err(_) => {
                    drop(lease);

                    if retry_count >= self.state.max_retries {
                        return Err(Error {
                            kind: ErrorType::RequestTimedOut,
                            source: None,
                        });
                    }

                    let wait = self.next_backoff(&mut backoff);
                    retry_count += 1;
                    tracing::warn!(
                        id = request_id,
                        seconds = wait.as_secs_f64(),
                        remaining = self.state.max_retries - retry_count,
                        "request timed out, backing off and retrying",
                    );

                    time::sleep(wait).await;

                    continue;
                }
            };

            let (parts, response_body) = response.into_parts();
            let status = parts.status;
            let bytes = hyper::body::to_bytes(response_body)
                .await
                .map_err(|source| Error {
                    kind: ErrorType::ChunkingResponse,
                    source: Some(Box::new(source)),
                })?;

            tracing::trace!(
                id = request_id,
                status = status.as_u16(),
                elapsed = ?start.elapsed(),
                "received response",
            );

            // Keep the bucket lease through header ingestion, so an unknown
            // bucket is resolved before the next probe may start.
            let retry_in = self.parse_ratelimits(
                &route,
                auth.as_deref(),
                status,
                &parts.headers,
                &bytes,
                &url,
                &mut anomaly_retries,
            )?;

            drop(lease);

            if let Some(wait) = retry_in {
                if !wait.is_zero() {
                    time::sleep(wait).await;
                }

                continue;
            }

            if status.is_success() {
                if status != StatusCode::NO_CONTENT && !is_json(&parts.headers) {
                    return Err(Error {
                        kind: ErrorType::Protocol {
                            url,
                            violation: ProtocolViolation::NotJson {
                                content_type: content_type(&parts.headers),
                            },
                        },
                        source: None,
                    });
                }

                return Ok(RawResponse {
                    status,
                    headers: parts.headers,
                    body: bytes.to_vec(),
                });
            }

            if RETRY_STATUSES.contains(&status) && retry_count < self.state.max_retries {
                let wait = self.next_backoff(&mut backoff);
                retry_count += 1;
                tracing::warn!(
                    id = request_id,
                    status = status.as_u16(),
                    seconds = wait.as_secs_f64(),
                    remaining = self.state.max_retries - retry_count,
                    "retryable status, backing off and retrying",
                );

                time::sleep(wait).await;

                continue;
            }

            if status == StatusCode::UNAUTHORIZED && can_re_auth {
                if let Some(strategy) = &self.state.token_strategy {
                    if let Some(token) = auth.as_deref() {
                        strategy.invalidate(token);
                    }

                    auth = Some(strategy.acquire(self).await?);
                    can_re_auth = false;

                    continue;
                }
            }

            return Err(Error {
                kind: ErrorType::Response {
                    body: bytes.to_vec(),
                    headers: parts.headers,
                    status,
                    url,
                },
                source: None,
            });
        }
    }

    /// Ingest a response's rate limit headers and decide whether the request
    /// must be retried because of a 429.
    ///
    /// Returns how long to sleep before retrying, or `None` when the
    /// response needs no rate limit retry.
    #[allow(clippy::too_many_arguments)]
    fn parse_ratelimits(
        &self,
        route: &CompiledRoute,
        authentication: Option<&str>,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
        url: &str,
        anomaly_retries: &mut u8,
    ) -> Result<Option<Duration>> {
        let parsed = RatelimitHeaders::from_pairs(
            headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_bytes())),
        );

        let present = match parsed {
            Ok(RatelimitHeaders::Present(present)) => Some(present),
            Ok(RatelimitHeaders::None) => None,
            Ok(_) => None,
            Err(source) => {
                tracing::warn!(%url, "failed to parse rate limit headers: {}", source);

                None
            }
        };

        if let Some(present) = &present {
            if let Some(bucket) = present.bucket() {
                if !route.has_ratelimits() {
                    tracing::error!(
                        route = %route,
                        "received a bucket header on a route not declared rate limited; \
                         treating the route as rate limited from now on",
                    );

                    route.template().mark_ratelimited();
                }

                self.state
                    .bucket_manager
                    .update_rate_limits(
                        route,
                        authentication,
                        bucket,
                        present.remaining(),
                        present.limit(),
                        present.reset(),
                        present.reset_after(),
                    )
                    .map_err(Error::from_ratelimit)?;
            }
        }

        if status != StatusCode::TOO_MANY_REQUESTS {
            return Ok(None);
        }

        let scope = present.as_ref().map_or(RatelimitScope::Route, Present::scope);
        let remaining = present.as_ref().map_or(1, Present::remaining);

        if scope == RatelimitScope::User && remaining == 0 {
            // The window was spent by another client sharing this token;
            // re-acquiring the bucket serializes the retry.
            if *anomaly_retries < MAX_ANOMALY_RETRIES {
                *anomaly_retries += 1;
                tracing::warn!(
                    route = %route,
                    "user-scoped 429, the token may be shared with another client; retrying",
                );

                return Ok(Some(Duration::ZERO));
            }

            tracing::warn!(
                route = %route,
                "user-scoped 429 persisted through {} retries, giving up",
                MAX_ANOMALY_RETRIES,
            );

            return Err(Error {
                kind: ErrorType::Response {
                    body: body.to_vec(),
                    headers: headers.clone(),
                    status,
                    url: url.to_owned(),
                },
                source: None,
            });
        }

        if !is_json(headers) {
            return Err(Error {
                kind: ErrorType::Protocol {
                    url: url.to_owned(),
                    violation: ProtocolViolation::NotJson {
                        content_type: content_type(headers),
                    },
                },
                source: None,
            });
        }

        let api_error: RatelimitedApiError = match json::from_bytes(body) {
            Ok(api_error) => api_error,
            Err(source) => {
                return Err(Error {
                    kind: ErrorType::Protocol {
                        url: url.to_owned(),
                        violation: ProtocolViolation::MissingRetryAfter,
                    },
                    source: Some(Box::new(source)),
                });
            }
        };

        let retry_after = duration_from_secs(api_error.retry_after);

        if api_error.global {
            tracing::error!(
                reason = %api_error.message,
                seconds = retry_after.as_secs_f64(),
                "rate limited on the global bucket; backing off and retrying",
            );

            self.state.bucket_manager.throttle(retry_after);

            // The retry stalls on the global limiter while acquiring.
            return Ok(Some(Duration::ZERO));
        }

        tracing::warn!(
            route = %route,
            scope = %scope,
            reason = %api_error.message,
            seconds = retry_after.as_secs_f64(),
            "rate limited on a sub-bucket; backing off and retrying",
        );

        if retry_after > self.state.bucket_manager.max_rate_limit() {
            return Err(Error {
                kind: ErrorType::RatelimitTooLong {
                    global: false,
                    retry_after,
                },
                source: None,
            });
        }

        Ok(Some(retry_after))
    }

    /// Next backoff sleep, constructing the sequence on first use.
    fn next_backoff(&self, backoff: &mut Option<Backoff>) -> Duration {
        let sequence = backoff.get_or_insert_with(|| self.state.backoff.clone());

        duration_from_secs(sequence.next().unwrap_or_default())
    }
}

const fn hyper_method(method: Method) -> hyper::Method {
    match method {
        Method::Delete => hyper::Method::DELETE,
        Method::Get => hyper::Method::GET,
        Method::Patch => hyper::Method::PATCH,
        Method::Post => hyper::Method::POST,
        Method::Put => hyper::Method::PUT,
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn is_json(headers: &HeaderMap) -> bool {
    content_type(headers).map_or(false, |content_type| {
        content_type
            .split(';')
            .next()
            .map_or(false, |mime| mime.trim() == APPLICATION_JSON)
    })
}

/// Clamp a possibly negative or non-finite seconds value into a [`Duration`].
fn duration_from_secs(seconds: f64) -> Duration {
    if seconds > 0.0 && seconds.is_finite() {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::{Client, RawResponse};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Client: Clone, Debug, Send, Sync);
    assert_impl_all!(RawResponse: Debug, Send, Sync);
}
