//! Admission endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use crate::error::{Result, WindowgateError};
use crate::ratelimit::RateLimiter;

/// Identity used when neither the header nor the peer address is available.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Shared state of the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    limiter: Arc<RateLimiter>,
    identity_header: HeaderName,
}

impl AppState {
    /// Create the state, reading client identities from `identity_header`.
    pub fn new(limiter: Arc<RateLimiter>, identity_header: &str) -> Result<Self> {
        let identity_header = HeaderName::from_bytes(identity_header.trim().as_bytes())
            .map_err(|e| {
                WindowgateError::Config(format!(
                    "invalid identity header {:?}: {}",
                    identity_header, e
                ))
            })?;
        Ok(Self {
            limiter,
            identity_header,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Build the router. Every path and method goes through admission.
pub fn router(state: AppState) -> Router {
    with_layers(Router::new().fallback(admit)).with_state(state)
}

/// Panic isolation and request tracing shared by every route.
fn with_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Pick the client identity for a request.
///
/// The configured header wins; for a comma-separated proxy chain the first
/// element is the client. Falls back to the peer IP.
fn extract_identity(req: &Request, header: &HeaderName) -> String {
    let from_header = req
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(identity) = from_header {
        return identity.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

#[instrument(skip_all, fields(method = %req.method(), path = %req.uri().path()))]
async fn admit(State(state): State<AppState>, req: Request) -> Response {
    let identity = extract_identity(&req, &state.identity_header);
    let outcome = state.limiter.hit(&identity);

    debug!(
        identity = %identity,
        global_hits = outcome.global_hits,
        identity_hits = outcome.identity_hits,
        rejected = outcome.rejected,
        "Admission decision made"
    );

    let status = if outcome.rejected {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::OK
    };
    let body = format!(
        "global={} identity={} rejected={}",
        outcome.global_hits, outcome.identity_hits, outcome.rejected
    );
    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::ratelimit::{LimiterSettings, GLOBAL_KEY};
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    fn test_state(allowed_rate: i64) -> AppState {
        let settings = LimiterSettings {
            allowed_rate,
            ..LimiterSettings::default()
        };
        let limiter =
            RateLimiter::new(settings, Arc::new(MemoryPersistence::new())).unwrap();
        AppState::new(Arc::new(limiter), "X-Forwarded-For").unwrap()
    }

    async fn send(app: Router, req: axum::http::Request<Body>) -> (StatusCode, String) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn request_from(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_invalid_identity_header_rejected() {
        let limiter = RateLimiter::new(
            LimiterSettings::default(),
            Arc::new(MemoryPersistence::new()),
        )
        .unwrap();
        let result = AppState::new(Arc::new(limiter), "bad header");
        assert!(matches!(result, Err(WindowgateError::Config(_))));
    }

    #[test]
    fn test_identity_from_header_takes_first_hop() {
        let header = HeaderName::from_static("x-forwarded-for");
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", " 10.0.0.1 , 172.16.0.9")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_identity(&req, &header), "10.0.0.1");
    }

    #[test]
    fn test_identity_falls_back_to_peer_address() {
        let header = HeaderName::from_static("x-forwarded-for");
        let mut req = axum::http::Request::builder()
            .header("x-forwarded-for", "")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 40000))));

        assert_eq!(extract_identity(&req, &header), "192.168.1.7");
    }

    #[test]
    fn test_identity_unknown_without_header_or_peer() {
        let header = HeaderName::from_static("x-real-ip");
        let req = axum::http::Request::builder().body(Body::empty()).unwrap();

        assert_eq!(extract_identity(&req, &header), UNKNOWN_IDENTITY);
    }

    #[tokio::test]
    async fn test_admitted_request_returns_ok() {
        let state = test_state(15);
        let (status, body) = send(router(state), request_from("10.0.0.1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "global=1 identity=1 rejected=false");
    }

    #[tokio::test]
    async fn test_rejected_request_returns_too_many_requests() {
        let state = test_state(2);

        for _ in 0..2 {
            let (status, _) = send(router(state.clone()), request_from("10.0.0.1")).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(router(state.clone()), request_from("10.0.0.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, "global=3 identity=2 rejected=true");

        // Another client is unaffected.
        let (status, body) = send(router(state), request_from("10.0.0.2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "global=4 identity=1 rejected=false");
    }

    #[tokio::test]
    async fn test_any_path_and_method_is_admitted() {
        let state = test_state(15);
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/some/nested/path?q=1")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(router(state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.limiter().count("10.0.0.1"), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_state() {
        let state = test_state(100);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let app = router(state.clone());
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let (status, _) = send(app.clone(), request_from("10.0.0.1")).await;
                    assert_eq!(status, StatusCode::OK);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(state.limiter().count("10.0.0.1"), Some(50));
        assert_eq!(state.limiter().count(GLOBAL_KEY), Some(50));
    }

    async fn exploding_handler() -> StatusCode {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let state = test_state(15);
        let app = with_layers(
            Router::<()>::new().route("/boom", get(exploding_handler)),
        );

        let req = axum::http::Request::builder()
            .uri("/boom")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = send(router(state), request_from("10.0.0.1")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
