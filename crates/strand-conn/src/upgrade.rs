//! Upgrade surface: accept or reject an incoming WebSocket request and hand
//! the accepted connection to the engine.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use serde_json::Value;
use strand_core::codec::{Codec, JsonCodec};

use crate::config::ConnConfig;
use crate::engine::run_connection;
use crate::handler::{ConnHandler, JsonConn};
use crate::transport::WsTransport;

/// Request metadata available before the protocol upgrade.
#[derive(Clone, Debug)]
pub struct UpgradeContext {
    /// Request URI, including path and query.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

impl UpgradeContext {
    /// The `Origin` header, if present and valid UTF-8.
    pub fn origin(&self) -> Option<&str> {
        self.header("origin")
    }

    /// The raw query string.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Any header as a string slice.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// A refused upgrade: status code plus a plain-text body.
#[derive(Clone, Debug)]
pub struct Reject {
    /// HTTP status to answer with.
    pub status: StatusCode,
    /// Response body.
    pub message: String,
}

impl Reject {
    /// 400: the request itself is malformed.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// 403: the caller may not connect.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    /// 500: connection setup failed on our side.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for Reject {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// An accepted upgrade: the handler plus the codec its connection will use.
pub struct Accepted<H: ConnHandler> {
    /// The connection handler.
    pub handler: H,
    /// Codec shared by the reader and writer of this connection.
    pub codec: Arc<dyn Codec<H::In, H::Out>>,
}

impl<H: ConnHandler> std::fmt::Debug for Accepted<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").finish_non_exhaustive()
    }
}

/// Authorizes upgrades and produces configured connections.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Handler type produced on accept.
    type Handler: ConnHandler;

    /// Inspect the request; return the connection to run or a rejection.
    async fn accept(&self, ctx: &UpgradeContext) -> Result<Accepted<Self::Handler>, Reject>;
}

/// Build an axum route that upgrades requests through the given acceptor.
///
/// The origin policy is enforced first (403), then `accept` runs; only a
/// successful accept performs the protocol upgrade. Each connection gets a
/// child of `shutdown` so server shutdown tears down every live connection.
pub fn ws_route<A: Acceptor>(
    acceptor: Arc<A>,
    config: ConnConfig,
    shutdown: CancellationToken,
) -> MethodRouter {
    get(move |ws: WebSocketUpgrade, uri: Uri, headers: HeaderMap| {
        let acceptor = Arc::clone(&acceptor);
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move { handle_upgrade(acceptor, config, shutdown, ws, uri, headers).await }
    })
}

/// The upgrade flow behind [`ws_route`], usable directly from custom axum
/// handlers that extract additional state.
pub async fn handle_upgrade<A: Acceptor>(
    acceptor: Arc<A>,
    config: ConnConfig,
    shutdown: CancellationToken,
    ws: WebSocketUpgrade,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let ctx = UpgradeContext { uri, headers };
    if !config.origin.allows(ctx.origin()) {
        warn!(origin = ctx.origin().unwrap_or("<none>"), "rejecting upgrade, origin not allowed");
        return Reject::forbidden("origin not allowed").into_response();
    }

    let accepted = match acceptor.accept(&ctx).await {
        Ok(accepted) => accepted,
        Err(reject) => {
            warn!(status = %reject.status, message = %reject.message, "upgrade rejected");
            return reject.into_response();
        }
    };

    let conn_shutdown = shutdown.child_token();
    ws.max_message_size(config.max_message_size)
        .write_buffer_size(config.write_buffer_size)
        .on_upgrade(move |socket| {
            run_connection(
                WsTransport::new(socket),
                accepted.handler,
                accepted.codec,
                config,
                conn_shutdown,
            )
        })
}

/// Accepts every request with a dynamic-JSON connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonAcceptor;

#[async_trait]
impl Acceptor for JsonAcceptor {
    type Handler = JsonConn;

    async fn accept(&self, _ctx: &UpgradeContext) -> Result<Accepted<JsonConn>, Reject> {
        let codec: Arc<dyn Codec<Value, Value>> = Arc::new(JsonCodec);
        Ok(Accepted {
            handler: JsonConn::new(),
            codec,
        })
    }
}

/// Convert an HTTP(S) URL to its WebSocket equivalent, stripping any trailing
/// slash. URLs already using `ws:`/`wss:` pass through unchanged.
pub fn normalize_ws_url(url: &str) -> String {
    let url = url.strip_suffix('/').unwrap_or(url);
    if let Some(rest) = url.strip_prefix("http:") {
        return format!("ws:{rest}");
    }
    if let Some(rest) = url.strip_prefix("https:") {
        return format!("wss:{rest}");
    }
    url.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn reject_constructors() {
        assert_eq!(Reject::bad_request("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(Reject::forbidden("x").status, StatusCode::FORBIDDEN);
        assert_eq!(
            Reject::internal("x").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn reject_into_response_carries_status() {
        let resp = Reject::bad_request("bad").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upgrade_context_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://app.example.com".parse().unwrap());
        let ctx = UpgradeContext {
            uri: "/ws?room=42".parse().unwrap(),
            headers,
        };
        assert_eq!(ctx.origin(), Some("https://app.example.com"));
        assert_eq!(ctx.query(), Some("room=42"));
        assert_eq!(ctx.header("missing"), None);
    }

    #[test]
    fn normalize_ws_url_variants() {
        assert_eq!(
            normalize_ws_url("https://example.com/ws/"),
            "wss://example.com/ws"
        );
        assert_eq!(
            normalize_ws_url("http://localhost:8080"),
            "ws://localhost:8080"
        );
        assert_eq!(
            normalize_ws_url("wss://example.com/ws"),
            "wss://example.com/ws"
        );
    }

    #[tokio::test]
    async fn json_acceptor_accepts() {
        let acceptor = JsonAcceptor;
        let ctx = UpgradeContext {
            uri: "/ws".parse().unwrap(),
            headers: HeaderMap::new(),
        };
        let accepted = acceptor.accept(&ctx).await.unwrap();
        assert_eq!(accepted.handler.name(), "json_conn");
    }

    #[tokio::test]
    async fn route_without_upgrade_headers_is_rejected() {
        let router: Router = Router::new().route(
            "/ws",
            ws_route(
                Arc::new(JsonAcceptor),
                ConnConfig::default(),
                CancellationToken::new(),
            ),
        );
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }
}
