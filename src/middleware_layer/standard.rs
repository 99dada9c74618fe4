use std::any::Any;
use std::backtrace::Backtrace;
use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderName, HeaderValue, Request, Response, StatusCode, header},
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

use crate::error::error_body;

/// Headers set on every response, error responses included.
pub const SECURITY_HEADERS: [(HeaderName, &str); 3] = [
    (header::X_FRAME_OPTIONS, "deny"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
];

/// Extracts the peer address recorded by `into_make_service_with_connect_info`.
fn remote_addr<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Span wrapping one request: who asked for what, over which protocol.
fn request_span<B>(request: &Request<B>) -> Span {
    tracing::info_span!(
        "request",
        remote_addr = %remote_addr(request),
        version = ?request.version(),
        method = %request.method(),
        uri = %request.uri(),
    )
}

/// Turns a handler panic into a 500 that closes the connection.
fn recover_panic(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(
        panic = %detail,
        backtrace = %Backtrace::force_capture(),
        "❌ Recovered from a panic while handling a request"
    );

    let mut response = Response::new(Body::from(error_body("Internal server error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;

    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }

    response
}

/// Wraps `router` in the tier every request passes through: panic recovery
/// outermost, then request logging, then security headers.
pub fn standard_tier(router: Router) -> Router {
    let [frame, xss, sniff] = SECURITY_HEADERS;

    router.layer(
        ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(recover_panic))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(request_span::<Body>)
                    .on_request(DefaultOnRequest::default().level(Level::INFO))
                    .on_response(DefaultOnResponse::default().level(Level::INFO))
                    .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
            )
            .layer(SetResponseHeaderLayer::overriding(
                frame.0,
                HeaderValue::from_static(frame.1),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                xss.0,
                HeaderValue::from_static(xss.1),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                sniff.0,
                HeaderValue::from_static(sniff.1),
            )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, routing::get};
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler exploded")
    }

    fn app() -> Router {
        standard_tier(
            Router::new()
                .route("/boom", get(explode))
                .route("/fine", get(|| async { "fine" })),
        )
    }

    #[tokio::test]
    async fn panic_becomes_a_closing_500() {
        let response = app()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "deny");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("exploded"));
    }

    #[tokio::test]
    async fn security_headers_on_normal_responses() {
        let response = app()
            .oneshot(Request::builder().uri("/fine").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "deny");
        assert_eq!(response.headers()[header::X_XSS_PROTECTION], "1; mode=block");
        assert!(response.headers().get(header::CONNECTION).is_none());
    }
}
