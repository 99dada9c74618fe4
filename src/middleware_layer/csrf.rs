use axum::{
    Form,
    body::{Body, Bytes, to_bytes},
    extract::{FromRequest, Request},
    http::{Method, header::CONTENT_TYPE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::{
    error::AppError,
    session::{Session, handle::CSRF_TOKEN},
};

/// Header a script can use to present the token.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Largest body buffered while looking for the token field.
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

#[derive(Deserialize, Default)]
#[serde(default)]
struct TokenField {
    csrf_token: String,
}

fn is_exempt(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Looks for the token in a buffered form body.
async fn form_token(parts: &Parts, body: Bytes) -> Option<String> {
    let mut replica = Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone());
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        replica = replica.header(CONTENT_TYPE, content_type);
    }
    let replica = replica.body(Body::from(body)).ok()?;

    Form::<TokenField>::from_request(replica, &())
        .await
        .ok()
        .map(|Form(field)| field.csrf_token)
        .filter(|token| !token.is_empty())
}

/// Rejects state-changing requests that do not carry the session's token.
///
/// The token is read from the `X-CSRF-Token` header, or failing that from
/// the `csrf_token` field of a form body. The body is handed on to the
/// handler intact.
pub async fn verify_csrf(session: Session, request: Request, next: Next) -> Response {
    if is_exempt(request.method()) {
        tracing::debug!("✅ CSRF exemption: {} request", request.method());
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();

    let header_token = parts
        .headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (presented, body) = match header_token {
        Some(token) => (Some(token), body),
        None => {
            let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("❌ CSRF: could not buffer request body: {}", e);
                    return AppError::BadRequest("Request body too large or unreadable".into())
                        .into_response();
                }
            };
            (form_token(&parts, bytes.clone()).await, Body::from(bytes))
        }
    };

    let expected = session.get(CSRF_TOKEN);
    let valid = match (&presented, &expected) {
        (Some(presented), Some(expected)) => {
            bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
        }
        _ => false,
    };

    if !valid {
        return AppError::ForgeryToken.into_response();
    }

    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods_are_exempt() {
        assert!(is_exempt(&Method::GET));
        assert!(is_exempt(&Method::HEAD));
        assert!(is_exempt(&Method::OPTIONS));
        assert!(!is_exempt(&Method::POST));
        assert!(!is_exempt(&Method::DELETE));
    }

    #[tokio::test]
    async fn token_is_found_in_form_body() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/snippet/create")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(())
            .unwrap()
            .into_parts();

        let found = form_token(&parts, Bytes::from_static(b"title=a&csrf_token=abc123")).await;
        assert_eq!(found.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn non_form_body_has_no_token() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/snippet/create")
            .header(CONTENT_TYPE, "text/plain")
            .body(())
            .unwrap()
            .into_parts();

        assert_eq!(form_token(&parts, Bytes::from_static(b"csrf_token=abc")).await, None);
    }
}
