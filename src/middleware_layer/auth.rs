use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderValue, Method, Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::AppError,
    models::error::ModelError,
    session::{
        Session,
        handle::{AUTH_USER_ID, REDIRECT_AFTER_LOGIN},
    },
    state::AppState,
};

/// Where unauthenticated visitors are sent.
pub const LOGIN_PATH: &str = "/user/login";

/// The user the gate let through.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: i64,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or_else(|| AppError::Internal("authentication gate is not installed".to_string()))
    }
}

/// A temporary redirect to the login page.
fn to_login() -> Response {
    let mut response = StatusCode::FOUND.into_response();
    response
        .headers_mut()
        .insert(header::LOCATION, HeaderValue::from_static(LOGIN_PATH));
    response
}

/// Sends the request to the login page, remembering where it was headed.
fn deny(session: &Session, request: &Request<Body>) -> Response {
    if request.method() == Method::GET {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| request.uri().path().to_owned());
        session.put(REDIRECT_AFTER_LOGIN, target);
    }
    to_login()
}

/// A middleware that only lets signed-in, active users through.
///
/// Denied requests never reach the handler. Allowed responses are marked
/// `Cache-Control: no-store`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `session` - The request's session.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's `Response`, or a redirect to the login page.
pub async fn require_authentication(
    State(state): State<AppState>,
    session: Session,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user_id) = session.user_id() else {
        tracing::debug!("🔐 No authenticated user, redirecting to login");
        return deny(&session, &request);
    };

    match state.credentials.get(user_id).await {
        Ok(user) if user.active => {}
        Ok(_) | Err(ModelError::NoRecord) => {
            tracing::warn!("❌ Session refers to a missing or inactive user: {}", user_id);
            session.remove(AUTH_USER_ID);
            return deny(&session, &request);
        }
        Err(e) => return AppError::Model(e).into_response(),
    }

    request.extensions_mut().insert(CurrentUser { id: user_id });

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
