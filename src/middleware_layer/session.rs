use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::cookie::{SameSite, time::Duration};
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::AppError,
    session::{Commit, Session, SessionToken},
    state::AppState,
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Builds the session cookie for `token`.
fn session_cookie(token: &SessionToken, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.as_str().to_owned());

    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");

    cookie
}

/// Loads the session for the request and commits its changes afterwards.
///
/// Every response for a stored session re-issues the cookie, so its
/// `Max-Age` counts from the last request rather than the last write.
///
/// The session is reachable by handlers through the [`Session`] extractor.
/// Changes reach the store only if the inner service produces a response, so
/// a request that is dropped or panics leaves the stored session untouched.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
pub async fn load_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let presented = cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| SessionToken::parse(cookie.value()));

    let session = Session::load(state.sessions.clone(), presented).await;
    request.extensions_mut().insert(session.clone());

    let response = next.run(request).await;

    let max_age = state.config.session_lifetime().num_seconds();
    match session.commit().await {
        // Loading pushed the server-side expiry forward; the cookie follows.
        Ok(Commit::Unchanged) if session.is_stored() => {
            cookies.add(session_cookie(&session.token(), max_age, state.config.secure_cookies));
        }
        Ok(Commit::Unchanged) => {}
        Ok(Commit::Saved(token)) => {
            cookies.add(session_cookie(&token, max_age, state.config.secure_cookies));
        }
        Ok(Commit::Ended) => {
            let mut cookie = Cookie::new(SESSION_COOKIE, "");
            cookie.set_max_age(Duration::seconds(0));
            cookie.set_path("/");
            cookies.remove(cookie);
        }
        Err(e) => {
            tracing::error!("❌ Failed to save session: {}", e);
            return AppError::Session(e).into_response();
        }
    }

    response
}
