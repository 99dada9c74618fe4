#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use snippetbox::{
    config::Config,
    crypto::password::HashCost,
    routes::{self, Route},
    state::AppState,
};

pub const PASSWORD: &str = "pa$$word-long-enough";

/// A response with its body already read.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// Drives the real router in-process and keeps the session cookie between
/// requests, like a browser would.
pub struct TestContext {
    pub state: AppState,
    router: Router,
    pub session_cookie: Option<String>,
    csrf: Option<String>,
}

pub fn test_config() -> Config {
    Config {
        secure_cookies: false,
        hash_cost: HashCost::light(),
        ..Config::default()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_routes(Vec::new())
    }

    /// Serves the default route table plus `extra`.
    pub fn with_routes(extra: Vec<Route>) -> Self {
        let state = AppState::in_memory(&test_config()).unwrap();
        let mut table = routes::table();
        table.extend(extra);
        let router = routes::build(state.clone(), table).unwrap();

        Self {
            state,
            router,
            session_cookie: None,
            csrf: None,
        }
    }

    pub fn forget_session(&mut self) {
        self.session_cookie = None;
        self.csrf = None;
    }

    pub async fn send(&mut self, mut request: Request<Body>) -> TestResponse {
        if let Some(token) = &self.session_cookie {
            request.headers_mut().insert(
                header::COOKIE,
                format!("session={}", token).parse().unwrap(),
            );
        }

        let response = self.router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();

        for set_cookie in parts.headers.get_all(header::SET_COOKIE) {
            let set_cookie = set_cookie.to_str().unwrap();
            let pair = set_cookie.split(';').next().unwrap_or_default();
            if let Some(value) = pair.strip_prefix("session=") {
                if value.is_empty() || set_cookie.contains("Max-Age=0") {
                    self.forget_session();
                } else {
                    self.session_cookie = Some(value.to_string());
                }
            }
        }

        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body: to_bytes(body, usize::MAX).await.unwrap(),
        }
    }

    pub async fn get(&mut self, path: &str) -> TestResponse {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        self.send(request).await
    }

    /// Posts a form exactly as given, with no forgery token added.
    pub async fn post_form(&mut self, path: &str, fields: &[(&str, &str)]) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// The session's forgery token, fetched from a form page on first use.
    pub async fn csrf_token(&mut self) -> String {
        if let Some(token) = &self.csrf {
            return token.clone();
        }
        let page = self.get("/user/login").await;
        let token = page.json()["csrf_token"].as_str().unwrap().to_string();
        self.csrf = Some(token.clone());
        token
    }

    /// Posts a form carrying the session's forgery token.
    pub async fn submit(&mut self, path: &str, fields: &[(&str, &str)]) -> TestResponse {
        let token = self.csrf_token().await;
        let mut fields = fields.to_vec();
        fields.push(("csrf_token", token.as_str()));
        self.post_form(path, &fields).await
    }

    pub async fn signup(&mut self, name: &str, email: &str, password: &str) -> TestResponse {
        self.submit(
            "/user/signup",
            &[("name", name), ("email", email), ("password", password)],
        )
        .await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> TestResponse {
        self.submit("/user/login", &[("email", email), ("password", password)])
            .await
    }

    /// Creates an account and signs into it.
    pub async fn signed_in(email: &str) -> Self {
        let mut ctx = Self::new();
        let signup = ctx.signup("Alice", email, PASSWORD).await;
        assert_eq!(signup.status, StatusCode::SEE_OTHER);
        let login = ctx.login(email, PASSWORD).await;
        assert_eq!(login.status, StatusCode::SEE_OTHER);
        ctx
    }
}
