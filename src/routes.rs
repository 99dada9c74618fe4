use std::collections::HashMap;

use axum::{
    Router,
    handler::Handler,
    middleware::{from_fn, from_fn_with_state},
    routing::{MethodRouter, get, post},
};
use http::Method;
use thiserror::Error;
use tower_cookies::CookieManagerLayer;
use tower_http::services::ServeDir;

use crate::{
    handlers::{auth, pages, snippets},
    middleware_layer::{
        auth::require_authentication, csrf::verify_csrf, session::load_session,
        standard::standard_tier,
    },
    state::AppState,
};

/// Which middleware a route runs behind, on top of the standard tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Standard tier only.
    Standard,
    /// Session load and forgery check.
    Dynamic,
    /// Dynamic tier plus the authentication gate.
    Privileged,
}

/// One entry of the route table.
pub struct Route {
    pub method: Method,
    pub pattern: &'static str,
    pub tier: Tier,
    endpoint: MethodRouter<AppState>,
}

impl Route {
    pub fn get<H, T>(pattern: &'static str, tier: Tier, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        Self {
            method: Method::GET,
            pattern,
            tier,
            endpoint: get(handler),
        }
    }

    pub fn post<H, T>(pattern: &'static str, tier: Tier, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        Self {
            method: Method::POST,
            pattern,
            tier,
            endpoint: post(handler),
        }
    }
}

/// A route table that cannot be served as written.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("pattern {0:?} must start with '/'")]
    MissingLeadingSlash(&'static str),

    #[error("pattern {0:?} has a malformed parameter segment")]
    MalformedParameter(&'static str),

    #[error("pattern {0:?} has more than one parameter")]
    TooManyParameters(&'static str),

    #[error("pattern {0:?} has a wildcard before its last segment")]
    WildcardNotLast(&'static str),

    #[error("{method} {pattern} is registered twice")]
    Duplicate { method: Method, pattern: &'static str },

    #[error("{method} {first} and {method} {second} match the same paths")]
    Ambiguous {
        method: Method,
        first: &'static str,
        second: &'static str,
    },

    #[error("{0} is registered under more than one middleware tier")]
    SplitAcrossTiers(&'static str),
}

/// The application's route table.
pub fn table() -> Vec<Route> {
    use Tier::*;

    vec![
        Route::get("/ping", Standard, pages::ping),
        Route::get("/", Dynamic, snippets::home),
        Route::get("/about", Dynamic, pages::about),
        Route::get("/snippet/{id}", Dynamic, snippets::show_snippet),
        Route::get("/user/signup", Dynamic, auth::signup_form),
        Route::post("/user/signup", Dynamic, auth::signup),
        Route::get("/user/login", Dynamic, auth::login_form),
        Route::post("/user/login", Dynamic, auth::login),
        Route::get("/snippet/create", Privileged, snippets::create_snippet_form),
        Route::post("/snippet/create", Privileged, snippets::create_snippet),
        Route::post("/user/logout", Privileged, auth::logout),
        Route::get("/user/profile", Privileged, auth::profile),
        Route::get("/user/change-password", Privileged, auth::change_password_form),
        Route::post("/user/change-password", Privileged, auth::change_password),
    ]
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal,
    Param,
    Wildcard,
}

fn classify(pattern: &'static str, segment: &str) -> Result<Segment, RouteError> {
    if !segment.contains(['{', '}']) {
        return Ok(Segment::Literal);
    }

    let inner = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or(RouteError::MalformedParameter(pattern))?;
    let (kind, name) = match inner.strip_prefix('*') {
        Some(name) => (Segment::Wildcard, name),
        None => (Segment::Param, inner),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RouteError::MalformedParameter(pattern));
    }
    Ok(kind)
}

/// Checks a pattern on its own and returns its shape: the pattern with every
/// parameter name erased.
fn shape(pattern: &'static str) -> Result<String, RouteError> {
    let Some(rest) = pattern.strip_prefix('/') else {
        return Err(RouteError::MissingLeadingSlash(pattern));
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let mut params = 0;
    let mut shape = String::new();

    for (i, segment) in segments.iter().enumerate() {
        shape.push('/');
        match classify(pattern, segment)? {
            Segment::Literal => shape.push_str(segment),
            Segment::Param => {
                params += 1;
                shape.push_str("{}");
            }
            Segment::Wildcard => {
                params += 1;
                if i + 1 != segments.len() {
                    return Err(RouteError::WildcardNotLast(pattern));
                }
                shape.push_str("{*}");
            }
        }
    }

    if params > 1 {
        return Err(RouteError::TooManyParameters(pattern));
    }
    Ok(shape)
}

/// Checks the route table before anything is served.
pub fn validate(routes: &[Route]) -> Result<(), RouteError> {
    let mut shapes: HashMap<(Method, String), &'static str> = HashMap::new();
    let mut tiers: HashMap<&'static str, Tier> = HashMap::new();

    for route in routes {
        let key = (route.method.clone(), shape(route.pattern)?);

        if let Some(first) = shapes.insert(key, route.pattern) {
            if first == route.pattern {
                return Err(RouteError::Duplicate {
                    method: route.method.clone(),
                    pattern: route.pattern,
                });
            }
            return Err(RouteError::Ambiguous {
                method: route.method.clone(),
                first,
                second: route.pattern,
            });
        }

        if let Some(tier) = tiers.insert(route.pattern, route.tier) {
            if tier != route.tier {
                return Err(RouteError::SplitAcrossTiers(route.pattern));
            }
        }
    }

    Ok(())
}

/// Builds the application router from the default route table.
pub fn app(state: AppState) -> Result<Router, RouteError> {
    build(state, table())
}

/// Validates `routes` and composes them with their middleware tiers.
///
/// Layers added later run first, so the gate sits innermost and the cookie
/// manager outermost within the dynamic tier. The standard tier wraps
/// everything, the fallback and static files included.
pub fn build(state: AppState, routes: Vec<Route>) -> Result<Router, RouteError> {
    validate(&routes)?;

    let mut standard = Router::new();
    let mut dynamic = Router::new();
    let mut privileged = Router::new();
    let (mut has_dynamic, mut has_privileged) = (false, false);

    for route in routes {
        match route.tier {
            Tier::Standard => standard = standard.route(route.pattern, route.endpoint),
            Tier::Dynamic => {
                has_dynamic = true;
                dynamic = dynamic.route(route.pattern, route.endpoint);
            }
            Tier::Privileged => {
                has_privileged = true;
                privileged = privileged.route(route.pattern, route.endpoint);
            }
        }
    }

    if has_privileged {
        privileged = privileged.route_layer(from_fn_with_state(
            state.clone(),
            require_authentication,
        ));
        dynamic = dynamic.merge(privileged);
    }

    if has_dynamic || has_privileged {
        dynamic = dynamic
            .route_layer(from_fn(verify_csrf))
            .route_layer(from_fn_with_state(state.clone(), load_session))
            .route_layer(CookieManagerLayer::new());
    }

    let router = standard
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .merge(dynamic)
        .fallback(pages::not_found)
        .with_state(state);

    Ok(standard_tier(router))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(pattern: &'static str, tier: Tier) -> Route {
        Route::get(pattern, tier, || async {})
    }

    #[test]
    fn default_table_is_valid() {
        assert_eq!(validate(&table()), Ok(()));
    }

    #[test]
    fn pattern_must_be_absolute() {
        assert_eq!(
            validate(&[noop("about", Tier::Dynamic)]),
            Err(RouteError::MissingLeadingSlash("about"))
        );
    }

    #[test]
    fn at_most_one_parameter() {
        assert_eq!(
            validate(&[noop("/snippet/{id}/{rev}", Tier::Dynamic)]),
            Err(RouteError::TooManyParameters("/snippet/{id}/{rev}"))
        );
    }

    #[test]
    fn wildcard_must_come_last() {
        assert_eq!(
            validate(&[noop("/files/{*rest}/raw", Tier::Standard)]),
            Err(RouteError::WildcardNotLast("/files/{*rest}/raw"))
        );
    }

    #[test]
    fn malformed_parameter_is_rejected() {
        assert_eq!(
            validate(&[noop("/snippet/{id", Tier::Dynamic)]),
            Err(RouteError::MalformedParameter("/snippet/{id"))
        );
        assert_eq!(
            validate(&[noop("/snippet/{}", Tier::Dynamic)]),
            Err(RouteError::MalformedParameter("/snippet/{}"))
        );
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let routes = [noop("/about", Tier::Dynamic), noop("/about", Tier::Dynamic)];
        assert_eq!(
            validate(&routes),
            Err(RouteError::Duplicate {
                method: Method::GET,
                pattern: "/about"
            })
        );
    }

    #[test]
    fn same_shape_is_ambiguous() {
        let routes = [
            noop("/snippet/{id}", Tier::Dynamic),
            noop("/snippet/{slug}", Tier::Dynamic),
        ];
        assert!(matches!(
            validate(&routes),
            Err(RouteError::Ambiguous { .. })
        ));
    }

    #[test]
    fn literal_beside_parameter_is_fine() {
        let routes = [
            noop("/snippet/{id}", Tier::Dynamic),
            noop("/snippet/create", Tier::Privileged),
        ];
        assert_eq!(validate(&routes), Ok(()));
    }

    #[test]
    fn same_shape_under_different_methods_is_fine() {
        let routes = [
            noop("/user/login", Tier::Dynamic),
            Route::post("/user/login", Tier::Dynamic, || async {}),
        ];
        assert_eq!(validate(&routes), Ok(()));
    }

    #[test]
    fn path_split_across_tiers_is_rejected() {
        let routes = [
            noop("/user/profile", Tier::Dynamic),
            Route::post("/user/profile", Tier::Privileged, || async {}),
        ];
        assert_eq!(
            validate(&routes),
            Err(RouteError::SplitAcrossTiers("/user/profile"))
        );
    }
}
