//! Snippet sharing service.
//!
//! The interesting part lives in the request pipeline: a standard tier
//! (panic recovery, request logging, security headers) wraps every request,
//! a dynamic tier (session load, forgery-token check) wraps session-aware
//! pages, and the authorization gate wraps privileged ones.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod views;

pub mod crypto {
    pub mod password;
    pub mod token;
}

pub mod models {
    pub mod error;
    pub mod snippet;
    pub mod user;
}

pub mod repositories {
    pub mod snippet;
    pub mod user;
}

pub mod services {
    pub mod credentials;
}

pub mod session {
    pub mod handle;
    pub mod memory;
    pub mod redis;
    pub mod store;

    pub use handle::{Commit, Session};
    pub use store::{Change, SessionData, SessionError, SessionStore, SessionToken};
}

pub mod handlers {
    pub mod auth;
    pub mod pages;
    pub mod snippets;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod session;
    pub mod standard;
}

pub mod validation {
    pub mod forms;
}
