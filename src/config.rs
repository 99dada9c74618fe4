use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::crypto::password::HashCost;

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The address the server listens on.
    pub addr: SocketAddr,
    /// The URL of the PostgreSQL database. In-memory storage is used when unset.
    pub database_url: Option<String>,
    /// The URL of the Redis server. In-memory sessions are used when unset.
    pub redis_url: Option<String>,
    /// Idle lifetime of a session in hours.
    pub session_lifetime_hours: i64,
    /// Whether the session cookie is marked `Secure`.
    pub secure_cookies: bool,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
    /// Argon2id cost for password hashes.
    pub hash_cost: HashCost,
    /// Maximum number of password hashes computed at once.
    pub hash_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            database_url: None,
            redis_url: None,
            session_lifetime_hours: 12,
            secure_cookies: true,
            static_dir: PathBuf::from("./ui/static"),
            hash_cost: HashCost::default(),
            hash_workers: 4,
        }
    }
}

/// Reads and parses an optional variable, falling back to `default`.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Creates a new `Config` from environment variables, after loading a
    /// `.env` file if one exists.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let session_lifetime_hours = parse_var("SESSION_LIFETIME_HOURS", defaults.session_lifetime_hours)?;
        if session_lifetime_hours < 1 {
            anyhow::bail!("SESSION_LIFETIME_HOURS must be at least 1");
        }

        let hash_cost = HashCost {
            memory_kib: parse_var("ARGON2_MEMORY_KIB", defaults.hash_cost.memory_kib)?,
            iterations: parse_var("ARGON2_ITERATIONS", defaults.hash_cost.iterations)?,
            parallelism: parse_var("ARGON2_PARALLELISM", defaults.hash_cost.parallelism)?,
        };

        Ok(Self {
            addr: parse_var("ADDR", defaults.addr)?,
            database_url: optional_var("DATABASE_URL"),
            redis_url: optional_var("REDIS_URL"),
            session_lifetime_hours,
            secure_cookies: parse_var("COOKIE_SECURE", defaults.secure_cookies)?,
            static_dir: optional_var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            hash_cost,
            hash_workers: parse_var("HASH_WORKERS", defaults.hash_workers)?,
        })
    }

    /// Idle lifetime of a session.
    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_lifetime_hours)
    }
}
