use std::sync::Arc;

use argon2::{
    Argon2, Params, ParamsBuilder,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use zeroize::Zeroizing;

/// Password used to produce the hash that unknown accounts are verified against.
const DUMMY_PASSWORD: &str = "snippetbox-dummy-password";

/// Errors raised while hashing or verifying passwords.
#[derive(Error, Debug)]
pub enum HashError {
    /// The Argon2 parameters were rejected.
    #[error("Argon2 params: {0}")]
    Params(String),

    /// Hashing failed.
    #[error("Argon2 hash error: {0}")]
    Hash(String),

    /// A stored hash could not be parsed.
    #[error("Hash parse error: {0}")]
    Parse(String),

    /// The blocking worker went away.
    #[error("Hash worker error: {0}")]
    Worker(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of iterations.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 3,
            parallelism: 6,
        }
    }
}

impl HashCost {
    /// The cheapest parameters Argon2 accepts. Only meant for tests and local tooling.
    pub fn light() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Argon2id hasher whose CPU work runs on the blocking pool, at most
/// `workers` jobs at a time.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
    workers: Arc<Semaphore>,
    dummy_hash: Arc<OnceCell<String>>,
}

impl Argon2Hasher {
    /// Creates a new `Argon2Hasher`.
    ///
    /// # Arguments
    ///
    /// * `cost` - The Argon2id cost parameters.
    /// * `workers` - The maximum number of concurrent hash jobs.
    pub fn new(cost: HashCost, workers: usize) -> Result<Self, HashError> {
        let params = ParamsBuilder::new()
            .m_cost(cost.memory_kib)
            .t_cost(cost.iterations)
            .p_cost(cost.parallelism)
            .build()
            .map_err(|e| HashError::Params(e.to_string()))?;

        Ok(Self {
            params,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            dummy_hash: Arc::new(OnceCell::new()),
        })
    }

    /// Hashes a password into a PHC string.
    pub async fn hash(&self, password: &str) -> Result<String, HashError> {
        let password = Zeroizing::new(password.to_owned());
        let params = self.params.clone();

        self.run(move || {
            let salt = SaltString::generate(&mut OsRng);
            let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| HashError::Hash(e.to_string()))
        })
        .await
    }

    /// Verifies a password against a stored PHC string.
    ///
    /// The comparison of the derived output is constant-time.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        let password = Zeroizing::new(password.to_owned());
        let hash = hash.to_owned();

        self.run(move || {
            let parsed = PasswordHash::new(&hash).map_err(|e| HashError::Parse(e.to_string()))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
    }

    /// Spends the same work as a real verification, for accounts that do not exist.
    pub async fn verify_dummy(&self, password: &str) -> Result<(), HashError> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;

        self.verify(password, dummy).await.map(|_| ())
    }

    async fn run<T, F>(&self, job: F) -> Result<T, HashError>
    where
        F: FnOnce() -> Result<T, HashError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| HashError::Worker(e.to_string()))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| HashError::Worker(e.to_string()))?
    }
}
