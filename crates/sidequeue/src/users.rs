//! User registration with a background welcome email
//!
//! The service stores the user, then hands the email to the worker pool and
//! returns without waiting for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::job::{Job, JobContext, JobError, JobHandler, Payload};
use crate::worker::WorkerPool;

/// Kind of the job submitted for every new user
pub const SEND_WELCOME_EMAIL: &str = "send_welcome_email";

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Repository errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("username already taken: {0}")]
    Duplicate(String),

    #[error("user not found: {0}")]
    NotFound(i64),
}

/// User service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Storage for users
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, username: &str, email: &str) -> Result<User, RepositoryError>;

    async fn get(&self, id: i64) -> Result<User, RepositoryError>;
}

/// Delivers outbound email
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_welcome(&self, user_id: i64, email: &str) -> anyhow::Result<()>;
}

/// In-memory user store
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, username: &str, email: &str) -> Result<User, RepositoryError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.username == username) {
            return Err(RepositoryError::Duplicate(username.to_string()));
        }

        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            username: username.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: i64) -> Result<User, RepositoryError> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }
}

/// Mailer that only logs what it would send
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, user_id: i64, email: &str) -> anyhow::Result<()> {
        info!(user_id, email, "Sending welcome email");
        Ok(())
    }
}

/// Job handler that sends the welcome email described by the payload
struct WelcomeEmailHandler {
    mailer: Arc<dyn Mailer>,
}

#[async_trait]
impl JobHandler for WelcomeEmailHandler {
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::cancelled());
        }

        let user_id = job
            .get("user_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| JobError::new("payload is missing user_id").with_type("BAD_PAYLOAD"))?;
        let email = job
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| JobError::new("payload is missing email").with_type("BAD_PAYLOAD"))?;

        self.mailer.send_welcome(user_id, email).await?;
        Ok(())
    }
}

/// Registers users and schedules their welcome email
pub struct UserService<R> {
    repo: R,
    pool: Arc<WorkerPool>,
    welcome: Arc<dyn JobHandler>,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repo: R, pool: Arc<WorkerPool>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            repo,
            pool,
            welcome: Arc::new(WelcomeEmailHandler { mailer }),
        }
    }

    /// Store a new user and queue the welcome email
    ///
    /// Returns as soon as the user is stored; a full or stopped pool drops
    /// the email but never fails the registration.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
    ) -> Result<User, UserServiceError> {
        let username = username.trim();
        let email = email.trim();
        validate(username, email)?;

        let user = self.repo.create(username, email).await?;

        let mut payload = Payload::new();
        payload.insert("user_id".into(), json!(user.id));
        payload.insert("email".into(), json!(user.email));
        self.pool.submit(Job::with_shared_handler(
            SEND_WELCOME_EMAIL,
            payload,
            Arc::clone(&self.welcome),
        ));

        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, UserServiceError> {
        Ok(self.repo.get(id).await?)
    }
}

fn validate(username: &str, email: &str) -> Result<(), UserServiceError> {
    if username.is_empty() {
        return Err(UserServiceError::Validation("username is required".into()));
    }

    let valid_email = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid_email {
        return Err(UserServiceError::Validation(format!(
            "invalid email address: {email}"
        )));
    }

    Ok(())
}
