//! User registration, password hashing and bearer tokens.
//!
//! Passwords are hashed with bcrypt on the blocking pool. Access tokens are
//! HS256 JWTs carrying `{sub, exp}` signed with `SECRET_KEY`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::models::User;

/// Token lifetime when the caller does not supply one.
const FALLBACK_TTL_MINUTES: i64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User already exists")]
    UserExists,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Could not validate credentials")]
    CouldNotValidate,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

pub async fn hash_password(password: &str, cost: u32) -> anyhow::Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("bcrypt task panicked")?
        .context("Failed to hash password")
}

/// Returns `false` for a mismatch and for a malformed stored hash.
pub async fn verify_password(password: &str, hashed: &str) -> anyhow::Result<bool> {
    let password = password.to_string();
    let hashed = hashed.to_string();
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hashed))
        .await
        .context("bcrypt task panicked")?;
    match ok {
        Ok(valid) => Ok(valid),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash could not be verified");
            Ok(false)
        }
    }
}

pub fn create_access_token(
    secret: &str,
    sub: &str,
    ttl: Option<Duration>,
) -> anyhow::Result<String> {
    let ttl = ttl.unwrap_or_else(|| Duration::minutes(FALLBACK_TTL_MINUTES));
    let claims = Claims {
        sub: sub.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to sign access token")
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        AuthError::CouldNotValidate
    })?;

    if data.claims.sub.is_empty() {
        return Err(AuthError::CouldNotValidate);
    }
    Ok(data.claims)
}

/// Persistence seam for user credentials.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// Inserts a user. Returns `false` when the username is already taken.
    async fn create_user(&self, username: &str, hashed_password: &str) -> anyhow::Result<bool>;
}

pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT username, hashed_password FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query users")?;

        Ok(row.map(|(username, hashed_password)| User {
            username,
            hashed_password,
        }))
    }

    async fn create_user(&self, username: &str, hashed_password: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("INSERT INTO users (username, hashed_password) VALUES (?, ?)")
            .bind(username)
            .bind(hashed_password)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to insert user")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registered {
    pub username: String,
    pub message: String,
}

/// Registration, login and token checks over a [`UserStore`].
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    secret: String,
    ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        secret: impl Into<String>,
        ttl_minutes: i64,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            store,
            secret: secret.into(),
            ttl: Duration::minutes(ttl_minutes),
            bcrypt_cost,
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Registered, AuthError> {
        if self.store.get_user(username).await?.is_some() {
            return Err(AuthError::UserExists);
        }
        let hashed = hash_password(password, self.bcrypt_cost).await?;
        if !self.store.create_user(username, &hashed).await? {
            return Err(AuthError::UserExists);
        }
        tracing::info!(username, "registered user");
        Ok(Registered {
            username: username.to_string(),
            message: "User registered successfully".to_string(),
        })
    }

    /// `None` for an unknown user or a wrong password.
    pub async fn authenticate(&self, username: &str, password: &str) -> anyhow::Result<Option<User>> {
        let Some(user) = self.store.get_user(username).await? else {
            return Ok(None);
        };
        if verify_password(password, &user.hashed_password).await? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .authenticate(username, password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        Ok(create_access_token(
            &self.secret,
            &user.username,
            Some(self.ttl),
        )?)
    }

    /// Resolves a bearer token to a stored user.
    pub async fn current_user(&self, token: &str) -> Result<User, AuthError> {
        let claims = decode_token(&self.secret, token)?;
        match self.store.get_user(&claims.sub).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthError::CouldNotValidate),
            Err(e) => {
                tracing::error!(error = %e, "user lookup failed during token check");
                Err(AuthError::CouldNotValidate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> Arc<dyn UserStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        Arc::new(SqliteUserStore::new(pool))
    }

    #[test]
    fn token_round_trip() {
        let token = create_access_token("secret", "alice", Some(Duration::minutes(5))).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn default_ttl_is_fifteen_minutes() {
        let token = create_access_token("secret", "alice", None).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        let remaining = claims.exp - Utc::now().timestamp();
        assert!((14 * 60..=15 * 60).contains(&remaining));
    }

    #[test]
    fn expired_token_rejected() {
        let token =
            create_access_token("secret", "alice", Some(Duration::minutes(-5))).unwrap();
        assert!(matches!(
            decode_token("secret", &token),
            Err(AuthError::CouldNotValidate)
        ));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = create_access_token("secret", "alice", None).unwrap();
        assert!(decode_token("other", &token).is_err());
        assert!(decode_token("secret", "not-a-jwt").is_err());
    }

    #[tokio::test]
    async fn hash_and_verify() {
        let hashed = hash_password("hunter2", 4).await.unwrap();
        assert!(hashed.starts_with("$2"));
        assert!(verify_password("hunter2", &hashed).await.unwrap());
        assert!(!verify_password("hunter3", &hashed).await.unwrap());
        assert!(!verify_password("hunter2", "garbage").await.unwrap());
    }

    #[tokio::test]
    async fn register_is_unique() {
        let auth = AuthService::new(memory_store().await, "secret", 60, 4);
        let ok = auth.register("bob", "pw").await.unwrap();
        assert_eq!(ok.message, "User registered successfully");
        assert!(matches!(
            auth.register("bob", "other").await,
            Err(AuthError::UserExists)
        ));
    }

    #[tokio::test]
    async fn login_and_current_user() {
        let auth = AuthService::new(memory_store().await, "secret", 60, 4);
        auth.register("carol", "pw").await.unwrap();

        assert!(auth.authenticate("carol", "wrong").await.unwrap().is_none());
        assert!(auth.authenticate("nobody", "pw").await.unwrap().is_none());
        assert!(matches!(
            auth.login("carol", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));

        let token = auth.login("carol", "pw").await.unwrap();
        let user = auth.current_user(&token).await.unwrap();
        assert_eq!(user.username, "carol");

        let ghost = create_access_token("secret", "ghost", None).unwrap();
        assert!(matches!(
            auth.current_user(&ghost).await,
            Err(AuthError::CouldNotValidate)
        ));
    }
}
