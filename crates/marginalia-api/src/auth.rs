//! Authentication: Argon2id password credentials and HS256 session tokens.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use marginalia_core::defaults::{EMAIL_MAX_LEN, PASSWORD_MIN_LEN, USERNAME_MAX_LEN};
use marginalia_core::{
    AuthGateway, AuthSession, AuthenticatedUser, Error, NewUser, Result, User, UserStore,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    /// Expiry (unix seconds).
    pub exp: usize,
    /// Issued at (unix seconds).
    pub iat: usize,
}

/// Hash a password into a PHC string with Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// [`AuthGateway`] backed by a [`UserStore`] and HS256 JWTs.
#[derive(Clone)]
pub struct JwtAuthGateway {
    users: Arc<dyn UserStore>,
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
    ttl: chrono::Duration,
}

impl fmt::Debug for JwtAuthGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtAuthGateway")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtAuthGateway {
    pub fn new(users: Arc<dyn UserStore>, secret: &str, ttl_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            users,
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
            ttl: chrono::Duration::hours(ttl_hours),
        }
    }

    /// Sign a token for `user`.
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            exp: (now + self.ttl).timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Token signing failed: {}", e)))
    }
}

fn validate_registration(username: &str, email: &str, password: &str) -> Result<()> {
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(Error::InvalidInput(
            "Username, email and password are required".to_string(),
        ));
    }
    if username.chars().count() > USERNAME_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "Username must be at most {} characters",
            USERNAME_MAX_LEN
        )));
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "Email must be at most {} characters",
            EMAIL_MAX_LEN
        )));
    }
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(Error::InvalidInput(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LEN
        )));
    }
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Blocking task failed: {}", e)))
}

#[async_trait]
impl AuthGateway for JwtAuthGateway {
    #[instrument(
        skip(self, email, password),
        fields(subsystem = "api", component = "auth", op = "register")
    )]
    async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthSession> {
        let username = username.trim();
        let email = email.trim();
        validate_registration(username, email, password)?;

        let password = password.to_string();
        let password_hash = run_blocking(move || hash_password(&password)).await??;

        let user = self
            .users
            .create_user(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await?;
        let token = self.issue(&user)?;

        info!(user_id = %user.id, "Registration complete");
        Ok(AuthSession { token, user })
    }

    #[instrument(
        skip(self, password),
        fields(subsystem = "api", component = "auth", op = "login")
    )]
    async fn login(&self, login: &str, password: &str) -> Result<AuthSession> {
        let rejected = || Error::Unauthorized("Invalid credentials".to_string());

        let Some(credentials) = self.users.find_credentials(login.trim()).await? else {
            debug!("Unknown login");
            return Err(rejected());
        };

        let password = password.to_string();
        let stored = credentials.password_hash.clone();
        if !run_blocking(move || verify_password(&password, &stored)).await? {
            warn!(user_id = %credentials.user.id, "Password mismatch");
            return Err(rejected());
        }

        let token = self.issue(&credentials.user)?;
        info!(user_id = %credentials.user.id, "Login succeeded");
        Ok(AuthSession {
            token,
            user: credentials.user,
        })
    }

    fn verify(&self, token: &str) -> Result<AuthenticatedUser> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token rejected");
            Error::Unauthorized("Invalid or expired token".to_string())
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| Error::Unauthorized("Invalid or expired token".to_string()))?;
        Ok(AuthenticatedUser {
            user_id,
            username: data.claims.username,
        })
    }
}

/// Extractor for routes that require a signed-in user.
///
/// Reads `Authorization: Bearer <token>` and verifies it with the
/// configured [`AuthGateway`]. Missing or invalid tokens are rejected
/// with 401.
#[derive(Debug, Clone)]
pub struct RequireUser(pub AuthenticatedUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

        let user = state.auth.verify(token)?;
        Ok(RequireUser(user))
    }
}
