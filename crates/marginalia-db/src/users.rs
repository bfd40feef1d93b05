//! User account repository.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use marginalia_core::{Error, NewUser, Result, User, UserCredentials, UserStore};

/// PostgreSQL implementation of [`UserStore`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a unique violation on `users` to a conflict naming the field.
fn map_unique_violation(e: sqlx::Error) -> Error {
    let conflict = e.as_database_error().and_then(|d| {
        if d.code().as_deref() != Some("23505") {
            return None;
        }
        Some(match d.constraint() {
            Some(c) if c.contains("email") => "Email already registered",
            _ => "Username already taken",
        })
    });
    match conflict {
        Some(msg) => Error::Conflict(msg.to_string()),
        None => Error::Database(e),
    }
}

#[async_trait]
impl UserStore for PgUserRepository {
    #[instrument(
        skip(self, user),
        fields(subsystem = "db", component = "users", op = "create_user")
    )]
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash)
             VALUES ($1, $2, $3, $4)
             RETURNING created_at",
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        info!(user_id = %id, "User registered");
        Ok(User {
            id,
            username: user.username,
            email: user.email,
            created_at: row.get("created_at"),
        })
    }

    async fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at
             FROM users
             WHERE username = $1 OR email = $1
             LIMIT 1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| UserCredentials {
            user: User {
                id: row.get("id"),
                username: row.get("username"),
                email: row.get("email"),
                created_at: row.get("created_at"),
            },
            password_hash: row.get("password_hash"),
        }))
    }
}
