//! User and bearer token storage operations

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{AuthToken, User};

pub struct UserStore<'a> {
    conn: &'a Connection,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new user
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn create(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![
                user.id.to_string(),
                user.display_name,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find user by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, created_at FROM users WHERE id = ?1")?;

        let user = stmt
            .query_row(params![id.to_string()], |row| {
                Ok(User {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    display_name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?)?,
                })
            })
            .optional()?;

        Ok(user)
    }

    /// Store a bearer token
    #[instrument(skip(self, token), fields(user_id = %token.user_id))]
    pub fn issue_token(&self, token: &AuthToken) -> Result<()> {
        self.conn.execute(
            "INSERT INTO auth_tokens (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                token.token,
                token.user_id.to_string(),
                token.created_at.to_rfc3339(),
                token.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a non-expired token
    #[instrument(skip(self, token))]
    pub fn find_valid_token(&self, token: &str) -> Result<Option<AuthToken>> {
        let mut stmt = self.conn.prepare(
            "SELECT token, user_id, created_at, expires_at FROM auth_tokens WHERE token = ?1 AND expires_at > ?2",
        )?;

        let now = Utc::now().to_rfc3339();
        let token = stmt
            .query_row(params![token, now], |row| {
                Ok(AuthToken {
                    token: row.get(0)?,
                    user_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    expires_at: parse_datetime(&row.get::<_, String>(3)?)?,
                })
            })
            .optional()?;

        Ok(token)
    }

    /// Revoke a token
    pub fn revoke_token(&self, token: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM auth_tokens WHERE token = ?1", params![token])?;
        Ok(())
    }

    /// Clean up expired tokens
    pub fn cleanup_expired_tokens(&self) -> Result<u64> {
        let count = self.conn.execute(
            "DELETE FROM auth_tokens WHERE expires_at < ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{AuthToken, User};
    use crate::storage::Database;

    #[test]
    fn test_token_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("alice".into());
        db.users().create(&user).unwrap();

        let token = AuthToken::new(user.id, 24);
        db.users().issue_token(&token).unwrap();

        let found = db.users().find_valid_token(&token.token).unwrap().unwrap();
        assert_eq!(found.user_id, user.id);

        db.users().revoke_token(&token.token).unwrap();
        assert!(db.users().find_valid_token(&token.token).unwrap().is_none());
    }

    #[test]
    fn test_expired_token_ignored_and_cleaned() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("bob".into());
        db.users().create(&user).unwrap();

        let token = AuthToken::new(user.id, -1);
        db.users().issue_token(&token).unwrap();

        assert!(db.users().find_valid_token(&token.token).unwrap().is_none());
        assert_eq!(db.users().cleanup_expired_tokens().unwrap(), 1);
    }
}
