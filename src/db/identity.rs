//! Customer and social identity repository

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::platforms::Platform;
use crate::{Error, Result};

/// A platform-independent end user profile
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub crm_tags: Vec<String>,
    pub skin_concerns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One platform account belonging to a customer
///
/// Unique per (platform, `platform_user_id`). Identities are never merged
/// across platforms automatically; the same human on LINE and Facebook owns
/// two customers until a CRM flow links them.
#[derive(Debug, Clone, Serialize)]
pub struct SocialIdentity {
    pub id: String,
    pub customer_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub profile_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

const IDENTITY_COLUMNS: &str =
    "id, customer_id, platform, platform_user_id, profile_name, avatar_url, created_at";

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<SocialIdentity> {
    Ok(SocialIdentity {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        platform: Platform::parse(&row.get::<_, String>(2)?).unwrap_or(Platform::Line),
        platform_user_id: row.get(3)?,
        profile_name: row.get(4)?,
        avatar_url: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

/// Identity repository
#[derive(Clone)]
pub struct IdentityRepo {
    pool: DbPool,
}

impl IdentityRepo {
    /// Create a new identity repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up an identity by its unique (platform, platform user id) pair
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, platform: Platform, platform_user_id: &str) -> Result<Option<SocialIdentity>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        Self::find_in(&conn, platform, platform_user_id)
    }

    fn find_in(
        conn: &Connection,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<Option<SocialIdentity>> {
        let result = conn.query_row(
            &format!(
                "SELECT {IDENTITY_COLUMNS} FROM social_identities
                 WHERE platform = ?1 AND platform_user_id = ?2"
            ),
            [platform.as_str(), platform_user_id],
            row_to_identity,
        );

        match result {
            Ok(identity) => Ok(Some(identity)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a customer and its first social identity in one transaction
    ///
    /// First contact path. Serializes on the unique (platform,
    /// `platform_user_id`) index: a concurrent duplicate delivery gets the
    /// row the winner created instead of a second customer.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_with_customer(
        &self,
        platform: Platform,
        platform_user_id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<SocialIdentity> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-check under the write lock; another event for the same brand-new
        // user may have won the race before we acquired it.
        if let Some(existing) = Self::find_in(&tx, platform, platform_user_id)? {
            return Ok(existing);
        }

        let customer_id = Uuid::new_v4().to_string();
        let identity_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        tx.execute(
            "INSERT INTO customers (id, full_name, created_at) VALUES (?1, ?2, ?3)",
            [&customer_id, display_name, &now_str],
        )?;

        let inserted = tx.execute(
            "INSERT INTO social_identities
                 (id, customer_id, platform, platform_user_id, profile_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &identity_id,
                &customer_id,
                platform.as_str(),
                platform_user_id,
                display_name,
                avatar_url,
                &now_str
            ],
        );

        match inserted {
            Ok(_) => {}
            // Unique-index backstop for a writer outside this process; the
            // rollback discards the orphan customer row.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tx.rollback()?;
                drop(conn);
                return self.find(platform, platform_user_id)?.ok_or_else(|| {
                    Error::Database("identity missing after unique constraint hit".to_string())
                });
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;

        tracing::info!(
            platform = %platform,
            platform_user_id = %platform_user_id,
            customer_id = %customer_id,
            "created customer for first contact"
        );

        Ok(SocialIdentity {
            id: identity_id,
            customer_id,
            platform,
            platform_user_id: platform_user_id.to_string(),
            profile_name: Some(display_name.to_string()),
            avatar_url: avatar_url.map(String::from),
            created_at: now,
        })
    }

    /// Get an identity by id
    ///
    /// # Errors
    ///
    /// Returns error if the identity does not exist or the query fails
    pub fn get(&self, id: &str) -> Result<SocialIdentity> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.query_row(
            &format!("SELECT {IDENTITY_COLUMNS} FROM social_identities WHERE id = ?1"),
            [id],
            row_to_identity,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("identity {id}")),
            other => other.into(),
        })
    }

    /// Get the customer owning an identity
    ///
    /// # Errors
    ///
    /// Returns error if the customer does not exist or the query fails
    pub fn get_customer(&self, customer_id: &str) -> Result<Customer> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.query_row(
            "SELECT id, full_name, phone_number, crm_tags, skin_concerns, created_at
             FROM customers WHERE id = ?1",
            [customer_id],
            row_to_customer,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("customer {customer_id}")),
            other => other.into(),
        })
    }

    /// Count all customers
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn customer_count(&self) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn row_to_customer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    let tags_json: String = row.get(3)?;
    let concerns_json: String = row.get(4)?;
    Ok(Customer {
        id: row.get(0)?,
        full_name: row.get(1)?,
        phone_number: row.get(2)?,
        crm_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        skin_concerns: serde_json::from_str(&concerns_json).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> IdentityRepo {
        let pool = init_memory().unwrap();
        IdentityRepo::new(pool)
    }

    #[test]
    fn test_find_missing() {
        let repo = setup();
        let found = repo.find(Platform::Line, "U123").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_create_and_find() {
        let repo = setup();

        let created = repo
            .create_with_customer(Platform::Line, "U123", "Somchai", Some("https://cdn/p.png"))
            .unwrap();
        assert_eq!(created.platform, Platform::Line);
        assert_eq!(created.platform_user_id, "U123");
        assert_eq!(created.profile_name.as_deref(), Some("Somchai"));

        let found = repo.find(Platform::Line, "U123").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.customer_id, created.customer_id);
    }

    #[test]
    fn test_duplicate_create_returns_existing() {
        let repo = setup();

        let first = repo
            .create_with_customer(Platform::Line, "U123", "LINE User", None)
            .unwrap();
        let second = repo
            .create_with_customer(Platform::Line, "U123", "LINE User", None)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.customer_count().unwrap(), 1);
    }

    #[test]
    fn test_same_user_id_different_platform_is_distinct() {
        let repo = setup();

        let line = repo
            .create_with_customer(Platform::Line, "shared-id", "LINE User", None)
            .unwrap();
        let facebook = repo
            .create_with_customer(Platform::Facebook, "shared-id", "Facebook User", None)
            .unwrap();

        assert_ne!(line.id, facebook.id);
        assert_ne!(line.customer_id, facebook.customer_id);
        assert_eq!(repo.customer_count().unwrap(), 2);
    }

    #[test]
    fn test_get_customer_defaults() {
        let repo = setup();

        let identity = repo
            .create_with_customer(Platform::Facebook, "F9", "Facebook User", None)
            .unwrap();
        let customer = repo.get_customer(&identity.customer_id).unwrap();

        assert_eq!(customer.full_name, "Facebook User");
        assert!(customer.crm_tags.is_empty());
        assert!(customer.skin_concerns.is_empty());
        assert!(customer.phone_number.is_none());
    }
}
