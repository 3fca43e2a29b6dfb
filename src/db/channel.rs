//! Connected channel repository: bot accounts and their credentials

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::platforms::Platform;
use crate::{Error, Result};

/// A connected bot account on one platform
///
/// Looked up by (platform, `platform_account_id`) at webhook time so one
/// deployment can serve several bot accounts. Credentials never serialize.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedChannel {
    pub id: String,
    pub platform: Platform,
    pub name: Option<String>,
    pub platform_account_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub channel_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

const CHANNEL_COLUMNS: &str =
    "id, platform, name, platform_account_id, access_token, channel_secret, created_at";

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectedChannel> {
    Ok(ConnectedChannel {
        id: row.get(0)?,
        platform: Platform::parse(&row.get::<_, String>(1)?).unwrap_or(Platform::Line),
        name: row.get(2)?,
        platform_account_id: row.get(3)?,
        access_token: row.get(4)?,
        channel_secret: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

/// Channel repository
#[derive(Clone)]
pub struct ChannelRepo {
    pool: DbPool,
}

impl ChannelRepo {
    /// Create a new channel repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a connected channel
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when a channel for the same
    /// (platform, account) pair already exists, or an error if the insert
    /// fails
    pub fn create(
        &self,
        platform: Platform,
        name: Option<&str>,
        platform_account_id: &str,
        access_token: &str,
        channel_secret: Option<&str>,
    ) -> Result<ConnectedChannel> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let inserted = conn.execute(
            "INSERT INTO connected_channels
                 (id, platform, name, platform_account_id, access_token, channel_secret, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                platform.as_str(),
                name,
                platform_account_id,
                access_token,
                channel_secret,
                &now_str
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::InvalidRequest(format!(
                    "channel already connected for {platform} account {platform_account_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(ConnectedChannel {
            id,
            platform,
            name: name.map(String::from),
            platform_account_id: platform_account_id.to_string(),
            access_token: access_token.to_string(),
            channel_secret: channel_secret.map(String::from),
            created_at: now,
        })
    }

    /// Resolve the channel a webhook was addressed to
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_account(
        &self,
        platform: Platform,
        platform_account_id: &str,
    ) -> Result<Option<ConnectedChannel>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!(
                "SELECT {CHANNEL_COLUMNS} FROM connected_channels
                 WHERE platform = ?1 AND platform_account_id = ?2"
            ),
            [platform.as_str(), platform_account_id],
            row_to_channel,
        );

        match result {
            Ok(channel) => Ok(Some(channel)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a channel by id
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the query fails
    pub fn get(&self, id: &str) -> Result<ConnectedChannel> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM connected_channels WHERE id = ?1"),
            [id],
            row_to_channel,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("channel {id}")),
            other => other.into(),
        })
    }

    /// List all channels, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<ConnectedChannel>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM connected_channels ORDER BY created_at DESC"
        ))?;

        let channels = stmt
            .query_map([], row_to_channel)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(channels)
    }

    /// Delete a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the delete fails
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let deleted = conn.execute("DELETE FROM connected_channels WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("channel {id}")));
        }
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> ChannelRepo {
        ChannelRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_create_and_find_by_account() {
        let repo = setup();

        let created = repo
            .create(Platform::Line, Some("Clinic LINE OA"), "U-dest", "token-abc", Some("secret"))
            .unwrap();

        let found = repo
            .find_by_account(Platform::Line, "U-dest")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.access_token, "token-abc");
        assert_eq!(found.channel_secret.as_deref(), Some("secret"));
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let repo = setup();

        repo.create(Platform::Line, None, "U-dest", "t1", None).unwrap();
        let duplicate = repo.create(Platform::Line, None, "U-dest", "t2", None);
        assert!(matches!(duplicate, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_account_is_scoped_by_platform() {
        let repo = setup();

        repo.create(Platform::Line, None, "shared", "t1", None).unwrap();
        repo.create(Platform::Facebook, None, "shared", "t2", None).unwrap();

        let line = repo.find_by_account(Platform::Line, "shared").unwrap().unwrap();
        let facebook = repo.find_by_account(Platform::Facebook, "shared").unwrap().unwrap();
        assert_ne!(line.id, facebook.id);
    }

    #[test]
    fn test_delete() {
        let repo = setup();

        let channel = repo.create(Platform::Line, None, "U-dest", "t", None).unwrap();
        repo.delete(&channel.id).unwrap();
        assert!(repo.find_by_account(Platform::Line, "U-dest").unwrap().is_none());
        assert!(repo.delete(&channel.id).is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let repo = setup();

        let channel = repo.create(Platform::Line, None, "U-dest", "t", Some("s")).unwrap();
        let json = serde_json::to_value(&channel).unwrap();
        assert!(json.get("access_token").is_none());
        assert!(json.get("channel_secret").is_none());
        assert_eq!(json["platform_account_id"], "U-dest");
    }
}
