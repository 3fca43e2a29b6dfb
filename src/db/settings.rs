//! Behavior settings repository
//!
//! Settings are stored as JSON-encoded values in a key/value table and read
//! fresh at the start of every pipeline run, so admin changes apply to the
//! next incoming message without a restart.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::DbPool;
use crate::{Error, Result};

/// Fallback reply used when generation is skipped or fails
pub const DEFAULT_FALLBACK_MESSAGE: &str = "ขออภัยค่ะ เดี๋ยวเจ้าหน้าที่จะมาตอบให้นะคะ 🙏";

/// Typed view over the behavior settings that steer the reply pipeline
///
/// Unknown keys in the table are preserved but ignored here; missing keys
/// fall back to the defaults below.
#[derive(Debug, Clone, Serialize)]
pub struct AiSettings {
    pub strict_mode: bool,
    pub require_knowledge: bool,
    pub fallback_message: String,
    pub min_confidence: f32,
    pub use_finetuned_model: bool,
    pub recent_knowledge_days: i64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            strict_mode: false,
            require_knowledge: false,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            min_confidence: 0.3,
            use_finetuned_model: false,
            recent_knowledge_days: 7,
        }
    }
}

/// A raw settings row, as served to the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct SettingRow {
    pub key: String,
    pub value: serde_json::Value,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Settings repository
#[derive(Clone)]
pub struct SettingsRepo {
    pool: DbPool,
}

impl SettingsRepo {
    /// Create a new settings repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load the typed settings snapshot
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load(&self) -> Result<AiSettings> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT key, value FROM ai_settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = AiSettings::default();
        for row in rows {
            let (key, raw) = row?;
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap_or_default();
            match key.as_str() {
                "strict_mode" => {
                    if let Some(v) = bool_value(&value) {
                        settings.strict_mode = v;
                    }
                }
                "require_knowledge" => {
                    if let Some(v) = bool_value(&value) {
                        settings.require_knowledge = v;
                    }
                }
                "fallback_message" => {
                    if let Some(v) = value.as_str() {
                        settings.fallback_message = v.to_string();
                    }
                }
                "min_confidence" => {
                    #[allow(clippy::cast_possible_truncation)]
                    if let Some(v) = f64_value(&value) {
                        settings.min_confidence = v as f32;
                    }
                }
                "use_finetuned_model" => {
                    if let Some(v) = bool_value(&value) {
                        settings.use_finetuned_model = v;
                    }
                }
                "recent_knowledge_days" => {
                    if let Some(v) = i64_value(&value) {
                        settings.recent_knowledge_days = v;
                    }
                }
                _ => {}
            }
        }

        Ok(settings)
    }

    /// List all settings rows, including keys the pipeline does not know
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn all(&self) -> Result<Vec<SettingRow>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT key, value, description, updated_at FROM ai_settings ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut settings = Vec::new();
        for row in rows {
            let (key, raw, description, updated_at) = row?;
            settings.push(SettingRow {
                key,
                value: serde_json::from_str(&raw).unwrap_or_default(),
                description,
                updated_at: parse_datetime(&updated_at),
            });
        }

        Ok(settings)
    }

    /// Upsert a single setting
    ///
    /// New keys are inserted without a description; seeded keys keep theirs.
    ///
    /// # Errors
    ///
    /// Returns error if database operation or serialization fails
    pub fn update(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let raw = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO ai_settings (key, value, description, updated_at)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, raw, now],
        )?;

        tracing::info!(key = %key, "setting updated");

        Ok(())
    }
}

/// Accept JSON booleans and their string spellings
fn bool_value(value: &serde_json::Value) -> Option<bool> {
    value
        .as_bool()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Accept JSON numbers and numeric strings
fn f64_value(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn i64_value(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
