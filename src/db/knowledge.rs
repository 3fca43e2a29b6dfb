//! Knowledge base repository with vector search

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A knowledge base entry
///
/// An entry without an embedding never appears in similarity search; it can
/// still be served through the unconditional general/must-know path.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    pub category: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Column list for all knowledge entry SELECT queries
const ENTRY_COLUMNS: &str = "id, content, category, embedding, metadata, created_at";

/// Map a database row to a `KnowledgeEntry`
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let embedding: Option<Vec<u8>> = row.get(3)?;
    let metadata: String = row.get(4)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        category: row.get(2)?,
        embedding: embedding.map(|bytes| super::embedder::Embedder::from_bytes(&bytes)),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

/// Knowledge repository for database operations
#[derive(Clone)]
pub struct KnowledgeRepo {
    pool: DbPool,
}

impl KnowledgeRepo {
    /// Create a new knowledge repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a knowledge entry
    ///
    /// When an embedding is supplied it is mirrored into the `knowledge_vec`
    /// virtual table so the entry becomes searchable.
    ///
    /// # Errors
    ///
    /// Returns error if database operation or serialization fails
    pub fn insert(
        &self,
        content: &str,
        category: &str,
        embedding: Option<&[f32]>,
        metadata: &serde_json::Value,
    ) -> Result<KnowledgeEntry> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let metadata_json = serde_json::to_string(metadata)?;
        let embedding_bytes = embedding.map(super::embedder::Embedder::to_bytes);

        conn.execute(
            &format!("INSERT INTO knowledge_base ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            rusqlite::params![&id, content, category, embedding_bytes, metadata_json, &now_str],
        )?;

        if let Some(ref bytes) = embedding_bytes {
            conn.execute(
                "INSERT INTO knowledge_vec (entry_id, embedding) VALUES (?1, ?2)",
                rusqlite::params![&id, bytes],
            )?;
        }

        tracing::info!(
            entry_id = %id,
            category = %category,
            has_embedding = embedding.is_some(),
            "knowledge entry added"
        );

        Ok(KnowledgeEntry {
            id,
            content: content.to_string(),
            category: category.to_string(),
            embedding: embedding.map(<[f32]>::to_vec),
            metadata: metadata.clone(),
            created_at: now,
        })
    }

    /// Get an entry by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM knowledge_base WHERE id = ?1"),
            rusqlite::params![id],
            row_to_entry,
        );

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List entries, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base ORDER BY created_at DESC LIMIT ?1"
        ))?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// All entries tagged as general/must-know guidance, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn general(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base
             WHERE LOWER(category) = 'general'
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// Entries created inside a recency window, newest first
    ///
    /// Feeds the fine-tuned mode's "recent updates" delta.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, days: i64, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base
             WHERE created_at >= ?1
             ORDER BY created_at DESC LIMIT ?2"
        ))?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![cutoff, limit as i64], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// Delete an entry and clean up its vector row
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute("DELETE FROM knowledge_vec WHERE entry_id = ?1", rusqlite::params![id])?;
        let deleted = conn.execute("DELETE FROM knowledge_base WHERE id = ?1", rusqlite::params![id])?;

        if deleted > 0 {
            tracing::info!(entry_id = %id, "knowledge entry deleted");
        }

        Ok(deleted > 0)
    }

    /// Search entry embeddings by vector similarity
    ///
    /// Returns `(entry_id, distance)` pairs ordered by distance (closest
    /// first). The vec0 table uses cosine distance, so similarity is
    /// `1.0 - distance`.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let embedding_bytes = super::embedder::Embedder::to_bytes(query_embedding);

        let mut stmt = conn.prepare(
            r"SELECT entry_id, distance
              FROM knowledge_vec
              WHERE embedding MATCH ?1
              ORDER BY distance
              LIMIT ?2",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![embedding_bytes, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, EMBEDDING_DIM};

    fn setup() -> KnowledgeRepo {
        KnowledgeRepo::new(init_memory().unwrap())
    }

    fn unit_vec(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_get() {
        let repo = setup();

        let entry = repo
            .insert(
                "เลเซอร์กำจัดขน เริ่มต้น 990 บาท",
                "price",
                Some(&unit_vec(0)),
                &serde_json::json!({"source": "admin-dashboard"}),
            )
            .unwrap();

        let fetched = repo.get(&entry.id).unwrap().unwrap();
        assert_eq!(fetched.content, "เลเซอร์กำจัดขน เริ่มต้น 990 บาท");
        assert_eq!(fetched.category, "price");
        assert_eq!(fetched.embedding.as_ref().unwrap().len(), EMBEDDING_DIM);
        assert_eq!(fetched.metadata["source"], "admin-dashboard");
    }

    #[test]
    fn test_search_orders_by_distance() {
        let repo = setup();

        let near = repo
            .insert("near", "price", Some(&unit_vec(0)), &serde_json::json!({}))
            .unwrap();
        let far = repo
            .insert("far", "price", Some(&unit_vec(1)), &serde_json::json!({}))
            .unwrap();

        let results = repo.search(&unit_vec(0), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, near.id);
        assert_eq!(results[1].0, far.id);
        assert!(results[0].1 < results[1].1);
    }

    #[test]
    fn test_entry_without_embedding_is_invisible_to_search() {
        let repo = setup();

        repo.insert("no embedding", "general", None, &serde_json::json!({}))
            .unwrap();

        let results = repo.search(&unit_vec(0), 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_general_is_case_insensitive() {
        let repo = setup();

        repo.insert("opening hours 10:00-20:00", "General", None, &serde_json::json!({}))
            .unwrap();
        repo.insert("botox promo", "promotion", None, &serde_json::json!({}))
            .unwrap();

        let general = repo.general().unwrap();
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].content, "opening hours 10:00-20:00");
    }

    #[test]
    fn test_recent_window() {
        let repo = setup();

        let entry = repo
            .insert("fresh", "price", None, &serde_json::json!({}))
            .unwrap();
        // Backdate a second entry past the window
        {
            let conn = repo.pool.get().unwrap();
            let old = (Utc::now() - chrono::Duration::days(30)).to_rfc3339();
            conn.execute(
                "INSERT INTO knowledge_base (id, content, category, metadata, created_at)
                 VALUES ('old-entry', 'stale', 'price', '{}', ?1)",
                [old],
            )
            .unwrap();
        }

        let recent = repo.recent(7, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, entry.id);
    }

    #[test]
    fn test_delete_cleans_vector_row() {
        let repo = setup();

        let entry = repo
            .insert("ephemeral", "price", Some(&unit_vec(2)), &serde_json::json!({}))
            .unwrap();

        assert!(repo.delete(&entry.id).unwrap());
        assert!(repo.get(&entry.id).unwrap().is_none());
        assert!(repo.search(&unit_vec(2), 10).unwrap().is_empty());

        // Deleting again reports nothing removed
        assert!(!repo.delete(&entry.id).unwrap());
    }
}
