//! Durable SQLite store - the authoritative tier
//!
//! Three tables, one per long-term kind, each keyed by id with secondary
//! indices on persona, kind, timestamp, and importance. Tags live in a JSON
//! array column and are matched by membership. Working-kind fallback rows
//! (taken when the fast tier is down) land in the episodic table with
//! `kind = 'working'`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::Result;
use crate::persona::Persona;
use crate::storage::backend::{BackendHealth, BackendStats, MemoryBackend};
use crate::types::{MemoryContent, MemoryItem, MemoryKind, MemoryQuery};

const TABLES: &[&str] = &[
    "episodic_memories",
    "semantic_memories",
    "procedural_memories",
];

fn table_for(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Working | MemoryKind::Episodic => "episodic_memories",
        MemoryKind::Semantic => "semantic_memories",
        MemoryKind::Procedural => "procedural_memories",
    }
}

/// Filter for direct durable queries (used by search and the lifecycle
/// engine)
#[derive(Debug, Clone, Default)]
pub struct DurableFilter {
    pub persona: Option<Persona>,
    pub kind: Option<MemoryKind>,
    /// Substring match on the serialized content (LIKE)
    pub text: Option<String>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    pub min_importance: Option<f32>,
    pub max_importance: Option<f32>,
    pub limit: usize,
}

/// SQLite-backed authoritative store
pub struct DurableStore {
    conn: Arc<Mutex<Connection>>,
    available: std::sync::atomic::AtomicBool,
}

impl DurableStore {
    /// Open or create the database; runs schema setup
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        Self::create_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            available: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        for table in TABLES {
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    id TEXT PRIMARY KEY,
                    persona TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    importance REAL NOT NULL,
                    timestamp TEXT NOT NULL,
                    last_access TEXT NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    tags TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{{}}',
                    embedding BLOB
                );
                CREATE INDEX IF NOT EXISTS idx_{t}_persona ON {t}(persona);
                CREATE INDEX IF NOT EXISTS idx_{t}_kind ON {t}(kind);
                CREATE INDEX IF NOT EXISTS idx_{t}_timestamp ON {t}(timestamp);
                CREATE INDEX IF NOT EXISTS idx_{t}_importance ON {t}(importance);
                "#,
                t = table
            ))?;
        }
        Ok(())
    }

    fn encode_embedding(embedding: &Option<Vec<f32>>) -> Option<Vec<u8>> {
        embedding.as_ref().map(|v| {
            let mut bytes = Vec::with_capacity(v.len() * 4);
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
            bytes
        })
    }

    fn decode_embedding(bytes: Option<Vec<u8>>) -> Option<Vec<f32>> {
        bytes.map(|b| {
            b.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryItem> {
        let persona_str: String = row.get("persona")?;
        let kind_str: String = row.get("kind")?;
        let content_str: String = row.get("content")?;
        let timestamp_str: String = row.get("timestamp")?;
        let last_access_str: String = row.get("last_access")?;
        let tags_str: String = row.get("tags")?;
        let metadata_str: String = row.get("metadata")?;
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;

        let content: MemoryContent = serde_json::from_str(&content_str)
            .unwrap_or_else(|_| MemoryContent::Text(content_str.clone()));

        Ok(MemoryItem {
            id: row.get("id")?,
            persona: persona_str.parse().unwrap_or(Persona::Shared),
            kind: kind_str.parse().unwrap_or(MemoryKind::Episodic),
            content,
            importance: row.get::<_, f64>("importance")? as f32,
            timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_access: DateTime::parse_from_rfc3339(&last_access_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            access_count: row.get::<_, i64>("access_count")? as u32,
            tags: serde_json::from_str(&tags_str).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            embedding: Self::decode_embedding(embedding_bytes),
        })
    }

    /// Direct filtered query over the archive
    pub fn query_filtered(&self, filter: &DurableFilter) -> Result<Vec<MemoryItem>> {
        let conn = self.conn.lock();
        let mut results = Vec::new();

        let tables: Vec<&str> = match filter.kind {
            Some(kind) => vec![table_for(kind)],
            None => TABLES.to_vec(),
        };

        for table in tables {
            let mut sql = format!(
                "SELECT id, persona, kind, content, importance, timestamp, last_access, \
                 access_count, tags, metadata, embedding FROM {} WHERE 1=1",
                table
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(persona) = filter.persona {
                sql.push_str(" AND persona = ?");
                args.push(Box::new(persona.as_str().to_string()));
            }
            if let Some(kind) = filter.kind {
                sql.push_str(" AND kind = ?");
                args.push(Box::new(kind.as_str().to_string()));
            }
            if let Some(ref text) = filter.text {
                if !text.is_empty() {
                    sql.push_str(" AND content LIKE ?");
                    args.push(Box::new(format!("%{}%", text)));
                }
            }
            for tag in &filter.tags {
                sql.push_str(" AND tags LIKE ?");
                args.push(Box::new(format!("%\"{}\"%", tag)));
            }
            if let Some(min) = filter.min_importance {
                sql.push_str(" AND importance >= ?");
                args.push(Box::new(min as f64));
            }
            if let Some(max) = filter.max_importance {
                sql.push_str(" AND importance <= ?");
                args.push(Box::new(max as f64));
            }

            sql.push_str(" ORDER BY importance DESC, timestamp DESC");
            if filter.limit > 0 {
                sql.push_str(&format!(" LIMIT {}", filter.limit));
            }

            let args_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(args_ref.as_slice(), Self::row_to_item)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            results.extend(rows);
        }

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        if filter.limit > 0 {
            results.truncate(filter.limit);
        }
        Ok(results)
    }

    /// List a persona's items of one kind, most important first
    pub fn list_kind(
        &self,
        persona: Persona,
        kind: MemoryKind,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        self.query_filtered(&DurableFilter {
            persona: Some(persona),
            kind: Some(kind),
            limit,
            ..Default::default()
        })
    }

    /// Record a successful recall on the stored row
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        for table in TABLES {
            conn.execute(
                &format!(
                    "UPDATE {} SET access_count = access_count + 1, last_access = ?1 \
                     WHERE id = ?2 AND last_access < ?1",
                    table
                ),
                params![now.to_rfc3339(), id],
            )?;
        }
        Ok(())
    }

    fn count_table(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
    }
}

#[async_trait]
impl MemoryBackend for DurableStore {
    async fn initialize(&self) -> Result<bool> {
        let ok = {
            let conn = self.conn.lock();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
        };
        self.available
            .store(ok, std::sync::atomic::Ordering::SeqCst);
        if ok {
            tracing::info!("Durable backend initialized");
        }
        Ok(ok)
    }

    async fn store(&self, item: &MemoryItem) -> Result<()> {
        let target = table_for(item.kind);
        let content_json = serde_json::to_string(&item.content)?;
        let tags_json = serde_json::to_string(&item.tags)?;
        let metadata_json = serde_json::to_string(&item.metadata)?;
        let embedding_bytes = Self::encode_embedding(&item.embedding);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // An id maps to at most one row across all tables
        for table in TABLES {
            if *table != target {
                tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![item.id])?;
            }
        }

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} \
                 (id, persona, kind, content, importance, timestamp, last_access, \
                  access_count, tags, metadata, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                target
            ),
            params![
                item.id,
                item.persona.as_str(),
                item.kind.as_str(),
                content_json,
                item.importance as f64,
                item.timestamp.to_rfc3339(),
                item.last_access.to_rfc3339(),
                item.access_count as i64,
                tags_json,
                metadata_json,
                embedding_bytes,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        let conn = self.conn.lock();
        for table in TABLES {
            let item = conn
                .query_row(
                    &format!(
                        "SELECT id, persona, kind, content, importance, timestamp, \
                         last_access, access_count, tags, metadata, embedding \
                         FROM {} WHERE id = ?1",
                        table
                    ),
                    params![id],
                    Self::row_to_item,
                )
                .optional()?;
            if item.is_some() {
                return Ok(item);
            }
        }
        Ok(None)
    }

    async fn search(&self, query: &MemoryQuery, persona: Persona) -> Result<Vec<MemoryItem>> {
        let mut results = Vec::new();
        let kinds: Vec<MemoryKind> = MemoryKind::all()
            .iter()
            .copied()
            .filter(|k| k.is_long_term() && query.wants_kind(*k))
            .collect();

        for kind in kinds {
            let hits = self.query_filtered(&DurableFilter {
                persona: Some(persona),
                kind: Some(kind),
                text: Some(query.text.trim().to_string()),
                tags: query.tags.clone().unwrap_or_default(),
                limit: query.limit,
                ..Default::default()
            })?;
            results.extend(hits);
        }

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let mut deleted = 0;
        for table in TABLES {
            deleted += conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])?;
        }
        Ok(deleted > 0)
    }

    async fn stats(&self) -> BackendStats {
        let conn = self.conn.lock();
        let mut details = HashMap::new();
        let mut total = 0_i64;
        for table in TABLES {
            let count = Self::count_table(&conn, table).unwrap_or(0);
            details.insert(format!("table_{}", table), serde_json::json!(count));
            total += count;
        }
        if let Ok(size) = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            details.insert("db_size_bytes".to_string(), serde_json::json!(size));
        }
        BackendStats {
            backend: "durable".to_string(),
            connected: self.available.load(std::sync::atomic::Ordering::SeqCst),
            item_count: total.max(0) as u64,
            details,
        }
    }

    async fn health(&self) -> BackendHealth {
        let start = Instant::now();
        let result = {
            let conn = self.conn.lock();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        };
        match result {
            Ok(_) => BackendHealth {
                healthy: true,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: None,
            },
            Err(e) => BackendHealth {
                healthy: false,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: Some(e.to_string()),
            },
        }
    }

    fn name(&self) -> &'static str {
        "durable"
    }
}

impl DurableStore {
    /// Convenience constructor for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}
