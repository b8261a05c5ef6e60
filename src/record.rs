//! Tenant record store
//!
//! Durable list of known tenants. The supervisor only ever reads records
//! through the [`RecordStore`] trait; creation and mutation belong to
//! external collaborators (admin surface, tenant provisioning), which use
//! the concrete store types directly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Durable description of one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Unique, stable tenant identifier
    pub name: String,
    /// Opaque configuration blob handed to the application factory
    #[serde(default)]
    pub options: serde_json::Value,
    /// Shown in pinned tenant listings
    #[serde(default)]
    pub pinned: bool,
    /// Runs only under `Single` mode; excluded from multi-tenant management
    #[serde(default)]
    pub standalone_deployment: bool,
    /// Boot eagerly during the host startup sweep
    #[serde(default)]
    pub auto_start: bool,
    /// Routing hostname mapped to this tenant by the gateway
    #[serde(default)]
    pub cname: Option<String>,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Value::Object(Default::default()),
            pinned: false,
            standalone_deployment: false,
            auto_start: false,
            cname: None,
            created_at: Utc::now(),
        }
    }
}

/// Filter for record queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub name: Option<String>,
    pub cname: Option<String>,
    pub pinned: Option<bool>,
    pub auto_start: Option<bool>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_cname(cname: impl Into<String>) -> Self {
        Self {
            cname: Some(cname.into()),
            ..Self::default()
        }
    }

    pub fn pinned() -> Self {
        Self {
            pinned: Some(true),
            ..Self::default()
        }
    }

    pub fn auto_start() -> Self {
        Self {
            auto_start: Some(true),
            ..Self::default()
        }
    }

    fn matches(&self, record: &TenantRecord) -> bool {
        if let Some(name) = &self.name {
            if &record.name != name {
                return false;
            }
        }
        if let Some(cname) = &self.cname {
            if record.cname.as_deref() != Some(cname.as_str()) {
                return false;
            }
        }
        if let Some(pinned) = self.pinned {
            if record.pinned != pinned {
                return false;
            }
        }
        if let Some(auto_start) = self.auto_start {
            if record.auto_start != auto_start {
                return false;
            }
        }
        true
    }
}

/// Read access to the durable tenant list
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, filter: RecordFilter) -> Result<Vec<TenantRecord>>;

    async fn find_one(&self, filter: RecordFilter) -> Result<Option<TenantRecord>> {
        Ok(self.find(filter).await?.into_iter().next())
    }
}

/// SQLite-backed record store with thread-safe access
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open tenant database")?;

        // WAL for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations()?;

        info!("Tenant record store opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory tenant database")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!(
                "Running tenant store migrations from v{} to v{}",
                current_version, SCHEMA_VERSION
            );

            if current_version < 1 {
                Self::migrate_v1(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration v1: tenants table
    fn migrate_v1(conn: &Connection) -> Result<()> {
        debug!("Applying tenant store migration v1: initial schema");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                name TEXT PRIMARY KEY,
                options TEXT NOT NULL DEFAULT '{}',
                pinned INTEGER NOT NULL DEFAULT 0,
                standalone_deployment INTEGER NOT NULL DEFAULT 0,
                auto_start INTEGER NOT NULL DEFAULT 0,
                cname TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tenants_cname ON tenants(cname);

            INSERT INTO schema_migrations (version) VALUES (1);
            "#,
        )?;

        Ok(())
    }

    /// Insert or replace a tenant record (collaborator/admin surface)
    pub fn insert(&self, record: &TenantRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tenants
                (name, options, pinned, standalone_deployment, auto_start, cname, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.name,
                serde_json::to_string(&record.options)?,
                record.pinned,
                record.standalone_deployment,
                record.auto_start,
                record.cname,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete a tenant record by name; missing names are a no-op
    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tenants WHERE name = ?1", [name])?;
        Ok(())
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<TenantRecord>> {
        let conn = self.conn.lock();

        let mut sql = String::from(
            "SELECT name, options, pinned, standalone_deployment, auto_start, cname, created_at
             FROM tenants",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &filter.name {
            clauses.push("name = ?");
            params.push(Box::new(name.clone()));
        }
        if let Some(cname) = &filter.cname {
            clauses.push("cname = ?");
            params.push(Box::new(cname.clone()));
        }
        if let Some(pinned) = filter.pinned {
            clauses.push("pinned = ?");
            params.push(Box::new(pinned));
        }
        if let Some(auto_start) = filter.auto_start {
            clauses.push("auto_start = ?");
            params.push(Box::new(auto_start));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY name");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| {
                let options_json: String = row.get(1)?;
                let created_at_raw: String = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    options_json,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    created_at_raw,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (name, options_json, pinned, standalone_deployment, auto_start, cname, created_at_raw) =
                row?;
            let options = serde_json::from_str(&options_json)
                .with_context(|| format!("Invalid options JSON for tenant '{}'", name))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
                .with_context(|| format!("Invalid created_at for tenant '{}'", name))?
                .with_timezone(&Utc);

            records.push(TenantRecord {
                name,
                options,
                pinned,
                standalone_deployment,
                auto_start,
                cname,
                created_at,
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find(&self, filter: RecordFilter) -> Result<Vec<TenantRecord>> {
        self.query(&filter)
    }
}

/// In-memory record store, used by tests and embedded setups
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<TenantRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TenantRecord) {
        let mut records = self.records.write();
        records.retain(|r| r.name != record.name);
        records.push(record);
    }

    pub fn remove(&self, name: &str) {
        self.records.write().retain(|r| r.name != name);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find(&self, filter: RecordFilter) -> Result<Vec<TenantRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<TenantRecord> {
        let mut acme = TenantRecord::new("acme");
        acme.auto_start = true;
        acme.cname = Some("acme.example.com".to_string());
        acme.options = serde_json::json!({ "locale": "en-US" });

        let mut beta = TenantRecord::new("beta");
        beta.pinned = true;

        let mut solo = TenantRecord::new("solo");
        solo.standalone_deployment = true;

        vec![acme, beta, solo]
    }

    #[tokio::test]
    async fn test_memory_store_filters() {
        let store = MemoryRecordStore::new();
        for record in sample_records() {
            store.insert(record);
        }

        let all = store.find(RecordFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);

        let by_name = store.find_one(RecordFilter::by_name("acme")).await.unwrap();
        assert_eq!(by_name.unwrap().name, "acme");

        let by_cname = store
            .find_one(RecordFilter::by_cname("acme.example.com"))
            .await
            .unwrap();
        assert_eq!(by_cname.unwrap().name, "acme");

        let pinned = store.find(RecordFilter::pinned()).await.unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].name, "beta");

        let auto = store.find(RecordFilter::auto_start()).await.unwrap();
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].name, "acme");

        assert!(store
            .find_one(RecordFilter::by_name("ghost"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_store_insert_replaces() {
        let store = MemoryRecordStore::new();
        store.insert(TenantRecord::new("acme"));

        let mut updated = TenantRecord::new("acme");
        updated.pinned = true;
        store.insert(updated);

        let all = store.find(RecordFilter::all()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].pinned);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        for record in sample_records() {
            store.insert(&record).unwrap();
        }

        let all = store.find(RecordFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);

        let acme = store
            .find_one(RecordFilter::by_name("acme"))
            .await
            .unwrap()
            .unwrap();
        assert!(acme.auto_start);
        assert_eq!(acme.cname.as_deref(), Some("acme.example.com"));
        assert_eq!(acme.options["locale"], "en-US");

        let solo = store
            .find_one(RecordFilter::by_name("solo"))
            .await
            .unwrap()
            .unwrap();
        assert!(solo.standalone_deployment);
    }

    #[tokio::test]
    async fn test_sqlite_store_cname_lookup() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        for record in sample_records() {
            store.insert(&record).unwrap();
        }

        let hit = store
            .find_one(RecordFilter::by_cname("acme.example.com"))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().name, "acme");

        let miss = store
            .find_one(RecordFilter::by_cname("nope.example.com"))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_remove_is_idempotent() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.insert(&TenantRecord::new("acme")).unwrap();

        store.remove("acme").unwrap();
        store.remove("acme").unwrap();
        store.remove("never-existed").unwrap();

        assert!(store
            .find_one(RecordFilter::by_name("acme"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.sqlite");

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.insert(&TenantRecord::new("acme")).unwrap();
        }

        let store = SqliteRecordStore::open(&path).unwrap();
        let acme = store.find_one(RecordFilter::by_name("acme")).await.unwrap();
        assert!(acme.is_some());
    }
}
