use anyhow::{Context, Result};
use cas::ContentHash;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{InsertOutcome, RecordStore};
use crate::asset::{AssetFlags, AssetMetadata, AssetRecord, AssetType};
use crate::id::AssetId;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS assetrefs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type INTEGER NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    local INTEGER NOT NULL DEFAULT 0,
    temporary INTEGER NOT NULL DEFAULT 0,
    create_time INTEGER NOT NULL,
    access_time INTEGER NOT NULL,
    hash TEXT NOT NULL,
    usesprocessed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_assetrefs_hash ON assetrefs(hash);
CREATE INDEX IF NOT EXISTS idx_assetrefs_sweep ON assetrefs(usesprocessed, access_time);

CREATE TABLE IF NOT EXISTS asset_references (
    asset_id TEXT NOT NULL REFERENCES assetrefs(id) ON DELETE CASCADE,
    referenced_id TEXT NOT NULL,
    PRIMARY KEY (asset_id, referenced_id)
);
CREATE INDEX IF NOT EXISTS idx_asset_references_target ON asset_references(referenced_id);
"#;

const RECORD_COLUMNS: &str =
    "id, name, type, flags, local, temporary, create_time, access_time, hash, usesprocessed";

/// SQLite-backed record store with connection-per-call.
/// Each method opens a fresh connection with WAL mode enabled.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Open database at path, creating if necessary
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let store = Self { path };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open record database: {:?}", self.path))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Ok(conn)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize record schema")?;
        Ok(())
    }

    fn load_references(conn: &Connection, id: &str) -> Result<Vec<AssetId>> {
        let mut stmt = conn.prepare_cached(
            "SELECT referenced_id FROM asset_references WHERE asset_id = ?1 ORDER BY referenced_id",
        )?;
        let rows = stmt.query_map([id], |row| parse_id(row, 0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load references")
    }

    fn write_references(conn: &Connection, id: &str, references: &[AssetId]) -> Result<()> {
        conn.execute("DELETE FROM asset_references WHERE asset_id = ?1", [id])?;
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO asset_references (asset_id, referenced_id) VALUES (?1, ?2)",
        )?;
        for reference in references {
            stmt.execute(params![id, reference.to_string()])?;
        }
        Ok(())
    }

    fn query_records(&self, sql: &str, param: impl rusqlite::Params) -> Result<Vec<AssetRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(param, record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for mut record in rows {
            if record.processed {
                record.references = Self::load_references(&conn, &record.id().to_string())?;
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<AssetId> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    let hash: String = row.get(8)?;
    let content_hash: ContentHash = hash.parse().map_err(|e| conversion_error(8, e))?;
    let flags: i64 = row.get(3)?;

    Ok(AssetRecord {
        metadata: AssetMetadata {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            asset_type: AssetType::from_code(row.get(2)?),
            flags: AssetFlags(flags as u32),
            local: row.get(4)?,
            temporary: row.get(5)?,
            create_time: row.get(6)?,
            access_time: row.get(7)?,
        },
        content_hash,
        references: Vec::new(),
        processed: row.get(9)?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: AssetId) -> Result<Option<AssetRecord>> {
        let records = self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM assetrefs WHERE id = ?1"),
            [id.to_string()],
        )?;
        Ok(records.into_iter().next())
    }

    fn existing(&self, ids: &[AssetId]) -> Result<HashSet<AssetId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM assetrefs WHERE id = ?1")?;
        let mut found = HashSet::new();
        for id in ids {
            if stmt.exists([id.to_string()])? {
                found.insert(*id);
            }
        }
        Ok(found)
    }

    fn insert(&self, record: &AssetRecord) -> Result<InsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = record.id().to_string();
        let meta = &record.metadata;

        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO assetrefs ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                id,
                meta.name,
                meta.asset_type.code(),
                i64::from(meta.flags.bits()),
                meta.local,
                meta.temporary,
                meta.create_time,
                meta.access_time,
                record.content_hash.as_str(),
                record.processed,
            ],
        )?;
        if inserted == 0 {
            return Ok(InsertOutcome::Duplicate);
        }

        if record.processed {
            Self::write_references(&tx, &id, &record.references)?;
        }
        tx.commit().context("Failed to commit record insert")?;
        Ok(InsertOutcome::Inserted)
    }

    fn replace(&self, record: &AssetRecord) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = record.id().to_string();
        let meta = &record.metadata;

        let updated = tx.execute(
            "UPDATE assetrefs SET name = ?2, type = ?3, flags = ?4, local = ?5, temporary = ?6,
                 create_time = ?7, access_time = ?8, hash = ?9, usesprocessed = ?10
             WHERE id = ?1",
            params![
                id,
                meta.name,
                meta.asset_type.code(),
                i64::from(meta.flags.bits()),
                meta.local,
                meta.temporary,
                meta.create_time,
                meta.access_time,
                record.content_hash.as_str(),
                record.processed,
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        let references: &[AssetId] = if record.processed {
            &record.references
        } else {
            &[]
        };
        Self::write_references(&tx, &id, references)?;
        tx.commit().context("Failed to commit record replace")?;
        Ok(true)
    }

    fn delete(&self, id: AssetId) -> Result<Option<ContentHash>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "DELETE FROM assetrefs WHERE id = ?1 RETURNING hash",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(hash) => Ok(Some(hash.parse()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_references(&self, id: AssetId, references: &[AssetId]) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = id.to_string();

        let updated = tx.execute(
            "UPDATE assetrefs SET usesprocessed = 1 WHERE id = ?1",
            [&id],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        Self::write_references(&tx, &id, references)?;
        tx.commit().context("Failed to commit reference set")?;
        Ok(true)
    }

    fn touch(&self, ids: &[AssetId], access_time: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached("UPDATE assetrefs SET access_time = ?2 WHERE id = ?1")?;
            for id in ids {
                updated += stmt.execute(params![id.to_string(), access_time])?;
            }
        }
        tx.commit().context("Failed to commit access times")?;
        Ok(updated)
    }

    fn stale_processed(&self, cutoff: i64) -> Result<Vec<AssetId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM assetrefs
             WHERE usesprocessed = 1 AND access_time < ?1
             ORDER BY access_time",
        )?;
        let ids = stmt
            .query_map([cutoff], |row| parse_id(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn referenced_by_other(&self, id: AssetId) -> Result<bool> {
        let conn = self.conn()?;
        let id = id.to_string();
        let mut stmt = conn.prepare(
            "SELECT 1 FROM asset_references WHERE referenced_id = ?1 AND asset_id != ?1 LIMIT 1",
        )?;
        Ok(stmt.exists([&id])?)
    }

    fn delete_if_collectable(&self, id: AssetId, cutoff: i64) -> Result<Option<ContentHash>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "DELETE FROM assetrefs
             WHERE id = ?1
               AND usesprocessed = 1
               AND access_time < ?2
               AND NOT EXISTS (
                   SELECT 1 FROM asset_references
                   WHERE referenced_id = ?1 AND asset_id != ?1
               )
             RETURNING hash",
            params![id.to_string(), cutoff],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(hash) => Ok(Some(hash.parse()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has_hash(&self, hash: &ContentHash) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM assetrefs WHERE hash = ?1 LIMIT 1")?;
        Ok(stmt.exists([hash.as_str()])?)
    }

    fn unprocessed(&self) -> Result<Vec<AssetId>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM assetrefs WHERE usesprocessed = 0 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| parse_id(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM assetrefs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn location(&self) -> String {
        let path = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        format!("sqlite:{}", path.display())
    }
}
