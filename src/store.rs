//! Durable persistence for the in-process engine.
//!
//! Two forms: a self-describing JSON snapshot (backup / transport) and an
//! append-only SQLite store that the CLI reopens between invocations.
//! Both reload through [`Engine::restore`], which re-walks the chain.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::block::Block;
use crate::engine::Engine;
use crate::error::{LedgerError, Result, ResultExt as _};
use crate::model::{Alert, Medicine, ScanEntry, Transaction};
use crate::util;

pub const SNAPSHOT_FORMAT: &str = "medledger-snapshot-v1";
pub const STORE_SCHEMA_VERSION: i64 = 1;

const STATE_KEYS: [&str; 4] = ["medicines", "transactions", "alerts", "scan_history"];

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Complete engine state: the block log plus everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub format: String,
    pub exported_at_utc: String,
    pub difficulty: usize,
    pub blocks: Vec<Block>,
    pub medicines: BTreeMap<String, Medicine>,
    pub transactions: Vec<Transaction>,
    pub alerts: Vec<Alert>,
    pub scan_history: Vec<ScanEntry>,
}

/// Export the full engine state to a pretty-printed JSON file.
pub fn export_json(engine: &Engine, out_path: &Path) -> Result<()> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .ctx_store(&format!("create dir {}", parent.display()))?;
    }
    let snapshot = engine.snapshot();
    let json = serde_json::to_vec_pretty(&snapshot).ctx_store("serialize snapshot")?;
    std::fs::write(out_path, json)
        .ctx_store(&format!("write export {}", out_path.display()))?;
    info!(
        path = %out_path.display(),
        blocks = snapshot.blocks.len(),
        medicines = snapshot.medicines.len(),
        "ledger exported"
    );
    Ok(())
}

/// Import a JSON snapshot.  The chain is re-verified before the engine is
/// handed back; a tampered file is refused with `ChainIntegrity`.
pub fn import_json(json_path: &Path) -> Result<Engine> {
    let bytes = std::fs::read(json_path)
        .ctx_store(&format!("read import {}", json_path.display()))?;
    let snapshot: LedgerSnapshot =
        serde_json::from_slice(&bytes).ctx_store("parse ledger snapshot")?;
    let blocks = snapshot.blocks.len();
    let engine = Engine::restore(snapshot)?;
    info!(blocks, "ledger imported and verified");
    Ok(engine)
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_id: Uuid,
    pub created_at_utc: String,
    pub schema_version: i64,
    pub difficulty: usize,
}

pub struct SqliteStore {
    conn: Connection,
    meta: StoreMeta,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn create_new(db_path: &Path, difficulty: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .ctx_store(&format!("create db parent dir {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .ctx_store(&format!("open db {}", db_path.display()))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;

            CREATE TABLE IF NOT EXISTS meta(
              k TEXT PRIMARY KEY,
              v TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blocks(
              idx INTEGER PRIMARY KEY,
              ts_utc TEXT NOT NULL,
              previous_hash TEXT NOT NULL,
              hash TEXT NOT NULL,
              nonce INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS state(
              k TEXT PRIMARY KEY,
              v TEXT NOT NULL
            );
            "#,
        )
        .ctx_store("create tables")?;

        let meta = StoreMeta {
            store_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: STORE_SCHEMA_VERSION,
            difficulty,
        };
        for (k, v) in [
            ("store_id", meta.store_id.to_string()),
            ("created_at_utc", meta.created_at_utc.clone()),
            ("schema_version", meta.schema_version.to_string()),
            ("difficulty", meta.difficulty.to_string()),
        ] {
            conn.execute("INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)", params![k, v])?;
        }

        info!(path = %db_path.display(), store_id = %meta.store_id, "store created");
        Ok(Self { conn, meta })
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(LedgerError::Store(format!(
                "database {} does not exist",
                db_path.display()
            )));
        }
        let conn = Connection::open(db_path)
            .ctx_store(&format!("open db {}", db_path.display()))?;

        let read = |k: &str| -> Result<String> {
            conn.query_row("SELECT v FROM meta WHERE k=?1", params![k], |row| row.get(0))
                .ctx_store(&format!("read {k}"))
        };
        let schema_version: i64 = read("schema_version")?
            .parse()
            .ctx_store("parse schema_version")?;
        if schema_version != STORE_SCHEMA_VERSION {
            return Err(LedgerError::Store(format!(
                "unsupported schema_version {schema_version} (expected {STORE_SCHEMA_VERSION})"
            )));
        }
        let meta = StoreMeta {
            store_id: Uuid::parse_str(&read("store_id")?).ctx_store("parse store_id uuid")?,
            created_at_utc: read("created_at_utc")?,
            schema_version,
            difficulty: read("difficulty")?.parse().ctx_store("parse difficulty")?,
        };
        Ok(Self { conn, meta })
    }

    /// Open the store at `db_path`, creating it when absent.  An existing
    /// store keeps the difficulty it was created with.
    pub fn open_or_create(db_path: &Path, difficulty: usize) -> Result<Self> {
        if !db_path.exists() {
            return Self::create_new(db_path, difficulty);
        }
        let store = Self::open_existing(db_path)?;
        if store.meta.difficulty != difficulty {
            warn!(
                stored = store.meta.difficulty,
                configured = difficulty,
                "configured difficulty ignored for existing store"
            );
        }
        Ok(store)
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Number of blocks persisted so far.
    pub fn stored_height(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .ctx_store("count blocks")?;
        Ok(n as u64)
    }

    /// Persist a snapshot.  Blocks already on disk are never rewritten: only
    /// blocks beyond the stored head are inserted, and the stored head must
    /// still be part of the snapshot's chain.  Returns the number of blocks
    /// appended.
    pub fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<usize> {
        if snapshot.difficulty != self.meta.difficulty {
            return Err(LedgerError::Store(format!(
                "snapshot difficulty {} does not match store difficulty {}",
                snapshot.difficulty, self.meta.difficulty
            )));
        }

        let db_tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_store("begin tx")?;

        let head: Option<(i64, String)> = db_tx
            .query_row(
                "SELECT idx, hash FROM blocks ORDER BY idx DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let start = match head {
            Some((idx, hash)) => {
                let matches = snapshot
                    .blocks
                    .get(idx as usize)
                    .is_some_and(|b| b.hash == hash);
                if !matches {
                    return Err(LedgerError::Store(format!(
                        "stored chain diverges from snapshot at block #{idx}"
                    )));
                }
                idx as usize + 1
            }
            None => 0,
        };

        let mut appended = 0usize;
        for b in &snapshot.blocks[start..] {
            let payload_json =
                serde_json::to_string(&b.payload).ctx_store("serialize block payload")?;
            db_tx
                .execute(
                    r#"
                    INSERT INTO blocks(idx, ts_utc, previous_hash, hash, nonce, payload_json)
                    VALUES (?1,?2,?3,?4,?5,?6)
                    "#,
                    params![
                        b.index as i64,
                        b.timestamp,
                        b.previous_hash,
                        b.hash,
                        b.nonce as i64,
                        payload_json,
                    ],
                )
                .ctx_store("insert block")?;
            appended += 1;
        }

        let state = [
            serde_json::to_string(&snapshot.medicines),
            serde_json::to_string(&snapshot.transactions),
            serde_json::to_string(&snapshot.alerts),
            serde_json::to_string(&snapshot.scan_history),
        ];
        for (k, v) in STATE_KEYS.iter().zip(state) {
            let v = v.ctx_store(&format!("serialize {k}"))?;
            db_tx
                .execute("INSERT OR REPLACE INTO state(k,v) VALUES (?1,?2)", params![k, v])
                .ctx_store("write state")?;
        }

        db_tx.commit().ctx_store("commit tx")?;
        if appended > 0 {
            info!(appended, height = snapshot.blocks.len(), "store updated");
        }
        Ok(appended)
    }

    /// Load the persisted state, or `None` for a store that has never been
    /// saved to.
    pub fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT idx, ts_utc, previous_hash, hash, nonce, payload_json
                FROM blocks
                ORDER BY idx ASC
                "#,
            )
            .ctx_store("prepare select blocks")?;

        let mut rows = stmt.query([]).ctx_store("query blocks")?;
        let mut blocks = Vec::new();
        while let Some(row) = rows.next().ctx_store("next row")? {
            let idx: i64 = row.get(0)?;
            let payload_json: String = row.get(5)?;
            let nonce: i64 = row.get(4)?;
            blocks.push(Block {
                index: idx as u64,
                timestamp: row.get(1)?,
                previous_hash: row.get(2)?,
                hash: row.get(3)?,
                nonce: nonce as u64,
                payload: serde_json::from_str(&payload_json)
                    .ctx_store(&format!("parse payload of block #{idx}"))?,
            });
        }
        if blocks.is_empty() {
            return Ok(None);
        }

        let read_state = |k: &str| -> Result<Option<String>> {
            Ok(self
                .conn
                .query_row("SELECT v FROM state WHERE k=?1", params![k], |row| row.get(0))
                .optional()?)
        };
        let medicines = match read_state("medicines")? {
            Some(v) => serde_json::from_str(&v).ctx_store("parse medicines")?,
            None => BTreeMap::new(),
        };
        let transactions = match read_state("transactions")? {
            Some(v) => serde_json::from_str(&v).ctx_store("parse transactions")?,
            None => Vec::new(),
        };
        let alerts = match read_state("alerts")? {
            Some(v) => serde_json::from_str(&v).ctx_store("parse alerts")?,
            None => Vec::new(),
        };
        let scan_history = match read_state("scan_history")? {
            Some(v) => serde_json::from_str(&v).ctx_store("parse scan_history")?,
            None => Vec::new(),
        };

        Ok(Some(LedgerSnapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            exported_at_utc: util::now_utc_rfc3339(),
            difficulty: self.meta.difficulty,
            blocks,
            medicines,
            transactions,
            alerts,
            scan_history,
        }))
    }

    /// Load the persisted engine, or start a fresh one at the store's
    /// difficulty.
    pub fn load_engine(&self) -> Result<Engine> {
        match self.load()? {
            Some(snapshot) => Engine::restore(snapshot),
            None => Engine::new(self.meta.difficulty),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
