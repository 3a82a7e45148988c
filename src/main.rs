use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use medledger_core::{
    config::{EngineConfig, LoggingConfig, MedLedgerConfig},
    error::{ExitCode, LedgerError},
    model::{MedicineDetails, RegisterMedicine, SupplyStage},
    proof::BatchProof,
    report,
    store::{self, SqliteStore},
    util, AuthenticityLedger as _, Engine,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "medledger",
    version = util::VERSION,
    about = "Tamper-evident authenticity ledger for pharmaceutical batches"
)]
struct Cli {
    /// Path to the ledger database (SQLite).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Caller identity recorded on transactions (defaults to `[engine] operator_id`).
    #[arg(long = "as", global = true)]
    caller: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new ledger database holding only the genesis block.
    Init {
        #[arg(long)]
        difficulty: Option<usize>,
    },

    /// Register a new medicine batch.
    Register {
        #[arg(long)]
        batch_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        manufacturer_id: String,
        #[arg(long, default_value = "")]
        manufacturer_name: String,
        /// YYYY-MM-DD or RFC 3339.
        #[arg(long)]
        manufactured: String,
        /// YYYY-MM-DD or RFC 3339.
        #[arg(long)]
        expires: String,
        #[command(flatten)]
        details: DetailsArgs,
    },

    /// Replace the descriptive details of a registered batch.
    SetDetails {
        #[arg(long)]
        batch_id: String,
        #[command(flatten)]
        details: DetailsArgs,
    },

    /// Verify a batch.  Exits with status 10 when it is not authentic.
    Verify {
        batch_id: String,
    },

    /// Record a supply-chain checkpoint.
    Transfer {
        #[arg(long)]
        batch_id: String,
        /// Manufactured, QualityChecked, Shipped, InTransit, Delivered, Dispensed or free text.
        #[arg(long)]
        stage: String,
        /// Defaults to the caller identity.
        #[arg(long, default_value = "")]
        actor: String,
        #[arg(long, default_value = "")]
        location: String,
    },

    MarkSold {
        batch_id: String,
    },

    /// Flag a batch as suspected counterfeit.
    Flag {
        batch_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Raise a free-standing alert.
    Alert {
        batch_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Show one batch record.
    Show {
        batch_id: String,
    },

    /// Print blocks, oldest first.
    Chain {
        #[arg(long)]
        limit: Option<usize>,
    },

    Alerts,

    Stats,

    /// Most recent transactions, newest first.
    Recent {
        #[arg(long)]
        n: Option<usize>,
    },

    Search {
        query: String,
    },

    /// Print the shareable proof payload for a batch.
    Proof {
        batch_id: String,
    },

    /// Cross-check a proof payload against the ledger.
    CheckProof {
        payload: String,
    },

    /// Re-walk the whole chain.
    VerifyChain,

    /// Bulk-register batches from a CSV file.
    ImportCsv {
        #[arg(long)]
        csv: PathBuf,
    },

    /// Verify every batch listed in a CSV and write an audit pack.
    Audit {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Export the full ledger state to a JSON snapshot.
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a JSON snapshot into a new database.
    Import {
        #[arg(long)]
        json: PathBuf,
        /// Path for the new database (must not already exist).
        #[arg(long)]
        target_db: PathBuf,
    },

    /// Print version information.
    Version,
}

#[derive(clap::Args, Debug, Default)]
struct DetailsArgs {
    #[arg(long = "type", default_value = "")]
    medicine_type: String,
    #[arg(long, default_value = "")]
    quantity: String,
    #[arg(long, default_value = "")]
    composition: String,
    #[arg(long, default_value = "")]
    destination: String,
    #[arg(long, default_value = "")]
    price: String,
}

impl From<DetailsArgs> for MedicineDetails {
    fn from(a: DetailsArgs) -> Self {
        Self {
            medicine_type: a.medicine_type,
            quantity: a.quantity,
            composition: a.composition,
            destination: a.destination,
            price: a.price,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.downcast_ref::<LedgerError>()
                .map(ExitCode::from)
                .unwrap_or(ExitCode::InternalError)
        }
    };
    std::process::exit(code as i32);
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = MedLedgerConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env().context("apply environment overrides")?;

    init_logging(&cfg.logging)?;

    let db_path = cli.db.clone().unwrap_or(cfg.paths.db.clone());
    util::validate_path(&db_path, "db")?;
    let caller = cli
        .caller
        .clone()
        .unwrap_or_else(|| cfg.engine.operator_id.clone());

    match cli.cmd {
        Commands::Init { difficulty } => {
            anyhow::ensure!(
                !db_path.exists(),
                "database {} already exists -- will not overwrite",
                db_path.display()
            );
            let engine_cfg = EngineConfig {
                difficulty: difficulty.unwrap_or(cfg.engine.difficulty),
                ..cfg.engine.clone()
            };
            let difficulty = engine_cfg.difficulty;
            let engine = Engine::from_config(&engine_cfg)?;
            let mut store =
                SqliteStore::create_new(&db_path, difficulty).context("create store")?;
            store.save(&engine.snapshot()).context("save genesis")?;
            info!(store_id = %store.meta().store_id, difficulty, "ledger initialized");
        }

        Commands::Register {
            batch_id,
            name,
            manufacturer_id,
            manufacturer_name,
            manufactured,
            expires,
            details,
        } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let committed = engine
                .register(RegisterMedicine {
                    batch_id,
                    name,
                    manufacturer_id,
                    manufacturer_name,
                    manufacturing_date: manufactured,
                    expiry_date: expires,
                    details: details.into(),
                })
                .context("register medicine")?;
            save(&mut store, &engine)?;
            print_json(&committed)?;
        }

        Commands::SetDetails { batch_id, details } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let record = engine
                .set_details(&batch_id, details.into())
                .context("set details")?;
            save(&mut store, &engine)?;
            print_json(&record)?;
        }

        Commands::Verify { batch_id } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let outcome = engine.verify(&batch_id);
            save(&mut store, &engine)?;
            for check in outcome.failed_checks() {
                warn!(
                    batch_id = %batch_id,
                    check = %check.name,
                    detail = %check.detail,
                    "check failed"
                );
            }
            print_json(&outcome)?;
            if !outcome.is_authentic {
                return Ok(ExitCode::NotAuthentic);
            }
        }

        Commands::Transfer {
            batch_id,
            stage,
            actor,
            location,
        } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let committed = engine
                .transfer(&batch_id, SupplyStage::from(stage), &actor, &location)
                .context("transfer")?;
            save(&mut store, &engine)?;
            print_json(&committed.record.supply_chain)?;
        }

        Commands::MarkSold { batch_id } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let record = engine.mark_sold(&batch_id).context("mark sold")?;
            save(&mut store, &engine)?;
            print_json(&record)?;
        }

        Commands::Flag { batch_id, reason } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let alert = engine.flag_medicine(&batch_id, &reason);
            save(&mut store, &engine)?;
            print_json(&alert)?;
        }

        Commands::Alert { batch_id, reason } => {
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;
            let alert = engine.create_alert(&batch_id, &reason);
            save(&mut store, &engine)?;
            print_json(&alert)?;
        }

        Commands::Show { batch_id } => {
            let engine = open_readonly(&db_path)?;
            let record = engine
                .medicine(&batch_id)
                .ok_or_else(|| LedgerError::BatchNotFound(batch_id.clone()))?;
            print_json(record)?;
        }

        Commands::Chain { limit } => {
            let engine = open_readonly(&db_path)?;
            let blocks = engine.blocks();
            let shown = &blocks[..limit.unwrap_or(blocks.len()).min(blocks.len())];
            print_json(shown)?;
        }

        Commands::Alerts => {
            let engine = open_readonly(&db_path)?;
            print_json(engine.alerts())?;
        }

        Commands::Stats => {
            let engine = open_readonly(&db_path)?;
            print_json(&engine.stats())?;
        }

        Commands::Recent { n } => {
            let engine = open_readonly(&db_path)?;
            let n = n.unwrap_or(cfg.engine.recent_limit);
            print_json(&engine.recent_transactions(n))?;
        }

        Commands::Search { query } => {
            let engine = open_readonly(&db_path)?;
            print_json(&engine.search(&query))?;
        }

        Commands::Proof { batch_id } => {
            let engine = open_readonly(&db_path)?;
            let proof = engine.proof(&batch_id).context("issue proof")?;
            println!("{}", proof.encode()?);
        }

        Commands::CheckProof { payload } => {
            let engine = open_readonly(&db_path)?;
            let proof = BatchProof::decode(&payload).context("decode proof")?;
            let check = engine.check_proof(&proof);
            print_json(&check)?;
            if !check.valid {
                return Ok(ExitCode::NotAuthentic);
            }
        }

        Commands::VerifyChain => {
            // Restoring re-walks the chain and fails on any broken link.
            let engine = open_readonly(&db_path)?;
            info!(blocks = engine.chain_len(), "chain verification passed");
            println!("chain verified: {} blocks", engine.chain_len());
        }

        Commands::ImportCsv { csv } => {
            let csv = util::canonicalize_if_exists(&csv, "csv")?;
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;

            let mut rdr = csv::Reader::from_path(&csv)
                .with_context(|| format!("open csv: {}", csv.display()))?;
            let mut imported = 0usize;
            let mut skipped = 0usize;
            for (row_count, rec) in rdr.deserialize::<CsvMedicineRow>().enumerate() {
                if row_count >= util::MAX_CSV_ROWS {
                    anyhow::bail!("csv exceeds maximum row limit of {}", util::MAX_CSV_ROWS);
                }
                let row = rec.context("parse csv row")?;
                let batch_id = row.batch_id.clone();
                match engine.register(row.into()) {
                    Ok(_) => imported += 1,
                    Err(e @ (LedgerError::DuplicateBatch(_) | LedgerError::InvalidInput(_))) => {
                        warn!(batch_id = %batch_id, error = %e, "row rejected; skipping");
                        skipped += 1;
                    }
                    Err(e) => return Err(e).context("register medicine"),
                }
            }
            save(&mut store, &engine)?;
            info!(imported, skipped, "csv import finished");
            println!("imported {imported}, skipped {skipped}");
        }

        Commands::Audit { csv, out_dir } => {
            let csv = util::canonicalize_if_exists(&csv, "csv")?;
            let out = out_dir.unwrap_or(cfg.paths.report_out_dir.clone());
            let (mut store, mut engine) = open_writable(&db_path, &cfg, &caller)?;

            let mut rdr = csv::Reader::from_path(&csv)
                .with_context(|| format!("open csv: {}", csv.display()))?;
            let headers = rdr.headers().context("read csv headers")?.clone();
            if !headers.iter().any(|h| h.eq_ignore_ascii_case("batch_id")) {
                anyhow::bail!("csv missing required header 'batch_id'");
            }

            let mut failed = 0usize;
            for (row_count, rec) in rdr.deserialize::<CsvAuditRow>().enumerate() {
                if row_count >= util::MAX_CSV_ROWS {
                    anyhow::bail!("csv exceeds maximum row limit of {}", util::MAX_CSV_ROWS);
                }
                let row = rec.context("parse csv row")?;
                if !engine.verify(row.batch_id.trim()).is_authentic {
                    failed += 1;
                }
            }
            save(&mut store, &engine)?;

            let manifest =
                report::write_audit_pack(&out, &engine).context("write audit pack")?;
            info!(out_dir = %out.display(), failed, "audit pack generated");
            print_json(&manifest)?;
            if failed > 0 {
                return Ok(ExitCode::NotAuthentic);
            }
        }

        Commands::Export { out } => {
            let engine = open_readonly(&db_path)?;
            store::export_json(&engine, &out).context("export ledger")?;
        }

        Commands::Import { json, target_db } => {
            anyhow::ensure!(
                !target_db.exists(),
                "target database {} already exists -- will not overwrite",
                target_db.display()
            );
            util::validate_path(&target_db, "target db")?;
            let engine = store::import_json(&json).context("import ledger")?;
            let mut target = SqliteStore::create_new(&target_db, engine.chain().difficulty())
                .context("create target store")?;
            save(&mut target, &engine)?;
            info!(
                blocks = engine.chain_len(),
                "ledger imported to {}",
                target_db.display()
            );
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(ExitCode::Ok)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_writable(
    db_path: &Path,
    cfg: &MedLedgerConfig,
    caller: &str,
) -> Result<(SqliteStore, Engine)> {
    let store = SqliteStore::open_or_create(db_path, cfg.engine.difficulty)
        .context("open/create store")?;
    let mut engine = store.load_engine().context("load ledger")?;
    engine.set_caller(caller);
    Ok((store, engine))
}

fn open_readonly(db_path: &Path) -> Result<Engine> {
    let store = SqliteStore::open_existing(db_path).context("open store")?;
    store.load_engine().context("load ledger")
}

fn save(store: &mut SqliteStore, engine: &Engine) -> Result<()> {
    store.save(&engine.snapshot()).context("save ledger")?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CsvMedicineRow {
    batch_id: String,
    name: String,
    manufacturer_id: String,
    #[serde(default)]
    manufacturer_name: String,
    manufacturing_date: String,
    expiry_date: String,
    #[serde(default, rename = "type")]
    medicine_type: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    composition: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    price: String,
}

impl From<CsvMedicineRow> for RegisterMedicine {
    fn from(r: CsvMedicineRow) -> Self {
        Self {
            batch_id: r.batch_id.trim().to_string(),
            name: r.name,
            manufacturer_id: r.manufacturer_id,
            manufacturer_name: r.manufacturer_name,
            manufacturing_date: r.manufacturing_date.trim().to_string(),
            expiry_date: r.expiry_date.trim().to_string(),
            details: MedicineDetails {
                medicine_type: r.medicine_type,
                quantity: r.quantity,
                composition: r.composition,
                destination: r.destination,
                price: r.price,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvAuditRow {
    batch_id: String,
}

fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Human-readable to stderr; stdout carries command output.
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
