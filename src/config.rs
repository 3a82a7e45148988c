//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `medledger.toml` next to the executable
//! 3. `$HOME/.config/medledger/config.toml` (`%LOCALAPPDATA%\MedLedger\config.toml` on Windows)
//! 4. Environment variable overrides (e.g. `MEDLEDGER_DB`)
//!
//! CLI arguments always take precedence over config file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::block::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::engine::DEFAULT_CALLER;
use crate::error::{LedgerError, Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MedLedgerConfig {
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
    pub report_out_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Leading zero hex characters required of every mined block hash.
    pub difficulty: usize,
    /// Identity recorded on transactions when the CLI does not pass `--as`.
    pub operator_id: String,
    pub recent_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines structured log file.
    /// Empty string means no file logging.
    pub json_log_file: String,
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("medledger.db"),
            report_out_dir: PathBuf::from("medledger-audit-pack"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            operator_id: DEFAULT_CALLER.to_string(),
            recent_limit: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl MedLedgerConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: MedLedgerConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("medledger.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("MedLedger").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("medledger")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(db) = std::env::var("MEDLEDGER_DB") {
            self.paths.db = PathBuf::from(db);
        }
        if let Ok(level) = std::env::var("MEDLEDGER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(d) = std::env::var("MEDLEDGER_DIFFICULTY") {
            self.engine.difficulty = d
                .trim()
                .parse()
                .ctx_config("MEDLEDGER_DIFFICULTY must be an integer")?;
        }
        if let Ok(op) = std::env::var("MEDLEDGER_OPERATOR") {
            self.engine.operator_id = op;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.engine.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "difficulty {} exceeds maximum {MAX_DIFFICULTY}",
                self.engine.difficulty
            )));
        }
        if self.engine.operator_id.trim().is_empty() {
            return Err(LedgerError::Config("operator_id must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = MedLedgerConfig::default();
        assert_eq!(cfg.engine.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(cfg.engine.operator_id, "system");
        assert_eq!(cfg.paths.db, PathBuf::from("medledger.db"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = MedLedgerConfig::load_from(Path::new("nonexistent_file_xyz.toml")).unwrap();
        assert_eq!(cfg.engine.recent_limit, 10);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[engine]
difficulty = 3
operator_id = "PHARM-7"
"#;
        let cfg: MedLedgerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.engine.difficulty, 3);
        assert_eq!(cfg.engine.operator_id, "PHARM-7");
        // Other sections should be defaults.
        assert_eq!(cfg.paths.db, PathBuf::from("medledger.db"));
        assert_eq!(cfg.engine.recent_limit, 10);
    }

    #[test]
    fn excessive_difficulty_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medledger.toml");
        std::fs::write(&path, "[engine]\ndifficulty = 9\n").unwrap();
        let err = MedLedgerConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }
}
