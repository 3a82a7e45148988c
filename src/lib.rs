//! MedLedger: tamper-evident authenticity ledger for pharmaceutical batches.
//!
//! This crate provides:
//! - A hash-linked, proof-of-work block log
//! - The medicine lifecycle state machine ([`engine::Engine`]) and its
//!   consensus-runtime rendition ([`contract::ContractLedger`]), both behind
//!   [`ledger::AuthenticityLedger`]
//! - The ordered batch verification algorithm, alerts and scan history
//! - Compact shareable batch proofs
//! - JSON snapshots, a SQLite store, and audit packs (JSON + LaTeX + PDF)
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod block;
pub mod contract;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod model;
pub mod proof;
pub mod query;
pub mod report;
pub mod shared;
pub mod store;
pub mod util;
pub mod verification;

pub use engine::Engine;
pub use error::{LedgerError, Result};
pub use ledger::AuthenticityLedger;
