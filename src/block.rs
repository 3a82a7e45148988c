//! Hash-linked, proof-of-work block log.
//!
//! Every block commits one opaque JSON payload.  A block's digest covers
//! `(index, previous_hash, timestamp, payload, nonce)` and must start with
//! `difficulty` zero hex characters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::util;

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREV_HASH: &str = "0";

pub const DEFAULT_DIFFICULTY: usize = 2;

/// Largest accepted difficulty.  Beyond this the sequential nonce search is
/// no longer practical, so such a configuration is refused up front.
pub const MAX_DIFFICULTY: usize = 6;

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub payload: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// Recompute the digest from the stored fields, including the stored nonce.
    pub fn compute_hash(&self) -> String {
        block_digest(
            self.index,
            &self.previous_hash,
            &self.timestamp,
            &self.payload,
            self.nonce,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

pub fn block_digest(
    index: u64,
    previous_hash: &str,
    timestamp: &str,
    payload: &serde_json::Value,
    nonce: u64,
) -> String {
    let preimage = format!(
        "{index}{previous_hash}{timestamp}{}{nonce}",
        util::canonical_json(payload)
    );
    util::sha256_hex(preimage.as_bytes())
}

/// Leading-zero predicate over the hex digest.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

pub fn genesis_payload() -> serde_json::Value {
    serde_json::json!({
        "event": "genesis",
        "message": "Genesis Block",
    })
}

fn validate_difficulty(difficulty: usize) -> Result<()> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::Config(format!(
            "difficulty {difficulty} out of range [0, {MAX_DIFFICULTY}]"
        )));
    }
    Ok(())
}

/// Sequential nonce search starting at 0.
///
/// Terminates for every difficulty accepted by [`validate_difficulty`].
fn mine(
    index: u64,
    previous_hash: String,
    timestamp: String,
    payload: serde_json::Value,
    difficulty: usize,
) -> Block {
    let mut nonce = 0u64;
    loop {
        let hash = block_digest(index, &previous_hash, &timestamp, &payload, nonce);
        if meets_difficulty(&hash, difficulty) {
            debug!(index, nonce, difficulty, "block mined");
            return Block {
                index,
                timestamp,
                payload,
                previous_hash,
                hash,
                nonce,
            };
        }
        nonce += 1;
    }
}

// ---------------------------------------------------------------------------
// Block log
// ---------------------------------------------------------------------------

/// Ordered block sequence.  Never empty: block 0 is the genesis anchor.
#[derive(Debug, Clone)]
pub struct BlockLog {
    blocks: Vec<Block>,
    difficulty: usize,
}

impl BlockLog {
    /// Start a new log with a freshly mined genesis block.
    pub fn new(difficulty: usize) -> Result<Self> {
        validate_difficulty(difficulty)?;
        let genesis = mine(
            0,
            GENESIS_PREV_HASH.to_string(),
            util::now_utc_rfc3339(),
            genesis_payload(),
            difficulty,
        );
        Ok(Self {
            blocks: vec![genesis],
            difficulty,
        })
    }

    /// Rebuild a log from persisted blocks.  Linkage is not checked here;
    /// callers run [`BlockLog::verify_integrity`] before trusting the result.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: usize) -> Result<Self> {
        validate_difficulty(difficulty)?;
        match blocks.first() {
            None => Err(LedgerError::ChainIntegrity("chain has no genesis block".into())),
            Some(g) if g.index != 0 => Err(LedgerError::ChainIntegrity(format!(
                "first block has index {}, expected 0",
                g.index
            ))),
            Some(_) => Ok(Self { blocks, difficulty }),
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn head(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Mine a block on top of the current head and make it the new head.
    pub fn append(&mut self, payload: serde_json::Value) -> &Block {
        let head = self.head();
        let block = mine(
            head.index + 1,
            head.hash.clone(),
            util::now_utc_rfc3339(),
            payload,
            self.difficulty,
        );
        self.blocks.push(block);
        self.head()
    }

    /// Walk the chain from block 1, recomputing every digest and checking
    /// linkage to the prior block.  Stops at the first mismatch.
    pub fn verify_integrity(&self) -> bool {
        let Some(genesis) = self.blocks.first() else {
            return false;
        };
        if genesis.compute_hash() != genesis.hash
            || !meets_difficulty(&genesis.hash, self.difficulty)
        {
            return false;
        }
        for pair in self.blocks.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if cur.index != prev.index + 1 {
                return false;
            }
            if cur.previous_hash != prev.hash {
                return false;
            }
            if cur.compute_hash() != cur.hash {
                return false;
            }
            if !meets_difficulty(&cur.hash, self.difficulty) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn genesis_is_mined_and_anchored() {
        let log = BlockLog::new(DEFAULT_DIFFICULTY).unwrap();
        assert_eq!(log.len(), 1);
        let g = log.head();
        assert!(g.is_genesis());
        assert_eq!(g.previous_hash, GENESIS_PREV_HASH);
        assert!(g.hash.starts_with("00"));
        assert_eq!(g.payload["event"], "genesis");
        assert!(log.verify_integrity());
    }

    #[test]
    fn append_links_to_head() {
        let mut log = BlockLog::new(DEFAULT_DIFFICULTY).unwrap();
        let genesis_hash = log.head().hash.clone();
        let b = log.append(json!({"event": "test", "n": 1})).clone();
        assert_eq!(b.index, 1);
        assert_eq!(b.previous_hash, genesis_hash);
        assert_eq!(b.compute_hash(), b.hash);
        assert!(meets_difficulty(&b.hash, 2));
        assert_eq!(log.len(), 2);
        assert!(log.verify_integrity());
    }

    #[test]
    fn payload_tamper_detected() {
        let mut log = BlockLog::new(1).unwrap();
        log.append(json!({"v": 1}));
        log.append(json!({"v": 2}));
        assert!(log.verify_integrity());

        let mut blocks = log.blocks().to_vec();
        blocks[1].payload = json!({"v": 999});
        let tampered = BlockLog::from_blocks(blocks, 1).unwrap();
        assert!(!tampered.verify_integrity());
    }

    #[test]
    fn nonce_tamper_detected() {
        let mut log = BlockLog::new(1).unwrap();
        log.append(json!({"v": 1}));
        let mut blocks = log.blocks().to_vec();
        blocks[1].nonce += 1;
        assert!(!BlockLog::from_blocks(blocks, 1).unwrap().verify_integrity());
    }

    #[test]
    fn relinked_block_detected() {
        let mut log = BlockLog::new(1).unwrap();
        log.append(json!({"v": 1}));
        log.append(json!({"v": 2}));
        let mut blocks = log.blocks().to_vec();
        // Re-mine block 2 against a forged parent: its own hash is valid but linkage is not.
        let forged = mine(2, "f".repeat(64), blocks[2].timestamp.clone(), json!({"v": 2}), 1);
        blocks[2] = forged;
        assert!(!BlockLog::from_blocks(blocks, 1).unwrap().verify_integrity());
    }

    #[test]
    fn zero_difficulty_accepts_any_digest() {
        let mut log = BlockLog::new(0).unwrap();
        let b = log.append(json!({"v": 1}));
        assert_eq!(b.nonce, 0);
        assert!(log.verify_integrity());
    }

    #[test]
    fn excessive_difficulty_is_a_config_error() {
        let err = BlockLog::new(MAX_DIFFICULTY + 1).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn from_blocks_requires_genesis() {
        assert!(BlockLog::from_blocks(vec![], 2).is_err());
    }

    #[test]
    fn lookup_by_index() {
        let mut log = BlockLog::new(1).unwrap();
        log.append(json!({"v": 1}));
        assert_eq!(log.get(1).map(|b| b.index), Some(1));
        assert!(log.get(2).is_none());
    }

    #[test]
    fn difficulty_predicate() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abcd", 0));
        assert!(!meets_difficulty("0", 2));
    }
}
