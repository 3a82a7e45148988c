//! Thread-safe handle around any [`AuthenticityLedger`].
//!
//! Readers share the lock; each mutation holds the write lock for the whole
//! operation, so block appends are totally ordered and a reader never sees
//! a half-applied mutation.  An optional persist hook runs after every
//! mutation while the write lock is still held.

use std::sync::{Arc, Mutex, RwLock};

use tracing::error;

use crate::error::{LedgerError, Result};
use crate::ledger::{AuthenticityLedger, Committed};
use crate::model::{Alert, Medicine, RegisterMedicine, SupplyStage};
use crate::query::Stats;
use crate::verification::VerificationOutcome;

pub type PersistHook<L> = Box<dyn FnMut(&L) -> Result<()> + Send>;

pub struct SharedLedger<L> {
    inner: Arc<RwLock<L>>,
    persist: Arc<Mutex<Option<PersistHook<L>>>>,
}

impl<L> Clone for SharedLedger<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            persist: Arc::clone(&self.persist),
        }
    }
}

impl<L> std::fmt::Debug for SharedLedger<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLedger")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Other("ledger lock poisoned".into())
}

impl<L: AuthenticityLedger> SharedLedger<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ledger)),
            persist: Arc::new(Mutex::new(None)),
        }
    }

    /// Wrap `ledger` and call `hook` with the post-mutation state after each
    /// successful write.
    pub fn with_persist<F>(ledger: L, hook: F) -> Self
    where
        F: FnMut(&L) -> Result<()> + Send + 'static,
    {
        Self {
            inner: Arc::new(RwLock::new(ledger)),
            persist: Arc::new(Mutex::new(Some(Box::new(hook)))),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&L) -> R) -> Result<R> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(f(&*guard))
    }

    /// Run `f` under the write lock, then persist.  A persist failure is
    /// returned to the caller; the in-memory mutation is already committed.
    pub fn write<R>(&self, f: impl FnOnce(&mut L) -> R) -> Result<R> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let out = f(&mut *guard);
        let mut hook = self.persist.lock().map_err(|_| poisoned())?;
        if let Some(persist) = hook.as_mut() {
            if let Err(e) = persist(&*guard) {
                error!(error = %e, "persist after mutation failed");
                return Err(e);
            }
        }
        Ok(out)
    }

    /// Like [`write`](Self::write) for operations that can fail their
    /// preconditions.  Nothing is persisted when `f` fails.
    pub fn try_write<R>(&self, f: impl FnOnce(&mut L) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let out = f(&mut *guard)?;
        let mut hook = self.persist.lock().map_err(|_| poisoned())?;
        if let Some(persist) = hook.as_mut() {
            persist(&*guard)?;
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Convenience wrappers
    // -----------------------------------------------------------------------

    pub fn register(&self, req: RegisterMedicine) -> Result<Committed> {
        self.try_write(|l| l.register(req))
    }

    pub fn verify(&self, batch_id: &str) -> Result<VerificationOutcome> {
        self.write(|l| l.verify(batch_id))
    }

    pub fn transfer(
        &self,
        batch_id: &str,
        stage: SupplyStage,
        actor: &str,
        location: &str,
    ) -> Result<Committed> {
        self.try_write(|l| l.transfer(batch_id, stage, actor, location))
    }

    pub fn mark_sold(&self, batch_id: &str) -> Result<Medicine> {
        self.try_write(|l| l.mark_sold(batch_id))
    }

    pub fn flag_medicine(&self, batch_id: &str, reason: &str) -> Result<Alert> {
        self.write(|l| l.flag_medicine(batch_id, reason))
    }

    pub fn medicine(&self, batch_id: &str) -> Result<Option<Medicine>> {
        self.read(|l| l.medicine(batch_id).cloned())
    }

    pub fn stats(&self) -> Result<Stats> {
        self.read(|l| l.stats())
    }

    pub fn chain_len(&self) -> Result<usize> {
        self.read(|l| l.chain_len())
    }

    pub fn verify_integrity(&self) -> Result<bool> {
        self.read(|l| l.verify_integrity())
    }
}
