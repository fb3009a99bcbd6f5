//! Per-inode publication slot: first writer wins.

use std::sync::{Arc, Mutex, PoisonError};

use crate::context::CryptContext;

/// Holds the context published for one inode, along with the inode's own
/// reference to it.
#[derive(Default)]
pub struct CryptSlot {
    inner: Mutex<Option<Arc<CryptContext>>>,
}

impl CryptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `ctx` if the slot is empty. A slot that is already set is left
    /// alone and `ctx` comes back to the caller, who must release it.
    pub fn publish(&self, ctx: Arc<CryptContext>) -> Result<(), Arc<CryptContext>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.is_some() {
            return Err(ctx);
        }
        *inner = Some(ctx);
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<CryptContext>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Clear the slot, handing the inode's reference to the caller.
    pub fn take(&self) -> Option<Arc<CryptContext>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for CryptSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptSlot")
            .field("context", &self.current())
            .finish()
    }
}
