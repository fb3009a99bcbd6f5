//! Preallocated bounce pages for writing encrypted data.
//!
//! Filesystems that do not manage their own pages encrypt into a bounce
//! page rather than the page cache. Pages are zeroed when they go back to
//! the pool.

use std::sync::{Arc, Mutex, PoisonError};

use zeroize::Zeroize;

use fcrypt_core::{FcryptError, FcryptResult};

pub const PAGE_SIZE: usize = 4096;

/// Fixed-size pool of page buffers.
pub struct BouncePool {
    free: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
}

impl BouncePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let free = (0..capacity)
            .map(|_| vec![0u8; PAGE_SIZE].into_boxed_slice())
            .collect();
        Arc::new(Self {
            free: Mutex::new(free),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Take a page. Fails with `ResourceExhausted` when every page is out.
    pub fn get(self: &Arc<Self>) -> FcryptResult<BouncePage> {
        let page = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| {
                FcryptError::ResourceExhausted(format!(
                    "all {} bounce pages in use",
                    self.capacity
                ))
            })?;
        Ok(BouncePage {
            buf: Some(page),
            len: 0,
            pool: Arc::clone(self),
        })
    }

    fn put(&self, mut page: Box<[u8]>) {
        page.zeroize();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page);
    }
}

impl std::fmt::Debug for BouncePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BouncePool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A page borrowed from a [`BouncePool`]; returned on drop.
pub struct BouncePage {
    buf: Option<Box<[u8]>>,
    len: usize,
    pool: Arc<BouncePool>,
}

impl BouncePage {
    /// Copy `data` into the page and return the filled region.
    pub(crate) fn fill(&mut self, data: &[u8]) -> FcryptResult<&mut [u8]> {
        if data.len() > PAGE_SIZE {
            return Err(FcryptError::ResourceExhausted(format!(
                "{} bytes do not fit in a {PAGE_SIZE}-byte page",
                data.len()
            )));
        }
        let Some(buf) = self.buf.as_deref_mut() else {
            return Err(FcryptError::ResourceExhausted(
                "bounce page already returned".into(),
            ));
        };
        buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(&mut buf[..data.len()])
    }

    /// The filled part of the page.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().map_or(&[][..], |b| &b[..self.len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for BouncePage {
    fn drop(&mut self) {
        if let Some(page) = self.buf.take() {
            self.pool.put(page);
        }
    }
}

impl std::fmt::Debug for BouncePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BouncePage").field("len", &self.len).finish()
    }
}
