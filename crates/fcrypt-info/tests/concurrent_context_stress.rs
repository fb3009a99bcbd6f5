//! Concurrency tests for context publication and the reference count.
//!
//! Many threads build contexts for the same inode at once; exactly one may
//! become visible and every other one must be fully destroyed. Handles taken
//! for in-flight I/O race with eviction; teardown must happen exactly once,
//! after the last handle is gone.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use fcrypt_core::{EncryptionMode, FileType};

#[test]
fn concurrent_ensure_publishes_exactly_one_context() {
    const THREADS: usize = 32;

    let backend = CountingBackend::new();
    let keyring = keyring_with("fscrypt:", &DESCRIPTOR, &[0x42; 64]);
    let km = Arc::new(manager(&backend, &keyring));
    let fs = Arc::new(FakeFs::new());
    let inode = Arc::new(FakeInode::new(1, FileType::Regular));
    fs.set_policy(1, EncryptionMode::Aes256Xts, EncryptionMode::Aes256Cts);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let km = Arc::clone(&km);
            let fs = Arc::clone(&fs);
            let inode = Arc::clone(&inode);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                km.ensure_encryption_info(inode.as_ref(), fs.as_ref())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked").expect("ensure failed");
    }

    // One xts(aes) transform survives; every loser's was dropped.
    assert!(inode.slot.is_set());
    assert_eq!(backend.live(), 1);
    let built = backend.allocations_of("xts(aes)");
    assert!((1..=THREADS).contains(&built));

    let ctx = inode.slot.current().unwrap();
    assert_eq!(ctx.ref_count(), 1);

    km.release_encryption_info(inode.as_ref());
    assert!(ctx.is_torn_down());
    assert_eq!(backend.live(), 0);
}

#[test]
fn concurrent_cbc_contexts_share_one_essiv_hash() {
    const THREADS: usize = 16;

    let backend = CountingBackend::new();
    let keyring = keyring_with("fscrypt:", &DESCRIPTOR, &[0x17; 16]);
    let km = Arc::new(manager(&backend, &keyring));
    let fs = Arc::new(FakeFs::new());
    for ino in 0..THREADS as u64 {
        fs.set_policy(ino, EncryptionMode::Aes128Cbc, EncryptionMode::Aes128Cts);
    }
    let inodes: Vec<_> = (0..THREADS as u64)
        .map(|ino| Arc::new(FakeInode::new(ino, FileType::Regular)))
        .collect();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = inodes
        .iter()
        .map(|inode| {
            let km = Arc::clone(&km);
            let fs = Arc::clone(&fs);
            let inode = Arc::clone(inode);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                km.ensure_encryption_info(inode.as_ref(), fs.as_ref())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // Per inode: cbc(aes) + ESSIV aes. Plus the single shared sha256.
    assert_eq!(backend.live(), THREADS * 2 + 1);

    for inode in &inodes {
        km.release_encryption_info(inode.as_ref());
    }
    assert_eq!(backend.live(), 1);

    // The shared hash lives exactly as long as its manager.
    assert!(km.essiv_hash().is_initialized());
    drop(km);
    assert_eq!(backend.live(), 0);
}

#[test]
fn acquire_release_races_with_eviction() {
    const THREADS: usize = 16;
    const ITERATIONS: usize = 500;

    let backend = CountingBackend::new();
    let keyring = keyring_with("fscrypt:", &DESCRIPTOR, &[0x42; 64]);
    let km = Arc::new(manager(&backend, &keyring));
    let fs = FakeFs::new();
    let inode = Arc::new(FakeInode::new(9, FileType::Regular));
    fs.set_policy(9, EncryptionMode::Aes256Xts, EncryptionMode::Aes256Cts);
    km.ensure_encryption_info(inode.as_ref(), &fs).unwrap();
    let ctx = inode.slot.current().unwrap();

    let acquired = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let km = Arc::clone(&km);
            let inode = Arc::clone(&inode);
            let acquired = Arc::clone(&acquired);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..ITERATIONS {
                    let Some(handle) = km.acquire_context(inode.as_ref()) else {
                        continue;
                    };
                    acquired.fetch_add(1, Ordering::Relaxed);
                    // While a handle is held the transforms must be usable.
                    let mut block = [i as u8; 32];
                    handle.encrypt_block(i as u64, &mut block).unwrap();
                    km.release_context(handle);
                }
            })
        })
        .collect();

    barrier.wait();
    thread::yield_now();
    km.release_encryption_info(inode.as_ref());

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert!(!inode.slot.is_set());
    assert!(ctx.is_torn_down());
    assert_eq!(ctx.ref_count(), 0);
    assert!(ctx.acquire().is_none());
    // The single xts(aes) transform was dropped exactly once.
    assert_eq!(backend.allocations_of("xts(aes)"), 1);
    assert_eq!(backend.live(), 0);
    assert!(acquired.load(Ordering::Relaxed) <= THREADS * ITERATIONS);
}

#[test]
fn handles_on_stale_context_survive_re_ensure() {
    let backend = CountingBackend::new();
    let keyring = keyring_with("fscrypt:", &DESCRIPTOR, &[0x42; 64]);
    let km = manager(&backend, &keyring);
    let fs = FakeFs::new();
    let inode = FakeInode::new(3, FileType::Regular);
    fs.set_policy(3, EncryptionMode::Aes256Xts, EncryptionMode::Aes256Cts);

    km.ensure_encryption_info(&inode, &fs).unwrap();
    let old = km.acquire_context(&inode).unwrap();
    km.release_encryption_info(&inode);

    // A fresh context replaces the evicted one while the old handle lives.
    km.ensure_encryption_info(&inode, &fs).unwrap();
    let new = km.acquire_context(&inode).unwrap();
    assert!(!Arc::ptr_eq(old.context(), new.context()));
    assert_eq!(backend.live(), 2);

    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    old.encrypt_block(0, &mut a).unwrap();
    new.encrypt_block(0, &mut b).unwrap();
    assert_eq!(a, b);

    drop(old);
    assert_eq!(backend.live(), 1);
    drop(new);
    km.release_encryption_info(&inode);
    assert_eq!(backend.live(), 0);
}
