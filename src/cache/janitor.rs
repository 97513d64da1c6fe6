//! Background maintenance for the macro cache directory.
//!
//! The janitor wakes on a fixed interval, measures the cache, and deletes
//! entries that have not been accessed recently, but only once the cache as
//! a whole is big enough to be worth pruning: size drives eviction, age
//! only filters what may go. Deletions happen under the same metadata lock
//! the serving path takes when recording a generated entry, so the race
//! between "about to serve/regenerate this file" and "about to delete it"
//! resolves safely in either order; the loser simply sees a fresh state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use tracing::{debug, info, warn};

use crate::cache::generate::{CacheOptions, CacheShared, MacroCache};

/// Handle to a running janitor. Stopping (or dropping) the handle ends the
/// loop before its next tick; a scan already underway runs to completion.
pub struct JanitorHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl JanitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MacroCache {
    /// Start the background cache janitor for this cache.
    pub fn spawn_janitor(&self) -> JanitorHandle {
        let shared = self.shared().clone();
        let options = self.options().clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("macro-cache-janitor".into())
            .spawn(move || run(shared, options, stop_rx))
            .expect("spawn janitor thread");

        JanitorHandle {
            stop: stop_tx,
            thread: Some(thread),
        }
    }

    /// Run one janitor scan synchronously, outside the background loop.
    pub fn sweep(&self) {
        sweep_once(
            self.shared(),
            self.options().min_prune_bytes,
            self.options().max_access_age,
        );
    }
}

fn run(shared: Arc<CacheShared>, options: CacheOptions, stop: Receiver<()>) {
    info!(
        poll = ?options.poll_interval,
        max_age = ?options.max_access_age,
        min_prune_bytes = options.min_prune_bytes,
        "starting macro cache janitor"
    );

    let ticker = tick(options.poll_interval);
    loop {
        select! {
            recv(stop) -> _ => {
                info!("macro cache janitor exiting");
                return;
            }
            recv(ticker) -> _ => {
                sweep_once(&shared, options.min_prune_bytes, options.max_access_age);
            }
        }
    }
}

fn sweep_once(shared: &Arc<CacheShared>, min_prune_bytes: u64, max_access_age: Duration) {
    // Phase 1: list the cache directory.
    let entries = match std::fs::read_dir(&shared.dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "reading cache directory (continuing)");
            return;
        }
    };

    // Phase 2: select removal candidates by access age, totalling sizes.
    let mut total_size = 0u64;
    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        total_size += metadata.len();

        let Ok(accessed) = metadata.accessed() else {
            continue;
        };
        let age = accessed.elapsed().unwrap_or_default();
        if age > max_access_age {
            candidates.push(entry.path());
        }
    }

    // A small cache is left alone no matter how stale its entries are.
    if total_size <= min_prune_bytes || candidates.is_empty() {
        return;
    }

    // Phase 3: evict under the metadata lock. If a request wins the race it
    // finishes serving before we unlink; if we win, the request regenerates.
    let _guard = shared.meta_lock.lock();
    for path in candidates {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                shared.etags.remove(&path);
                debug!(path = %path.display(), "evicted macro cache entry");
            }
            Err(e) => {
                // Best effort; the next tick gets another chance.
                warn!(path = %path.display(), error = %e, "evicting cache entry (skipped)");
            }
        }
    }
}
