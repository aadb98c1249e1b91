//! Epoch-based software transactional memory over scalar cells.
//!
//! Reads and writes of shared [`TCell`]s grouped into a transaction execute
//! atomically and in isolation, with serializable semantics and no
//! hand-written locking. Non-conflicting transactions run fully in
//! parallel.
//!
//! # Architecture
//!
//! A [`Context`] owns a global epoch clock that names commit moments; every
//! cell carries the epoch of the commit that last wrote it.
//!
//! - **Reads**: optimistic. No lock is taken; every cell load is checked
//!   against the epoch snapshot the transaction started from, so the
//!   snapshot is validated field by field as it is consumed. A stale load
//!   restarts the thunk under the fallback lock in shared mode, where no
//!   writer can commit.
//! - **Writes**: buffered thread-locally. The thunk runs without any lock;
//!   the commit takes the fallback lock exclusively, revalidates every
//!   cell the transaction read, publishes the buffered writes and advances
//!   the epoch by one.
//! - **Contention**: a stale read or a failed validation re-runs the thunk
//!   while holding the fallback lock exclusively. Nothing can commit
//!   concurrently, so the re-execution always succeeds and progress is
//!   guaranteed.
//!
//! DANGER AHEAD: a thunk may run more than once. Keep IO and other side
//! effects out of it.
//!
//! # Example
//!
//! ```
//! use epoch_stm::{Context, TCell};
//!
//! let ctx = Context::new();
//! let x = TCell::new(0i64);
//! let y = TCell::new(0i64);
//!
//! ctx.write_tx(|| {
//!     let v = x.get()?;
//!     x.set(v + 1);
//!     y.set(v + 1);
//!     Ok(())
//! });
//!
//! let (a, b) = ctx.read_tx(|| Ok((x.get()?, y.get()?)));
//! assert_eq!(a, b);
//! ```

#![warn(missing_docs)]

mod cell;
mod errors;
mod scalar;
mod transaction;

pub use cell::TCell;
pub use errors::{Stale, StmResult};
pub use scalar::Scalar;

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

use transaction::{ActiveTx, Mode};

/// The STM engine: epoch clock, fallback lock and retry counters.
///
/// Any number of threads may run transactions against one context. Several
/// independent contexts can coexist; a transaction is scoped to exactly
/// one, and cells shared between threads must always be accessed through
/// transactions on the same context (this is not enforced; cells carry no
/// back-pointer).
///
/// The context must outlive every transaction that runs on it, as must
/// every cell those transactions touch.
pub struct Context {
    /// Names commit moments. Advanced by exactly one per successful write
    /// commit, only while `fallback` is held exclusively.
    epoch: CachePadded<AtomicU64>,
    /// Serializes commits, and contended re-executions with them.
    fallback: RwLock<()>,
    read_retries: AtomicU64,
    write_retries: AtomicU64,
}

impl Context {
    /// Create a context with a fresh epoch clock.
    pub const fn new() -> Self {
        Self {
            epoch: CachePadded::new(AtomicU64::new(0)),
            fallback: RwLock::new(()),
            read_retries: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
        }
    }

    /// Run `f` as a read transaction and return its result.
    ///
    /// Every [`TCell::get`] inside `f` either returns a value consistent
    /// with the epoch snapshot taken at entry or yields [`Stale`]; the
    /// thunk propagates the signal with `?`. On a stale read the driver
    /// re-runs `f` with the fallback lock held in shared mode. Writers
    /// commit under the exclusive lock, so the second pass cannot observe
    /// a stale cell.
    ///
    /// `f` may run twice and must not rely on running once.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already active on the calling thread.
    pub fn read_tx<F, R>(&self, mut f: F) -> R
    where
        F: FnMut() -> StmResult<R>,
    {
        transaction::with(|tctx| {
            tctx.begin(
                self as *const Self as usize,
                Mode::Read,
                self.epoch.load(Ordering::Acquire),
            );
            let _active = ActiveTx { tctx };

            match f() {
                Ok(val) => val,
                Err(Stale) => {
                    self.read_retries.fetch_add(1, Ordering::Relaxed);
                    let _shared = self.fallback.read();
                    tctx.restart(self.epoch.load(Ordering::Acquire));
                    match f() {
                        Ok(val) => val,
                        // No writer can commit while we hold the lock in
                        // shared mode.
                        Err(Stale) => unreachable!("stale read under the fallback lock"),
                    }
                }
            }
        })
    }

    /// Run `f` as a write transaction and return its result.
    ///
    /// `f` executes speculatively with no lock held: reads register in the
    /// read set and validate against the snapshot, writes are buffered in
    /// the write set. On return the commit takes the fallback lock
    /// exclusively, revalidates every registered cell and publishes the
    /// buffered writes at a fresh epoch. A stale read or a failed
    /// validation re-runs `f` under the exclusive lock instead; that pass
    /// validates trivially and always commits.
    ///
    /// `f` may run twice and must not rely on running once.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already active on the calling thread.
    pub fn write_tx<F, R>(&self, mut f: F) -> R
    where
        F: FnMut() -> StmResult<R>,
    {
        transaction::with(|tctx| {
            tctx.begin(
                self as *const Self as usize,
                Mode::Write,
                self.epoch.load(Ordering::Relaxed),
            );
            let _active = ActiveTx { tctx };

            // Speculative pass: the lock is taken only to validate and
            // publish.
            if let Ok(val) = f() {
                let lock = self.fallback.write();
                if tctx.validate() {
                    let commit_epoch = self.epoch.load(Ordering::Relaxed) + 1;
                    tctx.publish(commit_epoch);
                    self.epoch.store(commit_epoch, Ordering::Release);
                    drop(lock);
                    return val;
                }
                drop(lock);
            }

            // Contended path: with the lock held exclusively nothing can
            // commit under us, so the re-execution cannot fail.
            self.write_retries.fetch_add(1, Ordering::Relaxed);
            let _exclusive = self.fallback.write();
            tctx.restart(self.epoch.load(Ordering::Relaxed));
            let val = match f() {
                Ok(val) => val,
                Err(Stale) => unreachable!("stale read under the fallback lock"),
            };
            let commit_epoch = tctx.start_epoch() + 1;
            tctx.publish(commit_epoch);
            self.epoch.store(commit_epoch, Ordering::Release);
            val
        })
    }

    /// Number of read transactions that fell back to the shared lock.
    pub fn read_retries(&self) -> u64 {
        self.read_retries.load(Ordering::Relaxed)
    }

    /// Number of write transactions that fell back to the exclusive lock.
    pub fn write_retries(&self) -> u64 {
        self.write_retries.load(Ordering::Relaxed)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Global context for callers that do not need multiple engines.
pub static GLOBAL: Context = Context::new();

/// Run a read transaction on the [`GLOBAL`] context.
pub fn read_tx<F, R>(f: F) -> R
where
    F: FnMut() -> StmResult<R>,
{
    GLOBAL.read_tx(f)
}

/// Run a write transaction on the [`GLOBAL`] context.
pub fn write_tx<F, R>(f: F) -> R
where
    F: FnMut() -> StmResult<R>,
{
    GLOBAL.write_tx(f)
}
