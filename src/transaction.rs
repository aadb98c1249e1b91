use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use foldhash::fast::FixedState;

use crate::cell::Slot;

/// Mode of the active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Read,
    Write,
}

/// A write buffered by the current transaction, keyed in the write set by
/// the slot's address.
struct PendingWrite {
    slot: *const Slot,
    bits: u64,
}

/// Per-thread transaction state.
///
/// `ctx` holds the address of the `Context` the active transaction belongs
/// to, zero when the thread is idle. The read and write sets are populated
/// in write mode only and are empty whenever `ctx` is zero; the driver
/// restores that state on every exit path via [`ActiveTx`].
pub(crate) struct ThreadCtx {
    ctx: Cell<usize>,
    mode: Cell<Mode>,
    start_epoch: Cell<u64>,
    /// Stamp addresses observed by the running write transaction, to be
    /// revalidated at commit. Insertion is idempotent.
    read_set: RefCell<HashSet<*const AtomicU64, FixedState>>,
    /// Pending writes keyed by slot address. Insertion replaces, so the
    /// last write to a cell wins.
    write_set: RefCell<HashMap<usize, PendingWrite, FixedState>>,
}

thread_local! {
    static TCTX: ThreadCtx = ThreadCtx::new();
}

/// Run `f` against the calling thread's transaction state.
pub(crate) fn with<R>(f: impl FnOnce(&ThreadCtx) -> R) -> R {
    TCTX.with(|tctx| f(tctx))
}

/// Run `f` against the calling thread's *active* transaction.
///
/// # Panics
///
/// Panics when no transaction is active; cell access outside `read_tx` /
/// `write_tx` is a contract violation.
pub(crate) fn with_active<R>(f: impl FnOnce(&ThreadCtx) -> R) -> R {
    TCTX.with(|tctx| {
        assert!(tctx.ctx.get() != 0, "cell access outside a transaction");
        f(tctx)
    })
}

impl ThreadCtx {
    fn new() -> Self {
        Self {
            ctx: Cell::new(0),
            mode: Cell::new(Mode::Read),
            start_epoch: Cell::new(0),
            read_set: RefCell::new(HashSet::with_hasher(FixedState::default())),
            write_set: RefCell::new(HashMap::with_hasher(FixedState::default())),
        }
    }

    #[inline]
    pub(crate) fn mode(&self) -> Mode {
        self.mode.get()
    }

    #[inline]
    pub(crate) fn start_epoch(&self) -> u64 {
        self.start_epoch.get()
    }

    /// Enter a transaction scoped to the context at address `ctx`.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already active on this thread.
    pub(crate) fn begin(&self, ctx: usize, mode: Mode, start_epoch: u64) {
        assert!(
            self.ctx.get() == 0,
            "a transaction is already active on this thread"
        );
        debug_assert!(self.read_set.borrow().is_empty());
        debug_assert!(self.write_set.borrow().is_empty());
        self.mode.set(mode);
        self.start_epoch.set(start_epoch);
        self.ctx.set(ctx);
    }

    /// Reset for a fallback re-execution: fresh snapshot epoch, both sets
    /// dropped so the re-run publishes exactly what it writes.
    pub(crate) fn restart(&self, start_epoch: u64) {
        self.start_epoch.set(start_epoch);
        self.read_set.borrow_mut().clear();
        self.write_set.borrow_mut().clear();
    }

    /// Leave the transaction, discarding any buffered state.
    fn finish(&self) {
        self.ctx.set(0);
        self.read_set.borrow_mut().clear();
        self.write_set.borrow_mut().clear();
    }

    /// Pending value buffered for `slot`, if the running transaction wrote
    /// it (read-your-own-writes).
    #[inline]
    pub(crate) fn pending(&self, slot: &Slot) -> Option<u64> {
        self.write_set
            .borrow()
            .get(&(slot as *const Slot as usize))
            .map(|w| w.bits)
    }

    /// Record `slot` in the read set.
    #[inline]
    pub(crate) fn record_read(&self, slot: &Slot) {
        self.read_set.borrow_mut().insert(slot.stamp_addr());
    }

    /// Buffer a write of `bits` to `slot`, replacing any earlier pending
    /// write to the same slot.
    ///
    /// # Panics
    ///
    /// Panics when the active transaction is a read transaction.
    pub(crate) fn record_write(&self, slot: &Slot, bits: u64) {
        assert!(
            self.mode.get() == Mode::Write,
            "write to a cell inside a read transaction"
        );
        self.write_set.borrow_mut().insert(
            slot as *const Slot as usize,
            PendingWrite {
                slot: slot as *const Slot,
                bits,
            },
        );
    }

    /// Check that nothing in the read or write set was committed past the
    /// snapshot. Must be called with the commit lock held.
    pub(crate) fn validate(&self) -> bool {
        let start = self.start_epoch.get();
        for &stamp in self.read_set.borrow().iter() {
            // SAFETY: cells recorded in the read set outlive the
            // transaction, per the `TCell` ownership contract.
            if unsafe { (*stamp).load(Ordering::Relaxed) } > start {
                return false;
            }
        }
        for write in self.write_set.borrow().values() {
            // SAFETY: as above.
            if !unsafe { (*write.slot).can_commit(start) } {
                return false;
            }
        }
        true
    }

    /// Publish every buffered write at `commit_epoch`. Must be called with
    /// the commit lock held exclusively.
    pub(crate) fn publish(&self, commit_epoch: u64) {
        for write in self.write_set.borrow().values() {
            // SAFETY: as in `validate`.
            unsafe { (*write.slot).commit(commit_epoch, write.bits) };
        }
    }
}

/// RAII guard restoring the thread's idle state on every driver exit path,
/// including unwinds out of the user thunk.
pub(crate) struct ActiveTx<'a> {
    pub(crate) tctx: &'a ThreadCtx,
}

impl Drop for ActiveTx<'_> {
    fn drop(&mut self) {
        self.tctx.finish();
    }
}
