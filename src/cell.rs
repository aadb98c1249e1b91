use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Stale, StmResult};
use crate::scalar::Scalar;
use crate::transaction::{self, Mode};

/// Untyped cell storage: the committed value's bit pattern next to the
/// epoch stamp of the commit that produced it.
///
/// Readers load `bits` first (Acquire) and `stamp` second; [`Slot::commit`]
/// stores them in the opposite order. A reader that observes a freshly
/// committed value therefore cannot miss its stamp, which is what makes the
/// relaxed stamp loads sound.
pub(crate) struct Slot {
    bits: AtomicU64,
    stamp: AtomicU64,
}

impl Slot {
    fn new(bits: u64) -> Self {
        Self {
            bits: AtomicU64::new(bits),
            stamp: AtomicU64::new(0),
        }
    }

    /// Address of this slot's epoch stamp; the stable identity recorded in
    /// the read set.
    #[inline]
    pub(crate) fn stamp_addr(&self) -> *const AtomicU64 {
        &self.stamp
    }

    /// Snapshot read against `start_epoch`. Stale if the slot was committed
    /// past the snapshot.
    #[inline]
    fn read(&self, start_epoch: u64) -> StmResult<u64> {
        let bits = self.bits.load(Ordering::Acquire);
        if self.stamp.load(Ordering::Relaxed) > start_epoch {
            return Err(Stale);
        }
        Ok(bits)
    }

    /// Whether a transaction started at `start_epoch` may still publish to
    /// this slot. Only meaningful while the commit lock is held.
    #[inline]
    pub(crate) fn can_commit(&self, start_epoch: u64) -> bool {
        self.stamp.load(Ordering::Relaxed) <= start_epoch
    }

    /// Publish a pending write at `epoch`. The stamp goes first, then the
    /// value with Release, pairing with the Acquire load in [`Slot::read`].
    /// Only called while the commit lock is held exclusively.
    #[inline]
    pub(crate) fn commit(&self, epoch: u64, bits: u64) {
        self.stamp.store(epoch, Ordering::Relaxed);
        self.bits.store(bits, Ordering::Release);
    }
}

/// A transactional cell holding a single scalar value.
///
/// Cells are the unit of conflict detection: a [`write_tx`] that reads or
/// writes a cell conflicts with any concurrent commit touching the same
/// cell. Access is only legal inside a transaction; [`TCell::get`] and
/// [`TCell::set`] consult the calling thread's active transaction and
/// panic outside one.
///
/// Cells are caller-owned and must outlive every transaction that touches
/// them; the runtime keeps no reference to a cell between transactions.
///
/// ```
/// use epoch_stm::{Context, TCell};
///
/// let ctx = Context::new();
/// let hits = TCell::new(0u64);
///
/// ctx.write_tx(|| hits.update(|n| n + 1));
/// assert_eq!(ctx.read_tx(|| hits.get()), 1);
/// ```
///
/// [`write_tx`]: crate::Context::write_tx
pub struct TCell<T> {
    slot: Slot,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T: Scalar> TCell<T> {
    /// Create a cell holding `val`, stamped with epoch zero.
    pub fn new(val: T) -> Self {
        Self {
            slot: Slot::new(val.to_bits()),
            _marker: PhantomData,
        }
    }

    /// Read the cell inside the active transaction.
    ///
    /// In a read transaction this returns a value consistent with the
    /// transaction's snapshot or [`Stale`]. In a write transaction a value
    /// pending in the write set is returned as-is (read-your-own-writes);
    /// otherwise the cell is recorded in the read set and read against the
    /// snapshot.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is active on the calling thread.
    pub fn get(&self) -> StmResult<T> {
        transaction::with_active(|tx| match tx.mode() {
            Mode::Read => self.slot.read(tx.start_epoch()).map(T::from_bits),
            Mode::Write => match tx.pending(&self.slot) {
                Some(bits) => Ok(T::from_bits(bits)),
                None => {
                    tx.record_read(&self.slot);
                    self.slot.read(tx.start_epoch()).map(T::from_bits)
                }
            },
        })
    }

    /// Buffer a write of `val` into the active write transaction.
    ///
    /// The committed cell is untouched until the transaction commits. A
    /// later `set` on the same cell replaces the pending value. Writing
    /// does not imply reading: a `set` alone registers no read-set entry.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is active on the calling thread, or when
    /// the active transaction is a read transaction.
    pub fn set(&self, val: T) {
        transaction::with_active(|tx| tx.record_write(&self.slot, val.to_bits()));
    }

    /// Read-modify-write convenience: `get`, apply `f`, `set` the result.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> StmResult<()> {
        let val = self.get()?;
        self.set(f(val));
        Ok(())
    }
}

impl<T: Scalar + Default> Default for TCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
