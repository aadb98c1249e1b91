use core::fmt::Display;
use core::fmt::Result;

/// Signal raised by [`TCell::get`](crate::TCell::get) when the cell was
/// written after the running transaction took its epoch snapshot.
///
/// This is control flow, not a failure: the thunk propagates it with `?`
/// and the driver re-runs the thunk on the fallback path. It never escapes
/// [`read_tx`](crate::Context::read_tx) or
/// [`write_tx`](crate::Context::write_tx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stale;

/// Result alias for transaction thunks and cell reads.
pub type StmResult<T> = core::result::Result<T, Stale>;

impl Display for Stale {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result {
        write!(f, "stale read, transaction must restart")
    }
}

impl std::error::Error for Stale {}
