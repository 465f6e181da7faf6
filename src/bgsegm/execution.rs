//! Row scheduling shared by the segmentation engines.
//!
//! Every engine splits a frame into independent rows (frame samples, the
//! row's model records and the row's mask samples) and hands them to
//! [`for_each_row`] or [`map_rows`]. Both execution paths run the same
//! per-row closure, so sequential and parallel results are identical.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// How an engine distributes the rows of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Execution {
    /// Process rows one after another on the calling thread
    #[default]
    Sequential,
    /// Distribute rows over the rayon thread pool
    ///
    /// Falls back to sequential processing when the crate is built without
    /// the `rayon` feature.
    Parallel,
}

impl Execution {
    /// Returns `true` when rows will actually run on the thread pool.
    pub fn is_parallel(self) -> bool {
        cfg!(feature = "rayon") && self == Self::Parallel
    }
}

#[cfg(not(feature = "rayon"))]
fn warn_sequential_fallback() {
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        tracing::warn!("parallel execution requested without the `rayon` feature; running sequentially");
    });
}

/// Runs `op` once for every row.
pub(crate) fn for_each_row<T, F>(execution: Execution, rows: Vec<T>, op: F)
where
    T: Send,
    F: Fn(T) + Sync + Send,
{
    match execution {
        Execution::Sequential => rows.into_iter().for_each(op),
        #[cfg(feature = "rayon")]
        Execution::Parallel => rows.into_par_iter().for_each(op),
        #[cfg(not(feature = "rayon"))]
        Execution::Parallel => {
            warn_sequential_fallback();
            rows.into_iter().for_each(op);
        }
    }
}

/// Runs `op` once for every row and collects the results in row order.
pub(crate) fn map_rows<T, R, F>(execution: Execution, rows: Vec<T>, op: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync + Send,
{
    match execution {
        Execution::Sequential => rows.into_iter().map(op).collect(),
        #[cfg(feature = "rayon")]
        Execution::Parallel => rows.into_par_iter().map(op).collect(),
        #[cfg(not(feature = "rayon"))]
        Execution::Parallel => {
            warn_sequential_fallback();
            rows.into_iter().map(op).collect()
        }
    }
}
