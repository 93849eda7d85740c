//! Stamp-tagged row handles.

/// An opaque handle to a row of a specific model.
///
/// A `TreeIter` is cheap to copy and is only meaningful to the model that
/// produced it: `user_data`/`user_data2` carry model-internal identifiers
/// (a node id, an arena key, ...) that other models cannot interpret.
///
/// # Validity
///
/// Every iterator carries the model's generation `stamp` captured at creation
/// time. When a model restructures its internal state it advances its stamp,
/// and every outstanding iterator becomes stale: operations given a stale
/// iterator fail by returning `None`/`false`, they never panic. Models whose
/// [`ModelFlags::iters_persist`](super::ModelFlags) flag is set guarantee
/// their iterators stay valid until the addressed row is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeIter {
    stamp: u64,
    user_data: u64,
    user_data2: u64,
}

impl TreeIter {
    /// Creates an iterator with one internal identifier.
    ///
    /// Called by model implementations, not by consumers.
    #[inline]
    pub fn new(stamp: u64, user_data: u64) -> Self {
        Self {
            stamp,
            user_data,
            user_data2: 0,
        }
    }

    /// Creates an iterator carrying two internal identifiers.
    #[inline]
    pub fn with_second(stamp: u64, user_data: u64, user_data2: u64) -> Self {
        Self {
            stamp,
            user_data,
            user_data2,
        }
    }

    /// The generation stamp captured when this iterator was created.
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// The model-internal primary identifier.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// The model-internal secondary identifier.
    #[inline]
    pub fn user_data2(&self) -> u64 {
        self.user_data2
    }
}
