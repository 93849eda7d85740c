//! The hierarchical-data-source contract.
//!
//! [`TreeModel`] is the interface every row source implements: the in-memory
//! [`TreeStore`](super::TreeStore), the [`FilterModel`](super::FilterModel)
//! proxy, and any application-defined source. Proxies both consume and
//! re-expose this same contract, so they stack.

use trellis_core::Signal;

use super::iter::TreeIter;
use super::path::TreePath;
use super::value::{Value, ValueType};

/// Capability flags a model advertises to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelFlags {
    /// Iterators stay valid until their row is deleted, regardless of other
    /// structural changes. Proxies may cache such iterators.
    pub iters_persist: bool,
    /// The model is flat: no row ever has children.
    pub list_only: bool,
}

/// The core trait for hierarchical row sources.
///
/// Rows are addressed positionally by [`TreePath`] or by the opaque
/// [`TreeIter`] handles a model hands out. All fallible queries return
/// sentinels (`None`, `false`, [`Value::None`]) rather than panicking: a
/// stale iterator or an out-of-range path silently fails the operation it is
/// used in (consumers are expected to re-acquire iterators after change
/// notifications rather than reuse stale ones).
///
/// # Change notifications
///
/// Models emit the five signals in [`ModelSignals`] synchronously, after the
/// corresponding structural change has been applied, so a consumer reacting
/// to a signal always observes a self-consistent model.
pub trait TreeModel: Send + Sync {
    /// Returns the capability flags for this model.
    fn flags(&self) -> ModelFlags {
        ModelFlags::default()
    }

    /// Returns the number of data columns.
    fn n_columns(&self) -> usize;

    /// Returns the declared type of `column`, or `None` if out of range.
    fn column_type(&self, column: usize) -> Option<ValueType>;

    /// Returns an iterator for the row at `path`, or `None` if the path is
    /// out of range (including the empty root path).
    fn iter(&self, path: &TreePath) -> Option<TreeIter>;

    /// Returns the path of the row `iter` points at.
    ///
    /// Returns `None` for a stale iterator, or when the row is not currently
    /// addressable (a filter proxy returns `None` for rows that are cached
    /// but not visible).
    fn path(&self, iter: &TreeIter) -> Option<TreePath>;

    /// Returns the value stored at `column` of the row `iter` points at.
    ///
    /// Returns [`Value::None`] for a stale iterator or an out-of-range column.
    fn value(&self, iter: &TreeIter, column: usize) -> Value;

    /// Returns an iterator for the next sibling of `iter`'s row, if any.
    fn iter_next(&self, iter: &TreeIter) -> Option<TreeIter>;

    /// Returns an iterator for the first child of `parent`, or the first
    /// top-level row when `parent` is `None`.
    fn iter_children(&self, parent: Option<&TreeIter>) -> Option<TreeIter>;

    /// Returns `true` if `iter`'s row has at least one child.
    fn iter_has_child(&self, iter: &TreeIter) -> bool {
        self.iter_n_children(Some(iter)) > 0
    }

    /// Returns the number of children of `parent`, or of the root when
    /// `parent` is `None`.
    fn iter_n_children(&self, parent: Option<&TreeIter>) -> usize;

    /// Returns an iterator for the `n`-th child of `parent` (or of the root
    /// when `parent` is `None`).
    fn iter_nth_child(&self, parent: Option<&TreeIter>, n: usize) -> Option<TreeIter>;

    /// Returns an iterator for the parent of `child`'s row, or `None` for
    /// top-level rows.
    fn iter_parent(&self, child: &TreeIter) -> Option<TreeIter>;

    /// Declares that an external consumer holds `iter` live.
    ///
    /// Caching proxies use this to pin the referenced row (and the internal
    /// structures resolving it) in memory. The default does nothing; models
    /// without caches need no reference bookkeeping.
    fn ref_node(&self, _iter: &TreeIter) {}

    /// Releases one reference previously taken with
    /// [`ref_node`](Self::ref_node).
    fn unref_node(&self, _iter: &TreeIter) {}

    /// Returns the change-notification signals for this model.
    fn signals(&self) -> &ModelSignals;
}

/// Collection of change-notification signals emitted by tree models.
///
/// Consumers connect to these to stay synchronized with the model. All paths
/// and iterators carried by a signal are expressed in the emitting model's own
/// addressing (a filter proxy re-emits with filter-local paths, never child
/// paths).
pub struct ModelSignals {
    /// A row's values changed. Args: (path, iter) of the changed row.
    pub row_changed: Signal<(TreePath, TreeIter)>,

    /// A row was inserted. Args: (path, iter) of the new row, valid at the
    /// time of emission.
    pub row_inserted: Signal<(TreePath, TreeIter)>,

    /// A row gained its first child or lost its last one.
    /// Args: (path, iter) of the parent row.
    pub row_has_child_toggled: Signal<(TreePath, TreeIter)>,

    /// A row was deleted. Args: the path the row had before deletion; the row
    /// itself is already gone when this fires.
    pub row_deleted: Signal<TreePath>,

    /// The children of one parent were reordered.
    /// Args: (parent path, parent iter or `None` for the root level, order),
    /// where `order[new_position] == old_position` for every child.
    pub rows_reordered: Signal<(TreePath, Option<TreeIter>, Vec<usize>)>,
}

impl Default for ModelSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSignals {
    /// Creates a new set of model signals.
    pub fn new() -> Self {
        Self {
            row_changed: Signal::new(),
            row_inserted: Signal::new(),
            row_has_child_toggled: Signal::new(),
            row_deleted: Signal::new(),
            rows_reordered: Signal::new(),
        }
    }
}
