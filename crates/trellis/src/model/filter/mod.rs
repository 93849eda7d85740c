//! Visibility-filtering proxy over a [`TreeModel`].
//!
//! [`FilterModel`] presents the subset of a child model's rows that pass a
//! visibility policy, re-exposing the full [`TreeModel`] contract with
//! filter-local paths and iterators. The cache behind it is built lazily and
//! kept in sync with the child model's change notifications, so consumers of
//! the proxy only ever see visible rows.

mod cache;
mod sync;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use trellis_core::ConnectionId;
use trellis_core::logging::targets;

use self::cache::{EltKey, FilterState};
use self::sync::OutEvent;

use super::iter::TreeIter;
use super::path::TreePath;
use super::traits::{ModelFlags, ModelSignals, TreeModel};
use super::value::ValueType;

/// Visibility predicate over child-model rows.
type VisibleFn<M> = Arc<dyn Fn(&M, &TreeIter) -> bool + Send + Sync>;

enum Policy<M> {
    /// No filtering, every row is visible.
    All,
    /// External predicate.
    Func(VisibleFn<M>),
    /// A boolean column in the child model decides.
    Column(usize),
}

impl<M> Clone for Policy<M> {
    fn clone(&self) -> Self {
        match self {
            Policy::All => Policy::All,
            Policy::Func(f) => Policy::Func(Arc::clone(f)),
            Policy::Column(col) => Policy::Column(*col),
        }
    }
}

struct ChildConnections {
    changed: ConnectionId,
    inserted: ConnectionId,
    toggled: ConnectionId,
    deleted: ConnectionId,
    reordered: ConnectionId,
}

/// A filtering proxy model.
///
/// Constructed from an `Arc`-shared child model and, optionally, a virtual
/// root: a child path whose subtree becomes the filter's root, hiding
/// everything above it. The visibility policy is configured once, before
/// first use, with [`set_visible_func`](Self::set_visible_func) or
/// [`set_visible_column`](Self::set_visible_column); without one, every row
/// is visible.
///
/// The proxy subscribes to the child model's change notifications and
/// re-emits filtered equivalents on its own [`ModelSignals`], synchronously,
/// so a consumer reacting to a proxy signal always observes a consistent
/// proxy.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis::model::{FilterModel, TreeModel, TreePath, TreeStore, ValueType};
///
/// let store = Arc::new(TreeStore::new(&[ValueType::String, ValueType::Bool]));
/// store.append(None, vec!["a".into(), true.into()]).unwrap();
/// store.append(None, vec!["b".into(), false.into()]).unwrap();
///
/// let filter = FilterModel::new(Arc::clone(&store));
/// filter.set_visible_column(1);
///
/// assert_eq!(filter.iter_n_children(None), 1);
/// let iter = filter.iter(&TreePath::from_index(0)).unwrap();
/// assert_eq!(filter.value(&iter, 0).as_str(), Some("a"));
/// ```
pub struct FilterModel<M: TreeModel + 'static> {
    child: Arc<M>,
    state: RwLock<FilterState>,
    policy: RwLock<Policy<M>>,
    signals: ModelSignals,
    connections: Mutex<Option<ChildConnections>>,
}

impl<M: TreeModel + 'static> FilterModel<M> {
    /// Creates a filter over the whole child model.
    pub fn new(child: Arc<M>) -> Arc<Self> {
        Self::build(child, None)
    }

    /// Creates a filter whose root is the subtree under `virtual_root`.
    pub fn with_virtual_root(child: Arc<M>, virtual_root: TreePath) -> Arc<Self> {
        Self::build(child, Some(virtual_root))
    }

    fn build(child: Arc<M>, virtual_root: Option<TreePath>) -> Arc<Self> {
        let mut state = FilterState::new(virtual_root.clone());
        if let Some(vroot) = &virtual_root {
            // Keep the virtual root row alive for the proxy's lifetime.
            match child.iter(vroot) {
                Some(iter) => child.ref_node(&iter),
                None => {
                    tracing::warn!(
                        target: targets::FILTER,
                        %vroot,
                        "virtual root does not resolve in the child model"
                    );
                    state.virtual_root_deleted = true;
                }
            }
        }

        let filter = Arc::new(Self {
            child,
            state: RwLock::new(state),
            policy: RwLock::new(Policy::All),
            signals: ModelSignals::new(),
            connections: Mutex::new(None),
        });

        let signals = filter.child.signals();
        let weak = Arc::downgrade(&filter);
        let changed = signals.row_changed.connect(move |(path, _)| {
            if let Some(f) = weak.upgrade() {
                f.child_row_changed(path);
            }
        });
        let weak = Arc::downgrade(&filter);
        let inserted = signals.row_inserted.connect(move |(path, _)| {
            if let Some(f) = weak.upgrade() {
                f.child_row_inserted(path);
            }
        });
        let weak = Arc::downgrade(&filter);
        let toggled = signals.row_has_child_toggled.connect(move |(path, _)| {
            if let Some(f) = weak.upgrade() {
                f.child_row_has_child_toggled(path);
            }
        });
        let weak = Arc::downgrade(&filter);
        let deleted = signals.row_deleted.connect(move |path| {
            if let Some(f) = weak.upgrade() {
                f.child_row_deleted(path);
            }
        });
        let weak = Arc::downgrade(&filter);
        let reordered = signals.rows_reordered.connect(move |(path, _, order)| {
            if let Some(f) = weak.upgrade() {
                f.child_rows_reordered(path, order);
            }
        });

        *filter.connections.lock() = Some(ChildConnections {
            changed,
            inserted,
            toggled,
            deleted,
            reordered,
        });
        filter
    }

    /// The model this filter proxies.
    pub fn child(&self) -> &Arc<M> {
        &self.child
    }

    /// The current virtual root path, if one was configured.
    ///
    /// The stored path tracks structural changes among the virtual root's
    /// ancestors, so it may differ from the path given at construction.
    pub fn virtual_root(&self) -> Option<TreePath> {
        self.state.read().virtual_root.clone()
    }

    // ---- visibility policy --------------------------------------------------

    /// Sets the visibility predicate.
    ///
    /// The policy can be configured once, before the filter has materialized
    /// anything; later calls are ignored with a warning.
    pub fn set_visible_func<F>(&self, func: F)
    where
        F: Fn(&M, &TreeIter) -> bool + Send + Sync + 'static,
    {
        self.install_policy(Policy::Func(Arc::new(func)));
    }

    /// Filters on a boolean column of the child model: a row is visible iff
    /// the column's value is `true`.
    pub fn set_visible_column(&self, column: usize) {
        if self.child.column_type(column) != Some(ValueType::Bool) {
            tracing::warn!(
                target: targets::FILTER,
                column,
                "visible column must exist and be boolean, ignoring"
            );
            return;
        }
        self.install_policy(Policy::Column(column));
    }

    fn install_policy(&self, policy: Policy<M>) {
        let mut slot = self.policy.write();
        if !matches!(&*slot, Policy::All) {
            tracing::warn!(
                target: targets::FILTER,
                "visibility policy is already configured, ignoring"
            );
            return;
        }
        if self.state.read().root.is_some() {
            tracing::warn!(
                target: targets::FILTER,
                "visibility policy must be configured before first use, ignoring"
            );
            return;
        }
        *slot = policy;
    }

    /// Snapshot of the policy as a plain predicate over child iterators.
    fn visibility(&self) -> impl Fn(&TreeIter) -> bool + use<M> {
        let policy = self.policy.read().clone();
        let child = Arc::clone(&self.child);
        move |iter: &TreeIter| match &policy {
            Policy::All => true,
            Policy::Func(f) => f(&child, iter),
            Policy::Column(col) => child.value(iter, *col).as_bool().unwrap_or(false),
        }
    }

    // ---- maintenance --------------------------------------------------------

    /// Re-applies the visibility policy to every row of the child model.
    ///
    /// This synthesizes a row-changed pass over the entire (virtual-rooted)
    /// child tree and is therefore O(rows); use it when the policy's inputs
    /// changed without the child model noticing.
    pub fn refilter(&self) {
        let (deleted, vroot) = {
            let state = self.state.read();
            (state.virtual_root_deleted, state.virtual_root.clone())
        };
        if deleted {
            return;
        }

        let (parent, base) = match &vroot {
            Some(vroot) => match self.child.iter(vroot) {
                Some(iter) => (Some(iter), vroot.clone()),
                None => return,
            },
            None => (None, TreePath::root()),
        };
        let mut paths = Vec::new();
        self.collect_child_paths(parent.as_ref(), &base, &mut paths);
        for path in paths {
            self.apply_row_changed(&path, false);
        }
    }

    fn collect_child_paths(
        &self,
        parent: Option<&TreeIter>,
        base: &TreePath,
        paths: &mut Vec<TreePath>,
    ) {
        let n = self.child.iter_n_children(parent);
        for index in 0..n {
            let path = base.child(index);
            paths.push(path.clone());
            if let Some(iter) = self.child.iter_nth_child(parent, index) {
                self.collect_child_paths(Some(&iter), &path, paths);
            }
        }
    }

    /// Frees every cached level no external iterator holds live.
    ///
    /// Bounds memory after wide traversals; the root level is retained.
    pub fn clear_cache(&self) {
        let mut state = self.state.write();
        state.collect_unreferenced(&*self.child);
    }

    // ---- path/iterator conversion -------------------------------------------

    /// Translates a child-model path into the filter's addressing.
    ///
    /// Builds and fetches cache entries as needed. Returns `None` when the
    /// row or any of its ancestors is hidden, or the path lies outside the
    /// virtual root.
    pub fn convert_child_path_to_path(&self, child_path: &TreePath) -> Option<TreePath> {
        let vis = self.visibility();
        let mut state = self.state.write();
        let rel = state.to_relative(child_path)?;
        if rel.is_root() {
            return None;
        }

        let mut lkey = match state.root {
            Some(root) => root,
            None => state.build_level(&*self.child, &vis, None)?,
        };
        let indices = rel.indices();
        let mut ekey = None;
        for (depth, &offset) in indices.iter().enumerate() {
            let e = match state.elt_at_offset(lkey, offset) {
                Some(e) => e,
                None => state.fetch_child(&*self.child, &vis, lkey, offset)?,
            };
            if depth + 1 < indices.len() {
                lkey = match state.elts[e].children {
                    Some(sub) => sub,
                    None => state.build_level(&*self.child, &vis, Some(e))?,
                };
            }
            ekey = Some(e);
        }
        state.filter_path_for_elt(ekey?)
    }

    /// Translates a filter path back into the child model's addressing,
    /// virtual root included.
    pub fn convert_path_to_child_path(&self, path: &TreePath) -> Option<TreePath> {
        let iter = self.iter(path)?;
        let state = self.state.read();
        let ekey = state.resolve(&iter)?;
        Some(state.child_path_for_elt(ekey))
    }

    /// Translates a child-model iterator into a filter iterator.
    pub fn convert_child_iter_to_iter(&self, child_iter: &TreeIter) -> Option<TreeIter> {
        let child_path = self.child.path(child_iter)?;
        let path = self.convert_child_path_to_path(&child_path)?;
        self.iter(&path)
    }

    /// Translates a filter iterator into a child-model iterator.
    pub fn convert_iter_to_child_iter(&self, iter: &TreeIter) -> Option<TreeIter> {
        let state = self.state.read();
        let ekey = state.resolve(iter)?;
        state.child_iter_for_elt(&*self.child, ekey)
    }

    // ---- signal plumbing ----------------------------------------------------

    fn child_row_changed(&self, path: &TreePath) {
        self.apply_row_changed(path, true);
    }

    fn apply_row_changed(&self, path: &TreePath, forward: bool) {
        let vis = self.visibility();
        let mut out = Vec::new();
        {
            let mut state = self.state.write();
            state.handle_row_changed(&*self.child, &vis, path, forward, &mut out);
        }
        self.dispatch(out);
    }

    fn child_row_inserted(&self, path: &TreePath) {
        let vis = self.visibility();
        let mut out = Vec::new();
        {
            let mut state = self.state.write();
            state.handle_row_inserted(&*self.child, &vis, path, &mut out);
        }
        self.dispatch(out);
    }

    fn child_row_has_child_toggled(&self, path: &TreePath) {
        let vis = self.visibility();
        let mut out = Vec::new();
        {
            let mut state = self.state.write();
            state.handle_row_has_child_toggled(&*self.child, &vis, path, &mut out);
        }
        self.dispatch(out);
    }

    fn child_row_deleted(&self, path: &TreePath) {
        let mut out = Vec::new();
        {
            let mut state = self.state.write();
            state.handle_row_deleted(&*self.child, path, &mut out);
        }
        self.dispatch(out);
    }

    fn child_rows_reordered(&self, path: &TreePath, order: &[usize]) {
        let mut out = Vec::new();
        {
            let mut state = self.state.write();
            state.handle_rows_reordered(path, order, &mut out);
        }
        self.dispatch(out);
    }

    /// Emits recorded notifications; the cache lock is already released, so
    /// slots are free to query the proxy.
    fn dispatch(&self, out: Vec<OutEvent>) {
        for event in out {
            match event {
                OutEvent::Changed(path, iter) => self.signals.row_changed.emit((path, iter)),
                OutEvent::Inserted(path, iter) => self.signals.row_inserted.emit((path, iter)),
                OutEvent::HasChildToggled(path, iter) => {
                    self.signals.row_has_child_toggled.emit((path, iter))
                }
                OutEvent::Deleted(path) => self.signals.row_deleted.emit(path),
                OutEvent::Reordered(path, iter, order) => {
                    self.signals.rows_reordered.emit((path, iter, order))
                }
            }
        }
    }

    // ---- lookup helpers -----------------------------------------------------

    /// Descends the visible sequences along `path`, building levels lazily.
    fn iter_at(&self, path: &TreePath) -> Option<TreeIter> {
        if path.is_root() {
            return None;
        }
        let vis = self.visibility();
        let mut state = self.state.write();
        let mut lkey = match state.root {
            Some(root) => root,
            None => state.build_level(&*self.child, &vis, None)?,
        };
        let indices = path.indices();
        let mut ekey = None;
        for (depth, &index) in indices.iter().enumerate() {
            let e = *state.levels[lkey].visible.get(index)?;
            if depth + 1 < indices.len() {
                lkey = match state.elts[e].children {
                    Some(sub) => sub,
                    None => state.build_level(&*self.child, &vis, Some(e))?,
                };
            }
            ekey = Some(e);
        }
        ekey.map(|e| state.iter_for(e))
    }

    /// The level of visible children under `parent`, built on demand.
    fn visible_children<R>(
        &self,
        parent: Option<&TreeIter>,
        read: impl FnOnce(&FilterState, &[EltKey]) -> R,
    ) -> Option<R> {
        let vis = self.visibility();
        let mut state = self.state.write();
        let lkey = match parent {
            None => match state.root {
                Some(root) => Some(root),
                None => state.build_level(&*self.child, &vis, None),
            },
            Some(iter) => {
                let ekey = state.resolve(iter)?;
                match state.elts[ekey].children {
                    Some(sub) => Some(sub),
                    None => state.build_level(&*self.child, &vis, Some(ekey)),
                }
            }
        }?;
        let visible = state.levels[lkey].visible.clone();
        Some(read(&state, &visible))
    }

    #[cfg(test)]
    fn cached_level_count(&self) -> usize {
        self.state.read().levels.len()
    }
}

impl<M: TreeModel + 'static> TreeModel for FilterModel<M> {
    fn flags(&self) -> ModelFlags {
        ModelFlags {
            // The stamp advances on wholesale restructuring.
            iters_persist: false,
            list_only: self.child.flags().list_only,
        }
    }

    fn n_columns(&self) -> usize {
        self.child.n_columns()
    }

    fn column_type(&self, column: usize) -> Option<ValueType> {
        self.child.column_type(column)
    }

    fn iter(&self, path: &TreePath) -> Option<TreeIter> {
        self.iter_at(path)
    }

    fn path(&self, iter: &TreeIter) -> Option<TreePath> {
        let state = self.state.read();
        let ekey = state.resolve(iter)?;
        state.filter_path_for_elt(ekey)
    }

    fn value(&self, iter: &TreeIter, column: usize) -> super::value::Value {
        let child_iter = {
            let state = self.state.read();
            state
                .resolve(iter)
                .and_then(|ekey| state.child_iter_for_elt(&*self.child, ekey))
        };
        match child_iter {
            Some(child_iter) => self.child.value(&child_iter, column),
            None => super::value::Value::None,
        }
    }

    fn iter_next(&self, iter: &TreeIter) -> Option<TreeIter> {
        let state = self.state.read();
        let ekey = state.resolve(iter)?;
        let position = state.visible_position(ekey)?;
        let level = &state.levels[state.elts[ekey].parent];
        level.visible.get(position + 1).map(|&e| state.iter_for(e))
    }

    fn iter_children(&self, parent: Option<&TreeIter>) -> Option<TreeIter> {
        self.iter_nth_child(parent, 0)
    }

    fn iter_n_children(&self, parent: Option<&TreeIter>) -> usize {
        self.visible_children(parent, |_, visible| visible.len())
            .unwrap_or(0)
    }

    fn iter_nth_child(&self, parent: Option<&TreeIter>, n: usize) -> Option<TreeIter> {
        self.visible_children(parent, |state, visible| {
            visible.get(n).map(|&e| state.iter_for(e))
        })?
    }

    fn iter_parent(&self, child: &TreeIter) -> Option<TreeIter> {
        let state = self.state.read();
        let ekey = state.resolve(child)?;
        let parent_elt = state.levels[state.elts[ekey].parent].parent?;
        Some(state.iter_for(parent_elt))
    }

    fn ref_node(&self, iter: &TreeIter) {
        let mut state = self.state.write();
        if let Some(ekey) = state.resolve(iter) {
            state.ref_elt(&*self.child, ekey, true);
        }
    }

    fn unref_node(&self, iter: &TreeIter) {
        let mut state = self.state.write();
        if let Some(ekey) = state.resolve(iter) {
            state.unref_elt(&*self.child, ekey, true);
        }
    }

    fn signals(&self) -> &ModelSignals {
        &self.signals
    }
}

impl<M: TreeModel + 'static> Drop for FilterModel<M> {
    fn drop(&mut self) {
        if let Some(connections) = self.connections.get_mut().take() {
            let signals = self.child.signals();
            signals.row_changed.disconnect(connections.changed);
            signals.row_inserted.disconnect(connections.inserted);
            signals.row_has_child_toggled.disconnect(connections.toggled);
            signals.row_deleted.disconnect(connections.deleted);
            signals.rows_reordered.disconnect(connections.reordered);
        }

        let state = self.state.get_mut();
        if !state.virtual_root_deleted
            && let Some(vroot) = state.virtual_root.clone()
            && let Some(iter) = self.child.iter(&vroot)
        {
            self.child.unref_node(&iter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::TreeStore;
    use crate::model::value::Value;

    /// Collects every proxy notification as a readable string.
    fn record(filter: &FilterModel<TreeStore>) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));

        let ev = events.clone();
        filter.signals.row_changed.connect(move |(path, _)| {
            ev.lock().push(format!("changed {path}"));
        });
        let ev = events.clone();
        filter.signals.row_inserted.connect(move |(path, _)| {
            ev.lock().push(format!("inserted {path}"));
        });
        let ev = events.clone();
        filter.signals.row_has_child_toggled.connect(move |(path, _)| {
            ev.lock().push(format!("toggled {path}"));
        });
        let ev = events.clone();
        filter.signals.row_deleted.connect(move |path| {
            ev.lock().push(format!("deleted {path}"));
        });
        let ev = events.clone();
        filter.signals.rows_reordered.connect(move |(path, _, order)| {
            ev.lock().push(format!("reordered [{path}] {order:?}"));
        });

        events
    }

    fn flat_store(rows: &[(&str, bool)]) -> Arc<TreeStore> {
        let store = Arc::new(TreeStore::new(&[ValueType::String, ValueType::Bool]));
        for (name, visible) in rows {
            store
                .append(None, vec![(*name).into(), (*visible).into()])
                .unwrap();
        }
        store
    }

    fn names(filter: &FilterModel<TreeStore>, parent: Option<&TreeIter>) -> Vec<String> {
        let mut out = Vec::new();
        let mut iter = filter.iter_children(parent);
        while let Some(current) = iter {
            out.push(filter.value(&current, 0).into_string().unwrap());
            iter = filter.iter_next(&current);
        }
        out
    }

    #[test]
    fn test_visible_column_scenario() {
        let store = flat_store(&[("a", true), ("b", false), ("c", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        assert_eq!(filter.iter_n_children(None), 2);
        assert_eq!(names(&filter, None), vec!["a", "c"]);
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(0)),
            Some(TreePath::from_index(0))
        );
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(1)),
            Some(TreePath::from_index(2))
        );

        let events = record(&filter);
        let hidden = store.iter(&TreePath::from_index(1)).unwrap();
        store.set_value(&hidden, 1, true.into()).unwrap();

        assert_eq!(*events.lock(), vec!["inserted 1"]);
        assert_eq!(filter.iter_n_children(None), 3);
        assert_eq!(names(&filter, None), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_visible_func() {
        let store = flat_store(&[("apple", true), ("banana", true), ("avocado", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_func(|model: &TreeStore, iter: &TreeIter| {
            model
                .value(iter, 0)
                .as_str()
                .is_some_and(|name| name.starts_with('a'))
        });

        assert_eq!(names(&filter, None), vec!["apple", "avocado"]);
    }

    #[test]
    fn test_policy_is_configured_once() {
        let store = flat_store(&[("a", true), ("b", false)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        // Ignored: a policy is already installed.
        filter.set_visible_func(|_: &TreeStore, _: &TreeIter| false);

        assert_eq!(names(&filter, None), vec!["a"]);

        // Ignored after first materialization.
        let unfiltered = FilterModel::new(Arc::clone(&store));
        assert_eq!(unfiltered.iter_n_children(None), 2);
        unfiltered.set_visible_column(1);
        assert_eq!(unfiltered.iter_n_children(None), 2);
    }

    #[test]
    fn test_visible_column_must_be_bool() {
        let store = flat_store(&[("a", false)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(0); // string column, ignored
        assert_eq!(filter.iter_n_children(None), 1);
    }

    #[test]
    fn test_hidden_rows_never_exposed() {
        let store = flat_store(&[("a", true), ("b", false)]);
        let parent = store.iter(&TreePath::from_index(0)).unwrap();
        store
            .append(Some(&parent), vec!["a0".into(), false.into()])
            .unwrap();
        store
            .append(Some(&parent), vec!["a1".into(), true.into()])
            .unwrap();
        // A visible row under a hidden parent stays unreachable.
        let hidden = store.iter(&TreePath::from_index(1)).unwrap();
        store
            .append(Some(&hidden), vec!["b0".into(), true.into()])
            .unwrap();

        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        assert_eq!(names(&filter, None), vec!["a"]);
        let a = filter.iter(&TreePath::from_index(0)).unwrap();
        assert_eq!(names(&filter, Some(&a)), vec!["a1"]);
        assert!(filter.iter(&TreePath::from_index(1)).is_none());
        assert!(
            filter
                .convert_child_path_to_path(&TreePath::from_indices([1, 0]))
                .is_none()
        );
    }

    #[test]
    fn test_path_round_trip() {
        let store = flat_store(&[("a", true), ("b", false), ("c", true)]);
        let a = store.iter(&TreePath::from_index(0)).unwrap();
        store
            .append(Some(&a), vec!["a0".into(), false.into()])
            .unwrap();
        store
            .append(Some(&a), vec!["a1".into(), true.into()])
            .unwrap();

        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        for child_path in [
            TreePath::from_index(0),
            TreePath::from_index(2),
            TreePath::from_indices([0, 1]),
        ] {
            let path = filter.convert_child_path_to_path(&child_path).unwrap();
            assert_eq!(
                filter.convert_path_to_child_path(&path),
                Some(child_path.clone())
            );
        }
        assert_eq!(
            filter.convert_child_path_to_path(&TreePath::from_indices([0, 1])),
            Some(TreePath::from_indices([0, 0]))
        );
        assert!(
            filter
                .convert_child_path_to_path(&TreePath::from_index(1))
                .is_none()
        );

        // Iterator conversions agree with path conversions.
        let child_iter = store.iter(&TreePath::from_indices([0, 1])).unwrap();
        let iter = filter.convert_child_iter_to_iter(&child_iter).unwrap();
        assert_eq!(filter.path(&iter), Some(TreePath::from_indices([0, 0])));
        let back = filter.convert_iter_to_child_iter(&iter).unwrap();
        assert_eq!(store.path(&back), Some(TreePath::from_indices([0, 1])));
    }

    #[test]
    fn test_row_changed_forwarded_for_visible_rows() {
        let store = flat_store(&[("a", true), ("b", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(filter.iter_n_children(None), 2);

        let events = record(&filter);
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store.set_value(&b, 0, "b2".into()).unwrap();
        assert_eq!(*events.lock(), vec!["changed 1"]);
    }

    #[test]
    fn test_row_hidden_by_change() {
        let store = flat_store(&[("a", true), ("b", true), ("c", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(filter.iter_n_children(None), 3);

        let events = record(&filter);
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store.set_value(&b, 1, false.into()).unwrap();

        assert_eq!(*events.lock(), vec!["deleted 1"]);
        assert_eq!(names(&filter, None), vec!["a", "c"]);
    }

    #[test]
    fn test_insert_ordering_under_all_hidden_level() {
        let store = flat_store(&[("parent", true)]);
        let parent = store.iter(&TreePath::from_index(0)).unwrap();
        store
            .append(Some(&parent), vec!["hidden".into(), false.into()])
            .unwrap();

        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        let fparent = filter.iter(&TreePath::from_index(0)).unwrap();
        assert_eq!(filter.iter_n_children(Some(&fparent)), 0);

        let events = record(&filter);
        store
            .append(Some(&parent), vec!["x".into(), true.into()])
            .unwrap();
        store
            .append(Some(&parent), vec!["y".into(), true.into()])
            .unwrap();

        // One toggle for the 0 -> 1 transition, then the insertions in
        // ascending visible order.
        assert_eq!(
            *events.lock(),
            vec!["toggled 0", "inserted 0:0", "inserted 0:1"]
        );
        assert_eq!(names(&filter, Some(&fparent)), vec!["x", "y"]);
    }

    #[test]
    fn test_deletion_collapse_of_last_visible_child() {
        let store = flat_store(&[("parent", true)]);
        let parent = store.iter(&TreePath::from_index(0)).unwrap();
        let child = store
            .append(Some(&parent), vec!["child".into(), true.into()])
            .unwrap();

        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        let fparent = filter.iter(&TreePath::from_index(0)).unwrap();
        assert_eq!(filter.iter_n_children(Some(&fparent)), 1);

        let events = record(&filter);
        store.remove(&child).unwrap();

        // The filter's own deleted+toggled pair, then the child model's
        // has-child-toggled forwarded.
        assert_eq!(
            *events.lock(),
            vec!["deleted 0:0", "toggled 0", "toggled 0"]
        );
        assert_eq!(filter.iter_n_children(Some(&fparent)), 0);
    }

    #[test]
    fn test_unmaterialized_sibling_fetch() {
        let store = flat_store(&[("a", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(filter.iter_n_children(None), 1);

        // Inserted while hidden: no cache entry, no notification.
        let events = record(&filter);
        let b = store.append(None, vec!["b".into(), false.into()]).unwrap();
        assert!(events.lock().is_empty());

        // Flipping it visible materializes it on demand.
        store.set_value(&b, 1, true.into()).unwrap();
        assert_eq!(*events.lock(), vec!["inserted 1"]);
        assert_eq!(names(&filter, None), vec!["a", "b"]);
    }

    #[test]
    fn test_offsets_track_hidden_inserts() {
        let store = flat_store(&[("a", true), ("c", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(filter.iter_n_children(None), 2);

        // Hidden row between the two visible ones shifts cached offsets.
        store
            .insert(None, 1, vec!["b".into(), false.into()])
            .unwrap();
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(1)),
            Some(TreePath::from_index(2))
        );
        // And a later deletion shifts them back.
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store.remove(&b).unwrap();
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(1)),
            Some(TreePath::from_index(1))
        );
    }

    #[test]
    fn test_rows_reordered() {
        let store = flat_store(&[("a", true), ("b", true), ("c", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(filter.iter_n_children(None), 3);

        let events = record(&filter);
        store.reorder(None, &[2, 0, 1]).unwrap();

        assert_eq!(*events.lock(), vec!["reordered [] [2, 0, 1]"]);
        assert_eq!(names(&filter, None), vec!["c", "a", "b"]);
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(0)),
            Some(TreePath::from_index(0))
        );
    }

    #[test]
    fn test_reorder_with_hidden_rows() {
        let store = flat_store(&[("a", true), ("b", false), ("c", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);
        assert_eq!(names(&filter, None), vec!["a", "c"]);

        let events = record(&filter);
        // Child order becomes c, b, a.
        store.reorder(None, &[2, 1, 0]).unwrap();

        // Permutation is over the prior visible order: c was visible index 1.
        assert_eq!(*events.lock(), vec!["reordered [] [1, 0]"]);
        assert_eq!(names(&filter, None), vec!["c", "a"]);
    }

    #[test]
    fn test_refilter_is_idempotent() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = flat_store(&[("a", true), ("b", true), ("c", true)]);
        let hide_b = Arc::new(AtomicBool::new(false));
        let filter = FilterModel::new(Arc::clone(&store));
        let flag = hide_b.clone();
        filter.set_visible_func(move |model: &TreeStore, iter: &TreeIter| {
            model.value(iter, 0).as_str() != Some("b") || !flag.load(Ordering::Relaxed)
        });
        assert_eq!(filter.iter_n_children(None), 3);

        // The policy's input changed behind the child model's back.
        hide_b.store(true, Ordering::Relaxed);
        let events = record(&filter);
        filter.refilter();
        assert_eq!(*events.lock(), vec!["deleted 1"]);
        assert_eq!(names(&filter, None), vec!["a", "c"]);

        events.lock().clear();
        filter.refilter();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_reference_discipline_and_clear_cache() {
        let store = flat_store(&[("a", true)]);
        let a = store.iter(&TreePath::from_index(0)).unwrap();
        store
            .append(Some(&a), vec!["a0".into(), true.into()])
            .unwrap();

        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        let deep = filter.iter(&TreePath::from_indices([0, 0])).unwrap();
        assert_eq!(filter.cached_level_count(), 2);

        filter.ref_node(&deep);
        // Reference propagates to the child model.
        let child_a0 = store.iter(&TreePath::from_indices([0, 0])).unwrap();
        assert_eq!(store.node_ref_count(&child_a0), Some(1));

        filter.clear_cache();
        assert_eq!(filter.cached_level_count(), 2);
        assert_eq!(filter.path(&deep), Some(TreePath::from_indices([0, 0])));

        filter.unref_node(&deep);
        assert_eq!(store.node_ref_count(&child_a0), Some(0));
        filter.clear_cache();
        // Only the root level survives collection.
        assert_eq!(filter.cached_level_count(), 1);
    }

    #[test]
    fn test_eager_build_for_watched_rows() {
        let store = flat_store(&[("a", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        let a = filter.iter(&TreePath::from_index(0)).unwrap();
        filter.ref_node(&a);
        filter.ref_node(&a);
        assert_eq!(filter.cached_level_count(), 1);

        // First child arrives; the toggled notification triggers an eager
        // build because the row is multiply referenced.
        let child_a = store.iter(&TreePath::from_index(0)).unwrap();
        store
            .append(Some(&child_a), vec!["a0".into(), true.into()])
            .unwrap();
        assert_eq!(filter.cached_level_count(), 2);

        filter.unref_node(&a);
        filter.unref_node(&a);
    }

    #[test]
    fn test_stale_iterators_rejected_after_restructure() {
        let store = flat_store(&[("a", true)]);
        let filter = FilterModel::new(Arc::clone(&store));
        filter.set_visible_column(1);

        let iter = filter.iter(&TreePath::from_index(0)).unwrap();
        let events = record(&filter);
        let child_a = store.iter(&TreePath::from_index(0)).unwrap();
        store.remove(&child_a).unwrap();

        assert_eq!(*events.lock(), vec!["deleted 0"]);
        assert!(filter.path(&iter).is_none());
        assert_eq!(filter.value(&iter, 0), Value::None);
        assert!(filter.iter_next(&iter).is_none());
        assert_eq!(filter.iter_n_children(None), 0);
    }

    #[test]
    fn test_virtual_root() {
        let store = flat_store(&[("a", true), ("b", true)]);
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store
            .append(Some(&b), vec!["b0".into(), true.into()])
            .unwrap();
        store
            .append(Some(&b), vec!["b1".into(), false.into()])
            .unwrap();

        let filter = FilterModel::with_virtual_root(Arc::clone(&store), TreePath::from_index(1));
        filter.set_visible_column(1);

        assert_eq!(names(&filter, None), vec!["b0"]);
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(0)),
            Some(TreePath::from_indices([1, 0]))
        );
        assert_eq!(
            filter.convert_child_path_to_path(&TreePath::from_indices([1, 0])),
            Some(TreePath::from_index(0))
        );
        // Rows outside the virtual root are not part of the view.
        assert!(
            filter
                .convert_child_path_to_path(&TreePath::from_index(0))
                .is_none()
        );
        // The virtual root row itself is pinned in the child model.
        assert_eq!(store.node_ref_count(&b), Some(1));
    }

    #[test]
    fn test_virtual_root_tracks_sibling_changes() {
        let store = flat_store(&[("a", true), ("b", true)]);
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store
            .append(Some(&b), vec!["b0".into(), true.into()])
            .unwrap();

        let filter = FilterModel::with_virtual_root(Arc::clone(&store), TreePath::from_index(1));
        filter.set_visible_column(1);
        assert_eq!(names(&filter, None), vec!["b0"]);

        // Insert above the virtual root; the stored path shifts.
        store
            .insert(None, 0, vec!["z".into(), true.into()])
            .unwrap();
        assert_eq!(filter.virtual_root(), Some(TreePath::from_index(2)));
        assert_eq!(names(&filter, None), vec!["b0"]);

        // Reorder among its ancestors; the stored index follows.
        store.reorder(None, &[2, 1, 0]).unwrap();
        assert_eq!(filter.virtual_root(), Some(TreePath::from_index(0)));
        assert_eq!(
            filter.convert_path_to_child_path(&TreePath::from_index(0)),
            Some(TreePath::from_indices([0, 0]))
        );

        // Delete a sibling after it; the stored index is unaffected.
        let z = store.iter(&TreePath::from_index(2)).unwrap();
        assert_eq!(store.value(&z, 0).as_str(), Some("z"));
        store.remove(&z).unwrap();
        assert_eq!(filter.virtual_root(), Some(TreePath::from_index(0)));
        assert_eq!(names(&filter, None), vec!["b0"]);
    }

    #[test]
    fn test_virtual_root_deletion_collapses_view() {
        let store = flat_store(&[("a", true), ("b", true)]);
        let b = store.iter(&TreePath::from_index(1)).unwrap();
        store
            .append(Some(&b), vec!["b0".into(), true.into()])
            .unwrap();

        let filter = FilterModel::with_virtual_root(Arc::clone(&store), TreePath::from_index(1));
        filter.set_visible_column(1);
        let iter = filter.iter(&TreePath::from_index(0)).unwrap();

        let events = record(&filter);
        store.remove(&b).unwrap();

        // The rows are already gone; no well-formed deletions can be emitted.
        assert!(events.lock().is_empty());
        assert!(filter.path(&iter).is_none());
        assert_eq!(filter.iter_n_children(None), 0);
        assert!(filter.iter(&TreePath::from_index(0)).is_none());
    }

    #[test]
    fn test_disconnects_from_child_on_drop() {
        let store = flat_store(&[("a", true)]);
        {
            let filter = FilterModel::new(Arc::clone(&store));
            assert_eq!(filter.iter_n_children(None), 1);
            assert_eq!(store.signals().row_changed.connection_count(), 1);
            assert_eq!(store.signals().row_deleted.connection_count(), 1);
        }
        assert_eq!(store.signals().row_changed.connection_count(), 0);
        assert_eq!(store.signals().row_deleted.connection_count(), 0);
    }

    #[test]
    fn test_stacked_filters() {
        let store = flat_store(&[("ab", true), ("a", true), ("b", true)]);
        let first = FilterModel::new(Arc::clone(&store));
        first.set_visible_func(|model: &TreeStore, iter: &TreeIter| {
            model
                .value(iter, 0)
                .as_str()
                .is_some_and(|name| name.contains('a'))
        });
        let second = FilterModel::new(Arc::clone(&first));
        second.set_visible_func(|model: &FilterModel<TreeStore>, iter: &TreeIter| {
            model
                .value(iter, 0)
                .as_str()
                .is_some_and(|name| name.contains('b'))
        });

        assert_eq!(names(&first, None), vec!["ab", "a"]);
        let mut out = Vec::new();
        let mut iter = second.iter_children(None);
        while let Some(current) = iter {
            out.push(second.value(&current, 0).into_string().unwrap());
            iter = second.iter_next(&current);
        }
        assert_eq!(out, vec!["ab"]);
    }
}
