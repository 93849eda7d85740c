//! In-memory hierarchical store.
//!
//! `TreeStore` is the concrete row source of this crate: typed columns, rows
//! with parent-child relationships, and persistent iterators. Proxies such as
//! [`FilterModel`](super::FilterModel) stack on top of it (or on any other
//! [`TreeModel`]).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_core::logging::targets;

use super::error::{ModelError, Result};
use super::iter::TreeIter;
use super::path::TreePath;
use super::traits::{ModelFlags, ModelSignals, TreeModel};
use super::value::{Value, ValueType};

/// A node ID for internal tracking.
type NodeId = u64;

/// Counter for generating unique node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Counter for store stamps, so iterators from different stores never mix.
static STORE_STAMP_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A node in the tree structure.
struct Node {
    values: Vec<Value>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    /// External references held on this node via `ref_node`.
    ref_count: usize,
}

/// Internal storage for tree nodes.
struct Storage {
    nodes: HashMap<NodeId, Node>,
    root_children: Vec<NodeId>,
}

impl Storage {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            root_children: Vec::new(),
        }
    }

    fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            None => &self.root_children,
            Some(id) => self
                .nodes
                .get(&id)
                .map(|n| n.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    fn children_of_mut(&mut self, parent: Option<NodeId>) -> Option<&mut Vec<NodeId>> {
        match parent {
            None => Some(&mut self.root_children),
            Some(id) => self.nodes.get_mut(&id).map(|n| &mut n.children),
        }
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    fn row_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent_of(id);
        self.children_of(parent).iter().position(|&c| c == id)
    }

    /// Builds the path of a node by walking its parent chain.
    fn path_of(&self, id: NodeId) -> Option<TreePath> {
        let mut indices = Vec::new();
        let mut current = id;
        loop {
            indices.push(self.row_of(current)?);
            match self.parent_of(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        indices.reverse();
        Some(TreePath::from_indices(indices))
    }

    /// Resolves a path to a node by descending the child lists.
    fn node_at_path(&self, path: &TreePath) -> Option<NodeId> {
        if path.is_root() {
            return None;
        }
        let mut parent = None;
        let mut node = None;
        for &index in path.indices() {
            let id = self.children_of(parent).get(index).copied()?;
            parent = Some(id);
            node = Some(id);
        }
        node
    }

    /// Removes a node and all its descendants from the node map.
    fn remove_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }
}

/// A hierarchical store with typed columns and persistent iterators.
///
/// # Example
///
/// ```
/// use trellis::model::{TreeStore, TreeModel, Value, ValueType};
///
/// let store = TreeStore::new(&[ValueType::String, ValueType::Bool]);
///
/// let parent = store
///     .append(None, vec!["Documents".into(), true.into()])
///     .unwrap();
/// store
///     .append(Some(&parent), vec!["notes.txt".into(), false.into()])
///     .unwrap();
///
/// assert_eq!(store.iter_n_children(None), 1);
/// assert_eq!(store.iter_n_children(Some(&parent)), 1);
/// assert_eq!(store.value(&parent, 0).as_str(), Some("Documents"));
/// ```
pub struct TreeStore {
    storage: RwLock<Storage>,
    column_types: Vec<ValueType>,
    /// Fixed for the lifetime of the store; iterators persist.
    stamp: u64,
    signals: ModelSignals,
}

impl TreeStore {
    /// Creates a new empty store with the given column types.
    pub fn new(column_types: &[ValueType]) -> Self {
        Self {
            storage: RwLock::new(Storage::new()),
            column_types: column_types.to_vec(),
            stamp: STORE_STAMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            signals: ModelSignals::new(),
        }
    }

    fn make_iter(&self, id: NodeId) -> TreeIter {
        TreeIter::new(self.stamp, id)
    }

    /// Resolves an iterator to a live node id.
    fn node_id(&self, storage: &Storage, iter: &TreeIter) -> Option<NodeId> {
        if iter.stamp() != self.stamp {
            return None;
        }
        let id = iter.user_data();
        storage.nodes.contains_key(&id).then_some(id)
    }

    fn check_values(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.column_types.len() {
            return Err(ModelError::ColumnCount {
                expected: self.column_types.len(),
                got: values.len(),
            });
        }
        for (column, (value, &ty)) in values.iter().zip(&self.column_types).enumerate() {
            if !value.matches(ty) {
                return Err(ModelError::TypeMismatch {
                    column,
                    expected: ty,
                });
            }
        }
        Ok(())
    }

    /// Inserts a row at `position` under `parent` (the root when `None`).
    ///
    /// `values` must supply one value per column, each matching the column's
    /// declared type ([`Value::None`] fits any column).
    ///
    /// Emits `row_inserted`, and `row_has_child_toggled` for the parent when
    /// this was its first child.
    pub fn insert(
        &self,
        parent: Option<&TreeIter>,
        position: usize,
        values: Vec<Value>,
    ) -> Result<TreeIter> {
        self.check_values(&values)?;

        let id = next_node_id();
        let path;
        let toggled;
        {
            let mut storage = self.storage.write();
            let parent_id = match parent {
                Some(iter) => Some(self.node_id(&storage, iter).ok_or(ModelError::StaleIter)?),
                None => None,
            };

            let len = storage.children_of(parent_id).len();
            if position > len {
                return Err(ModelError::OutOfRange {
                    index: position,
                    len,
                });
            }

            storage.nodes.insert(
                id,
                Node {
                    values,
                    children: Vec::new(),
                    parent: parent_id,
                    ref_count: 0,
                },
            );
            // children_of_mut cannot fail here, the parent was just resolved
            if let Some(children) = storage.children_of_mut(parent_id) {
                children.insert(position, id);
            }

            path = storage.path_of(id).unwrap_or_default();
            toggled = match parent_id {
                Some(pid) if storage.children_of(Some(pid)).len() == 1 => {
                    storage.path_of(pid).map(|p| (p, self.make_iter(pid)))
                }
                _ => None,
            };
        }

        let iter = self.make_iter(id);
        self.signals.row_inserted.emit((path, iter));
        if let Some((parent_path, parent_iter)) = toggled {
            self.signals
                .row_has_child_toggled
                .emit((parent_path, parent_iter));
        }
        Ok(iter)
    }

    /// Appends a row as the last child of `parent` (the root when `None`).
    pub fn append(&self, parent: Option<&TreeIter>, values: Vec<Value>) -> Result<TreeIter> {
        let position = {
            let storage = self.storage.read();
            let parent_id = match parent {
                Some(iter) => Some(self.node_id(&storage, iter).ok_or(ModelError::StaleIter)?),
                None => None,
            };
            storage.children_of(parent_id).len()
        };
        self.insert(parent, position, values)
    }

    /// Sets the value at `column` of the row `iter` points at.
    ///
    /// Emits `row_changed`.
    pub fn set_value(&self, iter: &TreeIter, column: usize, value: Value) -> Result<()> {
        let ty = *self
            .column_types
            .get(column)
            .ok_or(ModelError::OutOfRange {
                index: column,
                len: self.column_types.len(),
            })?;
        if !value.matches(ty) {
            return Err(ModelError::TypeMismatch {
                column,
                expected: ty,
            });
        }

        let path;
        {
            let mut storage = self.storage.write();
            let id = self.node_id(&storage, iter).ok_or(ModelError::StaleIter)?;
            path = storage.path_of(id).ok_or(ModelError::StaleIter)?;
            if let Some(node) = storage.nodes.get_mut(&id) {
                node.values[column] = value;
            }
        }

        self.signals.row_changed.emit((path, *iter));
        Ok(())
    }

    /// Removes the row `iter` points at, along with all its descendants.
    ///
    /// Emits `row_deleted` for the removed row (descendants go implicitly),
    /// and `row_has_child_toggled` for the parent when it lost its last child.
    pub fn remove(&self, iter: &TreeIter) -> Result<()> {
        let path;
        let toggled;
        {
            let mut storage = self.storage.write();
            let id = self.node_id(&storage, iter).ok_or(ModelError::StaleIter)?;
            path = storage.path_of(id).ok_or(ModelError::StaleIter)?;
            let parent_id = storage.parent_of(id);

            if let Some(children) = storage.children_of_mut(parent_id) {
                children.retain(|&c| c != id);
            }
            storage.remove_subtree(id);

            toggled = match parent_id {
                Some(pid) if storage.children_of(Some(pid)).is_empty() => {
                    storage.path_of(pid).map(|p| (p, self.make_iter(pid)))
                }
                _ => None,
            };
        }

        self.signals.row_deleted.emit(path);
        if let Some((parent_path, parent_iter)) = toggled {
            self.signals
                .row_has_child_toggled
                .emit((parent_path, parent_iter));
        }
        Ok(())
    }

    /// Reorders the children of `parent` (the root level when `None`).
    ///
    /// `new_order[new_position]` names the old position of the child now at
    /// `new_position`; it must be a permutation of `0..n_children`.
    ///
    /// Emits `rows_reordered`.
    pub fn reorder(&self, parent: Option<&TreeIter>, new_order: &[usize]) -> Result<()> {
        let parent_path;
        let parent_iter;
        {
            let mut storage = self.storage.write();
            let parent_id = match parent {
                Some(iter) => Some(self.node_id(&storage, iter).ok_or(ModelError::StaleIter)?),
                None => None,
            };

            let old = storage.children_of(parent_id).to_vec();
            if new_order.len() != old.len() {
                return Err(ModelError::InvalidPermutation);
            }
            let mut seen = vec![false; old.len()];
            for &pos in new_order {
                if pos >= old.len() || seen[pos] {
                    return Err(ModelError::InvalidPermutation);
                }
                seen[pos] = true;
            }

            let reordered: Vec<NodeId> = new_order.iter().map(|&pos| old[pos]).collect();
            if let Some(children) = storage.children_of_mut(parent_id) {
                *children = reordered;
            }

            parent_path = match parent_id {
                Some(pid) => storage.path_of(pid).ok_or(ModelError::StaleIter)?,
                None => TreePath::root(),
            };
            parent_iter = parent_id.map(|pid| self.make_iter(pid));
        }

        self.signals
            .rows_reordered
            .emit((parent_path, parent_iter, new_order.to_vec()));
        Ok(())
    }

    /// Removes all rows, emitting `row_deleted` per top-level row.
    pub fn clear(&self) {
        loop {
            let last = {
                let storage = self.storage.read();
                match storage.root_children.last() {
                    Some(&id) => self.make_iter(id),
                    None => break,
                }
            };
            // Cannot fail: the iterator was just resolved under the lock.
            let _ = self.remove(&last);
        }
    }

    /// Returns the number of external references held on `iter`'s row.
    ///
    /// Diagnostic accessor for consumers that verify reference discipline.
    pub fn node_ref_count(&self, iter: &TreeIter) -> Option<usize> {
        let storage = self.storage.read();
        let id = self.node_id(&storage, iter)?;
        storage.nodes.get(&id).map(|n| n.ref_count)
    }

    /// Returns the total number of live rows.
    pub fn len(&self) -> usize {
        self.storage.read().nodes.len()
    }

    /// Returns `true` if the store has no rows.
    pub fn is_empty(&self) -> bool {
        self.storage.read().nodes.is_empty()
    }
}

impl TreeModel for TreeStore {
    fn flags(&self) -> ModelFlags {
        ModelFlags {
            iters_persist: true,
            list_only: false,
        }
    }

    fn n_columns(&self) -> usize {
        self.column_types.len()
    }

    fn column_type(&self, column: usize) -> Option<ValueType> {
        self.column_types.get(column).copied()
    }

    fn iter(&self, path: &TreePath) -> Option<TreeIter> {
        let storage = self.storage.read();
        let id = storage.node_at_path(path)?;
        Some(self.make_iter(id))
    }

    fn path(&self, iter: &TreeIter) -> Option<TreePath> {
        let storage = self.storage.read();
        let id = self.node_id(&storage, iter)?;
        storage.path_of(id)
    }

    fn value(&self, iter: &TreeIter, column: usize) -> Value {
        let storage = self.storage.read();
        let Some(id) = self.node_id(&storage, iter) else {
            return Value::None;
        };
        storage
            .nodes
            .get(&id)
            .and_then(|n| n.values.get(column))
            .cloned()
            .unwrap_or(Value::None)
    }

    fn iter_next(&self, iter: &TreeIter) -> Option<TreeIter> {
        let storage = self.storage.read();
        let id = self.node_id(&storage, iter)?;
        let parent = storage.parent_of(id);
        let siblings = storage.children_of(parent);
        let row = siblings.iter().position(|&c| c == id)?;
        siblings.get(row + 1).map(|&next| self.make_iter(next))
    }

    fn iter_children(&self, parent: Option<&TreeIter>) -> Option<TreeIter> {
        self.iter_nth_child(parent, 0)
    }

    fn iter_n_children(&self, parent: Option<&TreeIter>) -> usize {
        let storage = self.storage.read();
        let parent_id = match parent {
            Some(iter) => match self.node_id(&storage, iter) {
                Some(id) => Some(id),
                None => return 0,
            },
            None => None,
        };
        storage.children_of(parent_id).len()
    }

    fn iter_nth_child(&self, parent: Option<&TreeIter>, n: usize) -> Option<TreeIter> {
        let storage = self.storage.read();
        let parent_id = match parent {
            Some(iter) => Some(self.node_id(&storage, iter)?),
            None => None,
        };
        storage
            .children_of(parent_id)
            .get(n)
            .map(|&id| self.make_iter(id))
    }

    fn iter_parent(&self, child: &TreeIter) -> Option<TreeIter> {
        let storage = self.storage.read();
        let id = self.node_id(&storage, child)?;
        storage.parent_of(id).map(|pid| self.make_iter(pid))
    }

    fn ref_node(&self, iter: &TreeIter) {
        let mut storage = self.storage.write();
        if let Some(id) = self.node_id(&storage, iter)
            && let Some(node) = storage.nodes.get_mut(&id)
        {
            node.ref_count += 1;
        }
    }

    fn unref_node(&self, iter: &TreeIter) {
        let mut storage = self.storage.write();
        if let Some(id) = self.node_id(&storage, iter)
            && let Some(node) = storage.nodes.get_mut(&id)
        {
            if node.ref_count == 0 {
                tracing::warn!(
                    target: targets::STORE,
                    "unref_node called on a row with no outstanding references"
                );
                return;
            }
            node.ref_count -= 1;
        }
    }

    fn signals(&self) -> &ModelSignals {
        &self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn sample_store() -> TreeStore {
        TreeStore::new(&[ValueType::String, ValueType::Bool])
    }

    #[test]
    fn test_basic_hierarchy() {
        let store = sample_store();

        let root = store
            .append(None, vec!["Root".into(), true.into()])
            .unwrap();
        let child = store
            .append(Some(&root), vec!["Child".into(), false.into()])
            .unwrap();
        store
            .append(Some(&child), vec!["Grandchild".into(), true.into()])
            .unwrap();

        assert_eq!(store.iter_n_children(None), 1);
        assert_eq!(store.iter_n_children(Some(&root)), 1);
        assert!(store.iter_has_child(&child));

        let grandchild = store.iter(&TreePath::from_indices([0, 0, 0])).unwrap();
        assert_eq!(store.value(&grandchild, 0).as_str(), Some("Grandchild"));
        assert_eq!(
            store.path(&grandchild),
            Some(TreePath::from_indices([0, 0, 0]))
        );

        let up = store.iter_parent(&grandchild).unwrap();
        assert_eq!(store.value(&up, 0).as_str(), Some("Child"));
    }

    #[test]
    fn test_iter_next_walks_siblings() {
        let store = sample_store();
        for name in ["a", "b", "c"] {
            store.append(None, vec![name.into(), true.into()]).unwrap();
        }

        let mut iter = store.iter_children(None);
        let mut names = Vec::new();
        while let Some(current) = iter {
            names.push(store.value(&current, 0).into_string().unwrap());
            iter = store.iter_next(&current);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_value_validation() {
        let store = sample_store();

        let err = store.append(None, vec!["only one".into()]).unwrap_err();
        assert_eq!(err, ModelError::ColumnCount { expected: 2, got: 1 });

        let err = store
            .append(None, vec!["name".into(), Value::Int(3)])
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::TypeMismatch {
                column: 1,
                expected: ValueType::Bool
            }
        );

        // None fits any column
        let iter = store
            .append(None, vec!["name".into(), Value::None])
            .unwrap();
        assert_eq!(store.value(&iter, 1), Value::None);
    }

    #[test]
    fn test_insert_and_remove_signals() {
        let store = sample_store();
        let events = Arc::new(Mutex::new(Vec::new()));

        let ev = events.clone();
        store.signals().row_inserted.connect(move |(path, _)| {
            ev.lock().push(format!("inserted {path}"));
        });
        let ev = events.clone();
        store.signals().row_deleted.connect(move |path| {
            ev.lock().push(format!("deleted {path}"));
        });
        let ev = events.clone();
        store
            .signals()
            .row_has_child_toggled
            .connect(move |(path, _)| {
                ev.lock().push(format!("toggled {path}"));
            });

        let root = store
            .append(None, vec!["Root".into(), true.into()])
            .unwrap();
        let child = store
            .append(Some(&root), vec!["Child".into(), true.into()])
            .unwrap();
        store.remove(&child).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                "inserted 0",
                "inserted 0:0",
                "toggled 0", // first child appeared
                "deleted 0:0",
                "toggled 0", // last child went away
            ]
        );
    }

    #[test]
    fn test_reorder() {
        let store = sample_store();
        for name in ["a", "b", "c"] {
            store.append(None, vec![name.into(), true.into()]).unwrap();
        }

        let orders = Arc::new(Mutex::new(Vec::new()));
        let ord = orders.clone();
        store
            .signals()
            .rows_reordered
            .connect(move |(path, _, order)| {
                ord.lock().push((path.clone(), order.clone()));
            });

        store.reorder(None, &[2, 0, 1]).unwrap();

        let first = store.iter(&TreePath::from_index(0)).unwrap();
        assert_eq!(store.value(&first, 0).as_str(), Some("c"));
        let second = store.iter(&TreePath::from_index(1)).unwrap();
        assert_eq!(store.value(&second, 0).as_str(), Some("a"));

        assert_eq!(*orders.lock(), vec![(TreePath::root(), vec![2, 0, 1])]);

        assert_eq!(
            store.reorder(None, &[0, 0, 1]).unwrap_err(),
            ModelError::InvalidPermutation
        );
        assert_eq!(
            store.reorder(None, &[0, 1]).unwrap_err(),
            ModelError::InvalidPermutation
        );
    }

    #[test]
    fn test_stale_iter_is_rejected() {
        let store = sample_store();
        let iter = store.append(None, vec!["a".into(), true.into()]).unwrap();
        store.remove(&iter).unwrap();

        assert_eq!(store.value(&iter, 0), Value::None);
        assert!(store.path(&iter).is_none());
        assert_eq!(store.remove(&iter).unwrap_err(), ModelError::StaleIter);

        // Iterators from another store are foreign here
        let other = sample_store();
        let foreign = other.append(None, vec!["b".into(), true.into()]).unwrap();
        assert!(store.path(&foreign).is_none());
    }

    #[test]
    fn test_ref_counting() {
        let store = sample_store();
        let iter = store.append(None, vec!["a".into(), true.into()]).unwrap();

        assert_eq!(store.node_ref_count(&iter), Some(0));
        store.ref_node(&iter);
        store.ref_node(&iter);
        assert_eq!(store.node_ref_count(&iter), Some(2));
        store.unref_node(&iter);
        assert_eq!(store.node_ref_count(&iter), Some(1));
        store.unref_node(&iter);
        // Extra unref is ignored
        store.unref_node(&iter);
        assert_eq!(store.node_ref_count(&iter), Some(0));
    }

    #[test]
    fn test_clear() {
        let store = sample_store();
        let root = store.append(None, vec!["a".into(), true.into()]).unwrap();
        store
            .append(Some(&root), vec!["b".into(), true.into()])
            .unwrap();
        store.append(None, vec!["c".into(), true.into()]).unwrap();

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.iter_n_children(None), 0);
    }
}
