//! The lazily-built level/element cache behind [`FilterModel`](super::FilterModel).
//!
//! The cache mirrors slices of the child model: one [`FilterLevel`] per
//! materialized sibling list, one [`FilterElt`] per materialized row. Levels
//! and elements live in generational arenas; parent links are non-owning keys,
//! so tearing a subtree down is a matter of removing arena entries.

use slotmap::{Key, KeyData, SlotMap, new_key_type};
use trellis_core::logging::targets;

use crate::model::iter::TreeIter;
use crate::model::path::TreePath;
use crate::model::traits::TreeModel;

new_key_type! {
    /// Arena key for a [`FilterLevel`].
    pub(crate) struct LevelKey;

    /// Arena key for a [`FilterElt`].
    pub(crate) struct EltKey;
}

/// One materialized row projection.
pub(super) struct FilterElt {
    /// Index of the row in the child model's sibling list (relative to the
    /// virtual root).
    pub offset: usize,
    /// Cached child iterator; only kept when the child's iterators persist.
    pub child_iter: Option<TreeIter>,
    /// External references held on this row via `ref_node`.
    pub ref_count: usize,
    /// Number of descendant levels below this element whose reference count
    /// is zero.
    pub zero_ref_count: usize,
    /// The element's child level, once built.
    pub children: Option<LevelKey>,
    /// Whether the row currently passes the visibility policy.
    pub visible: bool,
    /// The level this element belongs to.
    pub parent: LevelKey,
    /// This element holds one child-model node reference of its own (taken
    /// when it was materialized by an insert notification).
    pub child_ref: bool,
}

/// One materialized sibling list.
pub(super) struct FilterLevel {
    /// All materialized elements, sorted by offset. May be sparse: rows
    /// inserted while hidden are not materialized.
    pub seq: Vec<EltKey>,
    /// The subset of `seq` currently passing the visibility policy, sorted by
    /// offset. Filter-side indices are positions in this sequence.
    pub visible: Vec<EltKey>,
    /// Sum of the reference counts of the level's elements.
    pub ref_count: usize,
    /// The element this level hangs off, `None` for the root level.
    pub parent: Option<EltKey>,
}

/// The whole cache state of one filter proxy.
///
/// Kept separate from the proxy so the synchronizer can mutate it under a
/// single write lock and emit derived signals after the lock is released.
pub(super) struct FilterState {
    pub levels: SlotMap<LevelKey, FilterLevel>,
    pub elts: SlotMap<EltKey, FilterElt>,
    /// The root level, built on first use.
    pub root: Option<LevelKey>,
    /// Generation counter; advanced whenever the cache is restructured
    /// wholesale, invalidating all outstanding iterators at once.
    pub stamp: u64,
    /// Child-model path acting as the filter's root, if any.
    pub virtual_root: Option<TreePath>,
    /// Set once the virtual root row has been deleted from the child model;
    /// no structural work happens afterwards.
    pub virtual_root_deleted: bool,
    /// Re-entrancy guard: suppresses level building while a deletion
    /// notification is being processed.
    pub in_row_deleted: bool,
}

impl FilterState {
    pub fn new(virtual_root: Option<TreePath>) -> Self {
        Self {
            levels: SlotMap::with_key(),
            elts: SlotMap::with_key(),
            root: None,
            stamp: 1,
            virtual_root,
            virtual_root_deleted: false,
            in_row_deleted: false,
        }
    }

    // ---- iterator encoding -------------------------------------------------

    /// Wraps an element key into a filter-side iterator.
    pub fn iter_for(&self, ekey: EltKey) -> TreeIter {
        let lkey = self.elts[ekey].parent;
        TreeIter::with_second(self.stamp, ekey.data().as_ffi(), lkey.data().as_ffi())
    }

    /// Resolves a filter-side iterator back to a live element.
    pub fn resolve(&self, iter: &TreeIter) -> Option<EltKey> {
        if iter.stamp() != self.stamp {
            return None;
        }
        let ekey = EltKey::from(KeyData::from_ffi(iter.user_data()));
        let lkey = LevelKey::from(KeyData::from_ffi(iter.user_data2()));
        let elt = self.elts.get(ekey)?;
        (elt.parent == lkey && self.levels.contains_key(lkey)).then_some(ekey)
    }

    // ---- child-model addressing --------------------------------------------

    /// Absolute child-model path of an element, virtual root included.
    pub fn child_path_for_elt(&self, ekey: EltKey) -> TreePath {
        let mut indices = Vec::new();
        let mut current = Some(ekey);
        while let Some(ek) = current {
            let elt = &self.elts[ek];
            indices.push(elt.offset);
            current = self.levels[elt.parent].parent;
        }
        indices.reverse();
        let rel = TreePath::from_indices(indices);
        match &self.virtual_root {
            Some(vroot) => vroot.join(&rel),
            None => rel,
        }
    }

    /// Child-model iterator of an element, from the cache or by path lookup.
    pub fn child_iter_for_elt(&self, child: &dyn TreeModel, ekey: EltKey) -> Option<TreeIter> {
        if let Some(iter) = self.elts[ekey].child_iter {
            return Some(iter);
        }
        child.iter(&self.child_path_for_elt(ekey))
    }

    /// Child-model iterator for the parent row of a level: the parent
    /// element's row, or the virtual root for the root level.
    ///
    /// The outer `Option` is the failure channel: `None` means the parent row
    /// could not be resolved at all.
    pub fn level_parent_child_iter(
        &self,
        child: &dyn TreeModel,
        parent_elt: Option<EltKey>,
    ) -> Option<Option<TreeIter>> {
        match parent_elt {
            Some(ekey) => Some(Some(self.child_iter_for_elt(child, ekey)?)),
            None => match &self.virtual_root {
                Some(vroot) => Some(Some(child.iter(vroot)?)),
                None => Some(None),
            },
        }
    }

    // ---- filter-side addressing --------------------------------------------

    /// Position of an element within its level's visible sequence.
    pub fn visible_position(&self, ekey: EltKey) -> Option<usize> {
        let level = &self.levels[self.elts[ekey].parent];
        level.visible.iter().position(|&e| e == ekey)
    }

    /// Filter-side path of an element: visible-sequence indices from the root
    /// down. `None` if the element or any ancestor is currently hidden.
    pub fn filter_path_for_elt(&self, ekey: EltKey) -> Option<TreePath> {
        let mut indices = Vec::new();
        let mut current = Some(ekey);
        while let Some(ek) = current {
            if !self.elts[ek].visible {
                return None;
            }
            indices.push(self.visible_position(ek)?);
            current = self.levels[self.elts[ek].parent].parent;
        }
        indices.reverse();
        Some(TreePath::from_indices(indices))
    }

    /// Finds the element with the given child offset in a level.
    pub fn elt_at_offset(&self, lkey: LevelKey, offset: usize) -> Option<EltKey> {
        let level = &self.levels[lkey];
        level
            .seq
            .binary_search_by_key(&offset, |&e| self.elts[e].offset)
            .ok()
            .map(|pos| level.seq[pos])
    }

    // ---- level building -----------------------------------------------------

    /// Materializes the sibling list under `parent_elt` (the root level when
    /// `None`), evaluating the visibility policy over every sibling.
    ///
    /// Returns `None` when the child model reports no children there, when
    /// the parent row cannot be resolved, or while a deletion notification is
    /// being processed.
    pub fn build_level(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        parent_elt: Option<EltKey>,
    ) -> Option<LevelKey> {
        if self.in_row_deleted || self.virtual_root_deleted {
            return None;
        }
        if let Some(ekey) = parent_elt
            && self.elts[ekey].children.is_some()
        {
            return self.elts[ekey].children;
        }

        let parent_iter = self.level_parent_child_iter(child, parent_elt)?;
        let n = child.iter_n_children(parent_iter.as_ref());
        if n == 0 {
            return None;
        }

        let persist = child.flags().iters_persist;
        let lkey = self.levels.insert(FilterLevel {
            seq: Vec::with_capacity(n),
            visible: Vec::new(),
            ref_count: 0,
            parent: parent_elt,
        });

        for offset in 0..n {
            let Some(child_iter) = child.iter_nth_child(parent_iter.as_ref(), offset) else {
                continue;
            };
            let visible = vis(&child_iter);
            let ekey = self.elts.insert(FilterElt {
                offset,
                child_iter: persist.then_some(child_iter),
                ref_count: 0,
                zero_ref_count: 0,
                children: None,
                visible,
                parent: lkey,
                child_ref: false,
            });
            self.levels[lkey].seq.push(ekey);
            if visible {
                self.levels[lkey].visible.push(ekey);
            }
        }

        match parent_elt {
            Some(ekey) => {
                self.elts[ekey].children = Some(lkey);
                // New level starts unreferenced.
                self.bump_ancestor_zero_refs(lkey, 1);
            }
            None => self.root = Some(lkey),
        }
        Some(lkey)
    }

    /// Materializes a single not-yet-cached sibling by offset.
    ///
    /// Used when a notification or conversion addresses a row that was
    /// skipped at build time (inserted while hidden). Only visible rows are
    /// materialized; hidden ones stay off the cache.
    pub fn fetch_child(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        lkey: LevelKey,
        offset: usize,
    ) -> Option<EltKey> {
        let parent_elt = self.levels[lkey].parent;
        let parent_iter = self.level_parent_child_iter(child, parent_elt)?;
        if offset >= child.iter_n_children(parent_iter.as_ref()) {
            return None;
        }
        let child_iter = child.iter_nth_child(parent_iter.as_ref(), offset)?;
        if !vis(&child_iter) {
            return None;
        }

        let persist = child.flags().iters_persist;
        let ekey = self.elts.insert(FilterElt {
            offset,
            child_iter: persist.then_some(child_iter),
            ref_count: 0,
            zero_ref_count: 0,
            children: None,
            visible: true,
            parent: lkey,
            child_ref: false,
        });
        self.insert_sorted(lkey, ekey);
        Some(ekey)
    }

    /// Inserts an element into its level's sequences at the offset-sorted
    /// positions.
    pub fn insert_sorted(&mut self, lkey: LevelKey, ekey: EltKey) {
        let offset = self.elts[ekey].offset;
        let visible = self.elts[ekey].visible;
        let seq_pos = self.levels[lkey]
            .seq
            .iter()
            .position(|&e| self.elts[e].offset > offset)
            .unwrap_or(self.levels[lkey].seq.len());
        self.levels[lkey].seq.insert(seq_pos, ekey);
        if visible {
            let vis_pos = self.levels[lkey]
                .visible
                .iter()
                .position(|&e| self.elts[e].offset > offset)
                .unwrap_or(self.levels[lkey].visible.len());
            self.levels[lkey].visible.insert(vis_pos, ekey);
        }
    }

    /// Tears a level down, recursively, releasing child-model references
    /// unless the underlying rows are already gone (`rows_gone`).
    pub fn free_level(&mut self, child: &dyn TreeModel, lkey: LevelKey, rows_gone: bool) {
        let elts: Vec<EltKey> = self.levels[lkey].seq.clone();
        for ekey in elts {
            if let Some(sub) = self.elts[ekey].children {
                self.free_level(child, sub, rows_gone);
            }
            if self.elts[ekey].child_ref
                && !rows_gone
                && let Some(iter) = self.child_iter_for_elt(child, ekey)
            {
                child.unref_node(&iter);
            }
            self.elts.remove(ekey);
        }

        // An unreferenced level stops counting against its ancestors once
        // it is gone.
        if self.levels[lkey].ref_count == 0 {
            self.bump_ancestor_zero_refs(lkey, -1);
        }

        match self.levels[lkey].parent {
            Some(parent_elt) => {
                if let Some(elt) = self.elts.get_mut(parent_elt) {
                    elt.children = None;
                }
            }
            None => self.root = None,
        }
        self.levels.remove(lkey);
    }

    /// Drops the entire cache and advances the stamp.
    pub fn clear_all(&mut self, child: &dyn TreeModel, rows_gone: bool) {
        if let Some(root) = self.root {
            self.free_level(child, root, rows_gone);
        }
        self.root = None;
        self.stamp = self.stamp.wrapping_add(1);
    }

    // ---- reference accounting -----------------------------------------------

    /// Adjusts the zero-ref counts of every ancestor element of a level.
    fn bump_ancestor_zero_refs(&mut self, lkey: LevelKey, delta: isize) {
        let mut current = self.levels[lkey].parent;
        while let Some(ekey) = current {
            let elt = &mut self.elts[ekey];
            elt.zero_ref_count = elt.zero_ref_count.checked_add_signed(delta).unwrap_or(0);
            current = self.levels[elt.parent].parent;
        }
    }

    /// Takes one reference on an element, propagating to the child model when
    /// requested.
    pub fn ref_elt(&mut self, child: &dyn TreeModel, ekey: EltKey, propagate: bool) {
        if propagate
            && let Some(iter) = self.child_iter_for_elt(child, ekey)
        {
            child.ref_node(&iter);
        }
        self.elts[ekey].ref_count += 1;
        let lkey = self.elts[ekey].parent;
        self.levels[lkey].ref_count += 1;
        if self.levels[lkey].ref_count == 1 {
            // No longer an all-unreferenced descendant.
            self.bump_ancestor_zero_refs(lkey, -1);
        }
    }

    /// Releases one reference previously taken with [`ref_elt`].
    pub fn unref_elt(&mut self, child: &dyn TreeModel, ekey: EltKey, propagate: bool) {
        if self.elts[ekey].ref_count == 0 {
            tracing::warn!(
                target: targets::FILTER,
                "unref on a filter node with no outstanding references"
            );
            return;
        }
        if propagate
            && let Some(iter) = self.child_iter_for_elt(child, ekey)
        {
            child.unref_node(&iter);
        }
        self.elts[ekey].ref_count -= 1;
        let lkey = self.elts[ekey].parent;
        self.levels[lkey].ref_count -= 1;
        if self.levels[lkey].ref_count == 0 {
            self.bump_ancestor_zero_refs(lkey, 1);
        }
    }

    /// Frees every non-root level that no external iterator holds live,
    /// bottom-up. The root level is always retained.
    pub fn collect_unreferenced(&mut self, child: &dyn TreeModel) {
        let Some(root) = self.root else { return };
        self.collect_level(child, root, false);
    }

    fn collect_level(&mut self, child: &dyn TreeModel, lkey: LevelKey, can_free: bool) {
        let elts: Vec<EltKey> = self.levels[lkey].seq.clone();
        for ekey in elts {
            // Nothing unreferenced below this element, nothing to collect.
            if self.elts[ekey].zero_ref_count == 0 {
                continue;
            }
            if let Some(sub) = self.elts[ekey].children {
                self.collect_level(child, sub, true);
            }
        }

        if can_free
            && self.levels[lkey].ref_count == 0
            && self.levels[lkey]
                .seq
                .iter()
                .all(|&e| self.elts[e].children.is_none())
        {
            self.free_level(child, lkey, false);
        }
    }
}
