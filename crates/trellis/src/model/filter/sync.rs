//! Incremental synchronization against child-model change notifications.
//!
//! Each handler patches the cache under the proxy's write lock and records
//! the filter-side notifications to emit in an [`OutEvent`] list; the proxy
//! emits them after the lock is released, so consumers reacting to a derived
//! signal always observe a self-consistent cache.

use trellis_core::logging::targets;

use crate::model::iter::TreeIter;
use crate::model::path::TreePath;
use crate::model::traits::TreeModel;

use super::cache::{EltKey, FilterState, LevelKey};

/// A filter-side notification waiting to be emitted.
pub(super) enum OutEvent {
    Changed(TreePath, TreeIter),
    Inserted(TreePath, TreeIter),
    HasChildToggled(TreePath, TreeIter),
    Deleted(TreePath),
    Reordered(TreePath, Option<TreeIter>, Vec<usize>),
}

impl FilterState {
    /// Strips the virtual root prefix off an absolute child path.
    ///
    /// Returns `None` when the path lies outside the filtered subtree.
    pub fn to_relative(&self, child_path: &TreePath) -> Option<TreePath> {
        match &self.virtual_root {
            Some(vroot) => {
                if !vroot.is_ancestor_of(child_path) {
                    return None;
                }
                child_path.strip_prefix(vroot)
            }
            None => Some(child_path.clone()),
        }
    }

    /// Walks cached levels down to the level owning the final component of
    /// `rel`. Does not build or fetch anything.
    fn cached_level_for(&self, rel: &TreePath) -> Option<LevelKey> {
        let mut lkey = self.root?;
        let indices = rel.indices();
        for &offset in &indices[..indices.len() - 1] {
            let ekey = self.elt_at_offset(lkey, offset)?;
            lkey = self.elts[ekey].children?;
        }
        Some(lkey)
    }

    /// Builds the root level and records a row-inserted per visible element.
    fn build_root_with_events(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        out: &mut Vec<OutEvent>,
    ) {
        let Some(root) = self.build_level(child, vis, None) else {
            return;
        };
        let visible: Vec<EltKey> = self.levels[root].visible.clone();
        for (index, ekey) in visible.into_iter().enumerate() {
            out.push(OutEvent::Inserted(
                TreePath::from_index(index),
                self.iter_for(ekey),
            ));
        }
    }

    /// Records the has-child-toggled for the parent row of a level, if that
    /// parent is currently exposed.
    fn toggle_event_for_level_parent(&self, lkey: LevelKey, out: &mut Vec<OutEvent>) {
        if let Some(parent_elt) = self.levels[lkey].parent
            && let Some(path) = self.filter_path_for_elt(parent_elt)
        {
            out.push(OutEvent::HasChildToggled(path, self.iter_for(parent_elt)));
        }
    }

    /// Makes a newly visible element externally known: parent toggled first
    /// when this is the level's first visible row, then the insertion itself.
    fn announce_visible(&self, ekey: EltKey, out: &mut Vec<OutEvent>) {
        let lkey = self.elts[ekey].parent;
        if self.levels[lkey].visible.len() == 1 {
            self.toggle_event_for_level_parent(lkey, out);
        }
        if let Some(path) = self.filter_path_for_elt(ekey) {
            out.push(OutEvent::Inserted(path, self.iter_for(ekey)));
        }
    }

    // ---- row-changed --------------------------------------------------------

    /// `forward` re-emits the change for rows that stay visible; a refilter
    /// pass disables it, since only visibility transitions happened there.
    pub fn handle_row_changed(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        child_path: &TreePath,
        forward: bool,
        out: &mut Vec<OutEvent>,
    ) {
        if self.virtual_root_deleted {
            return;
        }
        let Some(rel) = self.to_relative(child_path) else {
            return;
        };
        if rel.is_root() {
            return;
        }
        // A fresh build reflects the new state already.
        let Some(mut lkey) = self.root else {
            self.build_root_with_events(child, vis, out);
            return;
        };

        // Descend, building intermediate levels so a newly visible descendant
        // can materialize its ancestor chain.
        let indices = rel.indices();
        for &offset in &indices[..indices.len() - 1] {
            let Some(ekey) = self.elt_at_offset(lkey, offset) else {
                // Hidden ancestor, the row cannot become reachable.
                return;
            };
            lkey = match self.elts[ekey].children {
                Some(sub) => sub,
                None => match self.build_level(child, vis, Some(ekey)) {
                    Some(sub) => sub,
                    None => return,
                },
            };
        }

        let offset = rel.last_index().expect("path is not the root");
        let Some(child_iter) = child.iter(child_path) else {
            return;
        };
        let requested = vis(&child_iter);

        let Some(ekey) = self.elt_at_offset(lkey, offset) else {
            // Was hidden and uncached.
            if requested
                && let Some(new) = self.fetch_child(child, vis, lkey, offset)
            {
                self.announce_visible(new, out);
            }
            return;
        };

        match (self.elts[ekey].visible, requested) {
            (false, false) => {}
            (false, true) => {
                self.elts[ekey].visible = true;
                let off = self.elts[ekey].offset;
                let pos = self.levels[lkey]
                    .visible
                    .iter()
                    .position(|&e| self.elts[e].offset > off)
                    .unwrap_or(self.levels[lkey].visible.len());
                self.levels[lkey].visible.insert(pos, ekey);
                self.announce_visible(ekey, out);
            }
            (true, false) => {
                let path = self.filter_path_for_elt(ekey);
                self.levels[lkey].visible.retain(|&e| e != ekey);
                self.elts[ekey].visible = false;
                if let Some(path) = path {
                    out.push(OutEvent::Deleted(path));
                    if self.levels[lkey].visible.is_empty() {
                        self.toggle_event_for_level_parent(lkey, out);
                    }
                }
            }
            (true, true) => {
                if !forward {
                    return;
                }
                let Some(path) = self.filter_path_for_elt(ekey) else {
                    return;
                };
                out.push(OutEvent::Changed(path.clone(), self.iter_for(ekey)));

                // The row's own child list may have appeared or vanished.
                let has_children = child.iter_has_child(&child_iter);
                match self.elts[ekey].children {
                    Some(sub) if !has_children => {
                        self.free_level(child, sub, false);
                        out.push(OutEvent::HasChildToggled(path, self.iter_for(ekey)));
                    }
                    None if has_children => {
                        out.push(OutEvent::HasChildToggled(path, self.iter_for(ekey)));
                    }
                    _ => {}
                }
            }
        }
    }

    // ---- row-inserted -------------------------------------------------------

    /// Shifts the stored virtual root when a sibling is inserted at or before
    /// one of its components.
    fn adjust_virtual_root_on_insert(&mut self, child_path: &TreePath) {
        let Some(vroot) = &self.virtual_root else {
            return;
        };
        let depth = child_path.depth();
        if depth == 0 || depth > vroot.depth() {
            return;
        }
        let inserted = child_path.indices();
        let v = vroot.indices();
        if inserted[..depth - 1] == v[..depth - 1] && inserted[depth - 1] <= v[depth - 1] {
            let mut indices = v.to_vec();
            indices[depth - 1] += 1;
            self.virtual_root = Some(TreePath::from_indices(indices));
        }
    }

    pub fn handle_row_inserted(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        child_path: &TreePath,
        out: &mut Vec<OutEvent>,
    ) {
        if self.virtual_root_deleted {
            return;
        }
        self.adjust_virtual_root_on_insert(child_path);
        let Some(rel) = self.to_relative(child_path) else {
            return;
        };
        if rel.is_root() {
            return;
        }
        if self.root.is_none() {
            self.build_root_with_events(child, vis, out);
            return;
        }

        let Some(lkey) = self.cached_level_for(&rel) else {
            // The affected level is not cached; a later build sees the row.
            return;
        };
        let offset = rel.last_index().expect("path is not the root");

        // Keep every cached sibling, hidden ones included, aligned with the
        // child model's indices.
        let elts: Vec<EltKey> = self.levels[lkey].seq.clone();
        for ekey in elts {
            if self.elts[ekey].offset >= offset {
                self.elts[ekey].offset += 1;
            }
        }

        let Some(child_iter) = child.iter(child_path) else {
            return;
        };
        if !vis(&child_iter) {
            return;
        }

        let persist = child.flags().iters_persist;
        let ekey = self.elts.insert(super::cache::FilterElt {
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
        // Rows materialized below the root level hold their child node live.
        if self.levels[lkey].parent.is_some() {
            child.ref_node(&child_iter);
            self.elts[ekey].child_ref = true;
        }
        self.announce_visible(ekey, out);
    }

    // ---- row-has-child-toggled ----------------------------------------------

    pub fn handle_row_has_child_toggled(
        &mut self,
        child: &dyn TreeModel,
        vis: &dyn Fn(&TreeIter) -> bool,
        child_path: &TreePath,
        out: &mut Vec<OutEvent>,
    ) {
        if self.virtual_root_deleted {
            return;
        }
        let Some(rel) = self.to_relative(child_path) else {
            return;
        };
        if rel.is_root() {
            return;
        }
        let Some(lkey) = self.cached_level_for(&rel) else {
            return;
        };
        let offset = rel.last_index().expect("path is not the root");
        let Some(ekey) = self.elt_at_offset(lkey, offset) else {
            return;
        };
        let Some(child_iter) = self.child_iter_for_elt(child, ekey) else {
            return;
        };

        // A multiply-referenced row is one a consumer is watching closely;
        // build its child level now so subtree notifications are not missed.
        if self.elts[ekey].ref_count > 1
            && self.elts[ekey].children.is_none()
            && child.iter_has_child(&child_iter)
        {
            self.build_level(child, vis, Some(ekey));
        }

        if let Some(path) = self.filter_path_for_elt(ekey) {
            out.push(OutEvent::HasChildToggled(path, self.iter_for(ekey)));
        }
    }

    // ---- row-deleted --------------------------------------------------------

    /// Shifts the stored virtual root when a sibling before one of its
    /// components is deleted.
    fn adjust_virtual_root_on_delete(&mut self, child_path: &TreePath) {
        let Some(vroot) = &self.virtual_root else {
            return;
        };
        let depth = child_path.depth();
        if depth == 0 || depth > vroot.depth() {
            return;
        }
        let deleted = child_path.indices();
        let v = vroot.indices();
        if deleted[..depth - 1] == v[..depth - 1] && deleted[depth - 1] < v[depth - 1] {
            let mut indices = v.to_vec();
            indices[depth - 1] -= 1;
            self.virtual_root = Some(TreePath::from_indices(indices));
        }
    }

    pub fn handle_row_deleted(
        &mut self,
        child: &dyn TreeModel,
        child_path: &TreePath,
        out: &mut Vec<OutEvent>,
    ) {
        if self.virtual_root_deleted {
            return;
        }

        if let Some(vroot) = &self.virtual_root
            && (child_path == vroot || child_path.is_ancestor_of(vroot))
        {
            // The filtered view collapses; the rows are already gone, so no
            // well-formed deletions can be emitted for them.
            tracing::debug!(
                target: targets::FILTER,
                %child_path,
                "virtual root deleted, dropping the whole cache"
            );
            self.virtual_root_deleted = true;
            self.clear_all(child, true);
            return;
        }
        self.adjust_virtual_root_on_delete(child_path);

        let Some(rel) = self.to_relative(child_path) else {
            return;
        };
        if rel.is_root() || self.root.is_none() {
            return;
        }

        self.in_row_deleted = true;
        self.delete_relative(child, &rel, out);
        self.in_row_deleted = false;
    }

    fn delete_relative(&mut self, child: &dyn TreeModel, rel: &TreePath, out: &mut Vec<OutEvent>) {
        let Some(lkey) = self.cached_level_for(rel) else {
            return;
        };
        let offset = rel.last_index().expect("path is not the root");

        let Some(ekey) = self.elt_at_offset(lkey, offset) else {
            // Never materialized: only the sibling offsets need fixing.
            self.shift_offsets_after_delete(lkey, offset);
            return;
        };

        // Strip forced references down to at most one; the row is gone, so
        // nothing is propagated to the child model.
        while self.elts[ekey].ref_count > 1 {
            self.unref_elt(child, ekey, false);
        }

        let was_visible = self.elts[ekey].visible;
        let path = self.filter_path_for_elt(ekey);

        if let Some(sub) = self.elts[ekey].children {
            self.free_level(child, sub, true);
        }
        if self.elts[ekey].ref_count == 1 {
            self.unref_elt(child, ekey, false);
        }

        self.levels[lkey].seq.retain(|&e| e != ekey);
        self.levels[lkey].visible.retain(|&e| e != ekey);
        self.elts.remove(ekey);
        self.shift_offsets_after_delete(lkey, offset);

        let level_emptied = self.levels[lkey].seq.is_empty();
        let visible_emptied = self.levels[lkey].visible.is_empty();

        if was_visible && let Some(path) = path {
            out.push(OutEvent::Deleted(path));
            if visible_emptied {
                // While the level still knows its parent.
                self.toggle_event_for_level_parent(lkey, out);
            }
        }

        if level_emptied {
            let is_root = self.levels[lkey].parent.is_none();
            self.free_level(child, lkey, true);
            if is_root {
                // The root level rebuilds lazily; invalidate outstanding
                // iterators in the meantime.
                self.stamp = self.stamp.wrapping_add(1);
            }
        }
    }

    fn shift_offsets_after_delete(&mut self, lkey: LevelKey, offset: usize) {
        let elts: Vec<EltKey> = self.levels[lkey].seq.clone();
        for ekey in elts {
            if self.elts[ekey].offset > offset {
                self.elts[ekey].offset -= 1;
            }
        }
    }

    // ---- rows-reordered -----------------------------------------------------

    pub fn handle_rows_reordered(
        &mut self,
        parent_child_path: &TreePath,
        new_order: &[usize],
        out: &mut Vec<OutEvent>,
    ) {
        if self.virtual_root_deleted {
            return;
        }

        // A reorder among the virtual root's ancestors only moves the stored
        // index, nothing inside the filtered subtree changed.
        if let Some(vroot) = &self.virtual_root
            && parent_child_path.depth() < vroot.depth()
            && vroot.indices()[..parent_child_path.depth()] == *parent_child_path.indices()
        {
            let depth = parent_child_path.depth();
            let old = vroot.indices()[depth];
            match new_order.iter().position(|&o| o == old) {
                Some(new) => {
                    let mut indices = vroot.indices().to_vec();
                    indices[depth] = new;
                    self.virtual_root = Some(TreePath::from_indices(indices));
                }
                None => {
                    tracing::warn!(
                        target: targets::FILTER,
                        %parent_child_path,
                        old_index = old,
                        "reorder permutation does not cover the virtual root, \
                         leaving its stored index unchanged"
                    );
                }
            }
            return;
        }

        let rel = match (&self.virtual_root, parent_child_path) {
            (Some(vroot), p) if p == vroot => TreePath::root(),
            _ => match self.to_relative(parent_child_path) {
                Some(rel) => rel,
                None => return,
            },
        };

        let lkey = if rel.is_root() {
            match self.root {
                Some(root) => root,
                None => return,
            }
        } else {
            let Some(parent_level) = self.cached_level_for(&rel) else {
                return;
            };
            let offset = rel.last_index().expect("path is not the root");
            let Some(parent_elt) = self.elt_at_offset(parent_level, offset) else {
                return;
            };
            match self.elts[parent_elt].children {
                Some(sub) => sub,
                None => return,
            }
        };

        // Remap every cached offset through the permutation. new_order maps
        // new position to old position; invert it first.
        let mut new_of_old = vec![usize::MAX; new_order.len()];
        for (new, &old) in new_order.iter().enumerate() {
            if old >= new_order.len() || new_of_old[old] != usize::MAX {
                tracing::warn!(
                    target: targets::FILTER,
                    %parent_child_path,
                    "ignoring malformed reorder permutation"
                );
                return;
            }
            new_of_old[old] = new;
        }
        let elts: Vec<EltKey> = self.levels[lkey].seq.clone();
        for &ekey in &elts {
            match new_of_old.get(self.elts[ekey].offset) {
                Some(&new) => self.elts[ekey].offset = new,
                None => {
                    tracing::warn!(
                        target: targets::FILTER,
                        %parent_child_path,
                        "reorder permutation shorter than the cached level, ignoring"
                    );
                    return;
                }
            }
        }

        let old_visible: Vec<EltKey> = self.levels[lkey].visible.clone();
        let mut seq = self.levels[lkey].seq.clone();
        seq.sort_by_key(|&e| self.elts[e].offset);
        let mut visible = self.levels[lkey].visible.clone();
        visible.sort_by_key(|&e| self.elts[e].offset);
        self.levels[lkey].seq = seq;
        self.levels[lkey].visible = visible;

        if self.levels[lkey].visible.len() < 2 {
            return;
        }

        // Permutation over the prior visible order.
        let permutation: Vec<usize> = self.levels[lkey]
            .visible
            .iter()
            .map(|&e| {
                old_visible
                    .iter()
                    .position(|&o| o == e)
                    .expect("visible membership unchanged by a reorder")
            })
            .collect();

        match self.levels[lkey].parent {
            None => out.push(OutEvent::Reordered(TreePath::root(), None, permutation)),
            Some(parent_elt) => {
                if let Some(path) = self.filter_path_for_elt(parent_elt) {
                    out.push(OutEvent::Reordered(
                        path,
                        Some(self.iter_for(parent_elt)),
                        permutation,
                    ));
                }
            }
        }
    }
}
