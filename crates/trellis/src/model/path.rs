//! Tree paths for addressing rows in hierarchical models.
//!
//! A `TreePath` identifies a row by the sequence of sibling indices leading to
//! it from the root: the path `[2, 0]` is the first child of the third
//! top-level row. The empty path addresses the conceptual root itself, which
//! is not a row; it appears as the "parent" location in signals that concern
//! top-level rows (e.g. a reorder of the root level).

use std::fmt;

/// An address of a row within a hierarchical model.
///
/// Unlike [`TreeIter`](super::TreeIter), a path is position-based and stays
/// meaningful across models: the same path denotes "the same position" in a
/// child model and in any proxy stacked on top of it (modulo the proxy's own
/// index translation).
///
/// Paths order lexicographically, which equals depth-first visiting order.
///
/// # Example
///
/// ```
/// use trellis::model::TreePath;
///
/// let mut path = TreePath::from_indices([1, 3]);
/// assert_eq!(path.depth(), 2);
///
/// path.down(0);
/// assert_eq!(path.indices(), &[1, 3, 0]);
///
/// assert!(path.up());
/// assert_eq!(path.indices(), &[1, 3]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreePath {
    indices: Vec<usize>,
}

impl TreePath {
    /// Creates the empty path (the conceptual root, not a row).
    #[inline]
    pub const fn root() -> Self {
        Self {
            indices: Vec::new(),
        }
    }

    /// Creates a path addressing the given top-level row.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self {
            indices: vec![index],
        }
    }

    /// Creates a path from a sequence of sibling indices.
    pub fn from_indices(indices: impl Into<Vec<usize>>) -> Self {
        Self {
            indices: indices.into(),
        }
    }

    /// Returns the sibling indices, outermost first.
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Returns the number of path components.
    ///
    /// The empty (root) path has depth 0 and does not address a row.
    #[inline]
    pub fn depth(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` if this is the empty (root) path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns the last component: the row's index among its siblings.
    ///
    /// Returns `None` for the root path.
    #[inline]
    pub fn last_index(&self) -> Option<usize> {
        self.indices.last().copied()
    }

    /// Appends a component, descending to the `index`-th child.
    #[inline]
    pub fn down(&mut self, index: usize) {
        self.indices.push(index);
    }

    /// Removes the last component, ascending to the parent row.
    ///
    /// Returns `false` (and leaves the path unchanged) if the path is already
    /// the root.
    #[inline]
    pub fn up(&mut self) -> bool {
        self.indices.pop().is_some()
    }

    /// Returns the parent path, or `None` for the root path.
    pub fn parent(&self) -> Option<TreePath> {
        if self.indices.is_empty() {
            return None;
        }
        Some(TreePath {
            indices: self.indices[..self.indices.len() - 1].to_vec(),
        })
    }

    /// Returns a new path with `index` appended.
    pub fn child(&self, index: usize) -> TreePath {
        let mut path = self.clone();
        path.down(index);
        path
    }

    /// Advances the last component to the next sibling.
    ///
    /// Returns `false` for the root path.
    #[inline]
    pub fn next(&mut self) -> bool {
        match self.indices.last_mut() {
            Some(last) => {
                *last += 1;
                true
            }
            None => false,
        }
    }

    /// Moves the last component to the previous sibling.
    ///
    /// Returns `false` if the path is the root or already at the first sibling.
    #[inline]
    pub fn prev(&mut self) -> bool {
        match self.indices.last_mut() {
            Some(last) if *last > 0 => {
                *last -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `self` is a proper ancestor of `other`.
    ///
    /// The root path is an ancestor of every non-root path; a path is never
    /// its own ancestor.
    pub fn is_ancestor_of(&self, other: &TreePath) -> bool {
        self.indices.len() < other.indices.len()
            && other.indices[..self.indices.len()] == self.indices[..]
    }

    /// Strips `prefix` from the front of this path.
    ///
    /// Returns the remainder (non-root) if `prefix` is a proper ancestor of
    /// `self`, `None` otherwise.
    pub fn strip_prefix(&self, prefix: &TreePath) -> Option<TreePath> {
        if !prefix.is_ancestor_of(self) {
            return None;
        }
        Some(TreePath {
            indices: self.indices[prefix.indices.len()..].to_vec(),
        })
    }

    /// Concatenates two paths: `self` followed by `tail`'s components.
    pub fn join(&self, tail: &TreePath) -> TreePath {
        let mut indices = Vec::with_capacity(self.indices.len() + tail.indices.len());
        indices.extend_from_slice(&self.indices);
        indices.extend_from_slice(&tail.indices);
        TreePath { indices }
    }
}

impl fmt::Display for TreePath {
    /// Formats the path as colon-separated indices, e.g. `"0:2:1"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for index in &self.indices {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{index}")?;
            first = false;
        }
        Ok(())
    }
}

impl From<Vec<usize>> for TreePath {
    fn from(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl<const N: usize> From<[usize; N]> for TreePath {
    fn from(indices: [usize; N]) -> Self {
        Self {
            indices: indices.to_vec(),
        }
    }
}
