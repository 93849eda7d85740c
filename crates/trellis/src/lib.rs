//! Trellis - hierarchical Model/View data plumbing.
//!
//! Trellis provides a tree-model contract with synchronous change
//! notifications, an in-memory store implementing it, and a cached filtering
//! proxy that presents only the rows passing a visibility policy.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis::model::{FilterModel, TreeModel, TreeStore, ValueType};
//!
//! let store = Arc::new(TreeStore::new(&[ValueType::String, ValueType::Bool]));
//! store.append(None, vec!["shown".into(), true.into()])?;
//! store.append(None, vec!["hidden".into(), false.into()])?;
//!
//! let filter = FilterModel::new(Arc::clone(&store));
//! filter.set_visible_column(1);
//! assert_eq!(filter.iter_n_children(None), 1);
//! # Ok::<(), trellis::model::ModelError>(())
//! ```

pub use trellis_core::*;

pub mod model;
