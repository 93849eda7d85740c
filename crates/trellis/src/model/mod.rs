//! Hierarchical Model/View data layer for Trellis.
//!
//! This module provides the tree-model contract, a concrete in-memory store,
//! and a visibility-filtering proxy. The contract separates data from
//! display logic, which enables:
//!
//! - Multiple views of the same data
//! - Consistent positional addressing via paths and iterators
//! - Efficient updates via change notifications
//! - Stackable proxies that both consume and re-expose the contract
//!
//! # Core Types
//!
//! - `TreePath`: Positional address of a row (one index per depth)
//! - `TreeIter`: Opaque, stamp-tagged handle to a row of a specific model
//! - `Value` / `ValueType`: Typed column data
//! - `TreeModel`: The trait that row sources implement
//! - `ModelSignals`: The five change-notification signals
//!
//! # Model Implementations
//!
//! - `TreeStore`: In-memory hierarchical store with typed columns
//! - `FilterModel`: Cached, lazily-materialized visibility filter over any
//!   other `TreeModel`
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis::model::{FilterModel, TreeModel, TreePath, TreeStore, ValueType};
//!
//! let store = Arc::new(TreeStore::new(&[ValueType::String, ValueType::Bool]));
//! store.append(None, vec!["visible".into(), true.into()]).unwrap();
//! store.append(None, vec!["hidden".into(), false.into()]).unwrap();
//!
//! let filter = FilterModel::new(Arc::clone(&store));
//! filter.set_visible_column(1);
//!
//! // Views see only the rows passing the policy.
//! assert_eq!(filter.iter_n_children(None), 1);
//!
//! // And stay synchronized through change notifications.
//! filter.signals().row_inserted.connect(|(path, _)| {
//!     println!("row appeared at {path}");
//! });
//! let hidden = store.iter(&TreePath::from_index(1)).unwrap();
//! store.set_value(&hidden, 1, true.into()).unwrap();
//! assert_eq!(filter.iter_n_children(None), 2);
//! ```

mod error;
mod filter;
mod iter;
mod path;
mod store;
mod traits;
mod value;

pub use error::{ModelError, Result};
pub use filter::FilterModel;
pub use iter::TreeIter;
pub use path::TreePath;
pub use store::TreeStore;
pub use traits::{ModelFlags, ModelSignals, TreeModel};
pub use value::{Value, ValueType};
