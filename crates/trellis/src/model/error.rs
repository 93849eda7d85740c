//! Error types for model mutation APIs.
//!
//! Query operations on [`TreeModel`](super::TreeModel) fail with sentinels
//! (`None`/`false`/`Value::None`); only the mutation surface of concrete
//! stores reports *why* a write was rejected.

use std::fmt;

use super::value::ValueType;

/// The error type for store mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The iterator is stale or does not belong to this model.
    StaleIter,
    /// An index was out of range for the addressed sibling list.
    OutOfRange {
        /// The requested index.
        index: usize,
        /// The length of the sibling list.
        len: usize,
    },
    /// A row was supplied with the wrong number of column values.
    ColumnCount {
        /// The model's column count.
        expected: usize,
        /// The number of values supplied.
        got: usize,
    },
    /// A value's type does not match the column's declared type.
    TypeMismatch {
        /// The column being written.
        column: usize,
        /// The column's declared type.
        expected: ValueType,
    },
    /// A reorder was supplied with something other than a permutation of the
    /// sibling indices.
    InvalidPermutation,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleIter => write!(f, "Iterator is stale or belongs to another model"),
            Self::OutOfRange { index, len } => {
                write!(f, "Index {index} out of range for sibling list of length {len}")
            }
            Self::ColumnCount { expected, got } => {
                write!(f, "Expected {expected} column values, got {got}")
            }
            Self::TypeMismatch { column, expected } => {
                write!(f, "Value for column {column} does not match declared type {expected:?}")
            }
            Self::InvalidPermutation => {
                write!(f, "Reorder array is not a permutation of the sibling indices")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// A specialized Result type for model mutations.
pub type Result<T> = std::result::Result<T, ModelError>;
