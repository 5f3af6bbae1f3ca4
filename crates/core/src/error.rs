//! Error types for pipeline construction.
//!
//! These are the structural errors a query author can trigger: they are
//! raised during compilation, never during push/fetch. Runtime invariant
//! violations panic instead, because continuing would corrupt the
//! incremental state every downstream operator depends on.

use alloc::string::String;
use core::fmt;

/// Result type alias for Rivulet operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Structural errors raised during pipeline construction.
#[derive(Debug)]
pub enum Error {
    /// An orderBy omits a primary-key column, which would make
    /// pagination non-deterministic.
    OrderMissingKey {
        table: String,
        column: String,
    },
    /// No source is registered for a referenced table.
    SourceNotFound {
        table: String,
    },
    /// A correlated subquery has no alias to name its relationship.
    MissingAlias {
        table: String,
    },
    /// Two subqueries resolved to the same alias.
    DuplicateAlias {
        alias: String,
    },
    /// Invalid schema definition.
    InvalidSchema {
        message: String,
    },
    /// Column not found.
    ColumnNotFound {
        table: String,
        column: String,
    },
    /// Invalid operation.
    InvalidOperation {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OrderMissingKey { table, column } => {
                write!(
                    f,
                    "orderBy for table {} must include primary-key column {}",
                    table, column
                )
            }
            Error::SourceNotFound { table } => {
                write!(f, "no source registered for table {}", table)
            }
            Error::MissingAlias { table } => {
                write!(f, "correlated subquery on table {} has no alias", table)
            }
            Error::DuplicateAlias { alias } => {
                write!(f, "duplicate subquery alias {}", alias)
            }
            Error::InvalidSchema { message } => {
                write!(f, "invalid schema: {}", message)
            }
            Error::ColumnNotFound { table, column } => {
                write!(f, "column {} not found in table {}", column, table)
            }
            Error::InvalidOperation { message } => {
                write!(f, "invalid operation: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an order-missing-key error.
    pub fn order_missing_key(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::OrderMissingKey {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a source-not-found error.
    pub fn source_not_found(table: impl Into<String>) -> Self {
        Error::SourceNotFound {
            table: table.into(),
        }
    }

    /// Creates a missing-alias error.
    pub fn missing_alias(table: impl Into<String>) -> Self {
        Error::MissingAlias {
            table: table.into(),
        }
    }

    /// Creates a duplicate-alias error.
    pub fn duplicate_alias(alias: impl Into<String>) -> Self {
        Error::DuplicateAlias {
            alias: alias.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
