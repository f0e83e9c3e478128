//! Registry error types

use thiserror::Error;

/// Error type for entity registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No entity registered under this id
    #[error("entity not found: {0}")]
    NotFound(String),
}
