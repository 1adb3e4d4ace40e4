//! Registry error types
//!
//! Error types for distributor operations.

/// Error type for distributor operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The viewer policy refused the new viewer
    ViewerRejected(String),
    /// The frame source has ended; no new viewers are accepted
    Closed,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::ViewerRejected(reason) => write!(f, "Viewer rejected: {}", reason),
            RegistryError::Closed => write!(f, "Stream has ended"),
        }
    }
}

impl std::error::Error for RegistryError {}
