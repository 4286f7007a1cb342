use thiserror::Error;

/// Failures caught before any network or filesystem mutation.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid project code {0:?}: expected ASCII letters, digits or '-'")]
    InvalidProjectCode(String),
    #[error("no project selected")]
    MissingProject,
    #[error("no path selected")]
    MissingPath,
    #[error("folder not connected: {0}")]
    NotConnected(String),
    #[error("path escapes project root: {0}")]
    EscapesRoot(String),
}
