use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Errors surfaced by the explorer engine.
///
/// * `Configuration` – a filter or selection is malformed for the current
///   table. Recovered locally: the offending filter is skipped and reported.
/// * `Resource` – a data source could not be opened or a table could not be
///   loaded. Shown to the user and retried on the next action.
/// * `InvariantViolation` – an upstream producer broke a contract. Fatal to
///   the current operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExplorerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource error for {url}: {message}")]
    Resource { url: String, message: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ExplorerError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ExplorerError::Configuration(msg.into())
    }

    /// Wrap a loader failure for `url`, keeping the full context chain.
    pub fn resource(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ExplorerError::Resource {
            url: url.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        ExplorerError::InvariantViolation(msg.into())
    }

    /// Whether the current rerun may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ExplorerError::InvariantViolation(_))
    }
}

pub type Result<T, E = ExplorerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_keeps_context_chain() {
        let err = anyhow::anyhow!("file not found").context("opening feature table");
        let wrapped = ExplorerError::resource("/data/plate.zarr", err);
        let text = wrapped.to_string();
        assert!(text.contains("/data/plate.zarr"));
        assert!(text.contains("opening feature table"));
        assert!(text.contains("file not found"));
    }

    #[test]
    fn only_invariant_violations_are_fatal() {
        assert!(ExplorerError::configuration("x").is_recoverable());
        assert!(ExplorerError::resource("u", "down").is_recoverable());
        assert!(!ExplorerError::invariant("bad frame").is_recoverable());
    }
}
