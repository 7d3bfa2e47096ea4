/// Errors produced by the `fleet-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A hypervisor task handle (UPID) could not be parsed.
    #[error("invalid task handle '{upid}': {reason}")]
    InvalidTaskHandle { upid: String, reason: String },

    /// A name used as a storage path segment failed validation.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A content hash string was not 64 hex characters.
    #[error("invalid content hash: {reason}")]
    InvalidContentHash { reason: String },
}
