//! Webhook errors

/// Error type for webhook operations
///
/// Errors raised while reviewing a request never fail the HTTP call; they are
/// returned to the API server as a denied admission response.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// The object is not a Game of the served API version
    #[error("unexpected object type {api_version}/{kind}")]
    UnexpectedType {
        /// apiVersion found on the object
        api_version: String,
        /// kind found on the object
        kind: String,
    },

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The mutation patch could not be attached to the response
    #[error("patch error: {0}")]
    Patch(String),

    /// The serving certificate or key could not be loaded
    #[error("failed to load TLS material: {0}")]
    Tls(String),

    /// The HTTPS server failed
    #[error("webhook server error: {0}")]
    Server(String),
}
