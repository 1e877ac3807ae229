/// Domain error taxonomy shared by the pipeline and the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("Failed to decode video: {0}")]
    Decode(String),

    #[error("Failed to encode video: {0}")]
    Encode(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
