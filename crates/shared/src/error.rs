/// Error type for the data-model and wire layer shared between `tessera-crypto`
/// and `tessera-client`. Lower-layer errors (crypto, storage, network) have
/// their own richer enums (§10.2) and convert into their own crate's error
/// type rather than this one; this type exists for the handful of failures
/// that belong to `tessera-shared` itself.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown CRDT model: {0}")]
    UnknownModel(String),

    #[error("invalid wire payload: {0}")]
    InvalidPayload(String),

    #[error("validation error: {0}")]
    Validation(String),
}
