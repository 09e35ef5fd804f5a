use thiserror::Error;

/// Errors raised while computing the injection for a single admission
/// request. These become deny responses, never HTTP errors.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("one of '{mapping}' or '{destination}' annotations should be specified")]
    MissingModeAnnotation { mapping: String, destination: String },

    #[error("only one of '{mapping}' or '{destination}' annotations may be specified")]
    ConflictingModeAnnotations { mapping: String, destination: String },

    #[error("admission request contains no object")]
    MissingObject,

    #[error("cannot decode pod from admission request: {0}")]
    PodDecode(#[source] serde_json::Error),

    #[error("error encoding injection status: {0}")]
    StatusEncode(#[source] serde_json::Error),

    #[error("error encoding patch: {0}")]
    PatchEncode(#[source] serde_json::Error),
}
