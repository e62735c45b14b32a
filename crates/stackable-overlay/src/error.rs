//! Classification of composition errors.
//!
//! Every module of this crate has its own error enum carrying the context of
//! the step that failed. Callers which only care about *what kind* of failure
//! occurred (for example to pick an exit code) can use [`ClassifyError::kind`]
//! instead of matching on the nested variants.

/// The kind of failure which terminated a composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    /// A directory, declaration file or referenced document does not exist.
    NotFound,

    /// A document, declaration or patch is malformed.
    ParseError,

    /// Two documents resolve to the same identity triple.
    DuplicateResource,

    /// A directory references a base directory which does not exist.
    MissingBase,

    /// The base graph contains a cycle.
    CyclicReference,

    /// Overlay and base disagree on the kind (or identity) of a resource.
    SchemaMismatch,

    /// A field path is malformed or addresses a location which does not exist.
    InvalidPath,

    /// A patch selector did not match any resource.
    PatchTargetNotFound,
}

/// Maps an error onto its [`ErrorKind`].
pub trait ClassifyError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}
