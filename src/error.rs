use thiserror::Error;

use crate::GraphQLError;

pub type Result<T, E = FederationError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FederationError {
    // Configuration errors, raised while building the merged schema.
    #[error("merge conflict on {location}: {reason}")]
    MergeConflict { location: String, reason: String },

    #[error("type `{type_name}` is excluded but still referenced by `{referenced_by}`")]
    ExcludedTypeReferenced {
        type_name: String,
        referenced_by: String,
    },

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("unknown field `{type_name}.{field_name}`")]
    UnknownField {
        type_name: String,
        field_name: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("failed to parse schema: {0}")]
    SchemaParse(String),

    #[error("unknown origin {0}")]
    UnknownOrigin(usize),

    // Request validation errors, raised before any dispatch.
    #[error("failed to parse query: {0}")]
    QueryParse(String),

    #[error("unknown operation named \"{0}\"")]
    OperationNotFound(String),

    #[error("must provide operation name if query contains multiple operations")]
    AmbiguousOperation,

    #[error("no operation found in document")]
    MissingOperation,

    #[error("{0} operations are not supported")]
    UnsupportedOperation(&'static str),

    #[error("path `{0}` does not match any field of the operation")]
    PathNotFound(String),

    #[error("directives are not supported on operation `{0}`")]
    UnsupportedDirectives(String),

    // Foreign key template errors, raised when a resolver is constructed.
    #[error("invalid query template: {0}")]
    InvalidTemplate(String),

    // Upstream errors. The root resolver absorbs these into the stitched result.
    #[error("failed to fetch from {origin}: {reason}")]
    Fetch { origin: String, reason: String },

    #[error("upstream returned errors: {}", .0.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; "))]
    Upstream(Vec<GraphQLError>),

    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FederationError {
    pub(crate) fn conflict(location: impl Into<String>, reason: impl Into<String>) -> Self {
        FederationError::MergeConflict {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error belongs to the setup phase and can never be fixed by
    /// retrying a request.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FederationError::MergeConflict { .. }
                | FederationError::ExcludedTypeReferenced { .. }
                | FederationError::UnknownType(_)
                | FederationError::UnknownField { .. }
                | FederationError::InvalidSchema(_)
                | FederationError::SchemaParse(_)
                | FederationError::UnknownOrigin(_)
                | FederationError::InvalidTemplate(_)
                | FederationError::Config(_)
        )
    }
}
