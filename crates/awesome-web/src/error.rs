use awesome_db::DbError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::Method;

/// Invalid route or handler declaration. Raised at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("request parameter must be the last named parameter in function: {handler}{signature}")]
    RequestNotLast { handler: String, signature: String },

    #[error("route method or path not defined for handler: {0}")]
    MissingRoute(String),

    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    #[error("invalid route path `{0}`")]
    InvalidPath(String),
}

/// Request rejected before the handler ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BadRequest {
    message: String,
}

impl BadRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing_content_type() -> Self {
        Self::new("Missing Content-Type")
    }

    pub fn json_not_object() -> Self {
        Self::new("JSON body must be object.")
    }

    pub fn invalid_json(detail: impl std::fmt::Display) -> Self {
        Self::new(format!("Invalid JSON body: {detail}"))
    }

    pub fn unsupported_content_type(content_type: &str) -> Self {
        Self::new(format!("Unsupported Content-Type: {content_type}"))
    }

    pub fn missing_argument(name: &str) -> Self {
        Self::new(format!("Missing argument: {name}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Structured application error, rendered as `{error, data, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error}: {message}")]
pub struct ApiError {
    pub error: String,
    pub data: String,
    pub message: String,
}

impl ApiError {
    pub fn new(
        error: impl Into<String>,
        data: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            data: data.into(),
            message: message.into(),
        }
    }

    /// Invalid input; `field` names the offending form field.
    pub fn value_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("value:invalid", field, message)
    }

    pub fn not_found(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("value:notfound", resource, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new("permission:forbidden", "permission", message)
    }
}

/// What a handler may fail with.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Dispatch failures that do not map onto a reply.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route for {0}")]
    NotFound(String),

    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed { method: Method, path: String },

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::Handler(_) => 500,
        }
    }
}
