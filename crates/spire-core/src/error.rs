//! Unified error types for the Spire core.
//!
//! Three concerns produce errors here:
//!
//! - [`RouteError`]: route registration problems. These are configuration
//!   mistakes and are fatal at startup.
//! - [`HandlerError`]: anything a handler returns from the chain. The core
//!   turns it into a generic 500 response and never exposes the detail.
//! - [`ContainerError`]: service resolution failures. Recoverable through
//!   `make`, escalated to a panic only by `must_make`.

use std::fmt;

use thiserror::Error;

/// A type-erased error, as produced by handlers and service constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Routing Errors
// =============================================================================

/// Errors raised while registering a route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// A route was registered with no handlers at all.
    #[error("route '{pattern}' has an empty handler chain")]
    EmptyChain {
        /// The offending pattern.
        pattern: String,
    },

    /// The terminal node already holds a handler chain.
    #[error("route '{pattern}' is already registered")]
    DuplicateRoute {
        /// The offending pattern.
        pattern: String,
    },

    /// A catch-all segment appeared before the last position.
    #[error("wildcard segment must be the last segment in '{pattern}'")]
    WildcardNotLast {
        /// The offending pattern.
        pattern: String,
    },

    /// A segment could not be parsed.
    #[error("invalid segment '{segment}' in '{pattern}'")]
    InvalidSegment {
        /// The offending pattern.
        pattern: String,
        /// The segment that failed to parse.
        segment: String,
    },

    /// Two different bindings would compete for the same position.
    #[error("segment '{segment}' in '{pattern}' conflicts with existing '{existing}'")]
    AmbiguousParam {
        /// The offending pattern.
        pattern: String,
        /// The new segment.
        segment: String,
        /// The segment already registered at this position.
        existing: String,
    },

    /// No tree exists for the requested method.
    #[error("method '{0}' is not routable")]
    UnsupportedMethod(String),
}

/// Result type for route registration.
pub type RouteResult<T> = Result<T, RouteError>;

// =============================================================================
// Handler Errors
// =============================================================================

/// An error returned from a handler in the middleware chain.
///
/// Like `anyhow::Error`, this type does not implement [`std::error::Error`]
/// itself, which lets any error convert into it through `?`.
pub struct HandlerError(BoxError);

impl HandlerError {
    /// Creates a handler error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self(message.into())
    }

    /// Wraps an already boxed error.
    pub fn from_boxed(error: BoxError) -> Self {
        Self(error)
    }

    /// Returns the wrapped error.
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self(Box::new(error))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result type returned by every handler.
pub type HandlerResult = Result<(), HandlerError>;

// =============================================================================
// Container Errors
// =============================================================================

/// Errors raised by the service container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The key is empty or contains whitespace.
    #[error("malformed service key '{0}'")]
    MalformedKey(String),

    /// Strict binding refused to replace an existing provider.
    #[error("service '{0}' is already bound")]
    AlreadyBound(String),

    /// No provider is bound under this key.
    #[error("service '{0}' is not bound")]
    NotBound(String),

    /// The provider's boot hook failed.
    #[error("failed to boot service '{key}'")]
    Boot {
        /// The service key.
        key: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// The provider's constructor failed.
    #[error("failed to construct service '{key}'")]
    Construction {
        /// The service key.
        key: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// Resolving the key would re-enter a construction already in progress.
    #[error("cyclic service dependency: {}", chain.join(" -> "))]
    CyclicDependency {
        /// Keys on the resolution stack, ending with the repeated key.
        chain: Vec<String>,
    },

    /// The instance does not carry the requested capability.
    #[error("service '{key}' does not provide '{expected}' (holds '{actual}')")]
    TypeMismatch {
        /// The service key.
        key: String,
        /// The requested capability.
        expected: &'static str,
        /// The capability the instance was built with.
        actual: &'static str,
    },

    /// A constructor parameter is absent or of the wrong type.
    #[error("constructor parameter #{index} is missing or not a '{expected}'")]
    MissingParam {
        /// Position in the parameter list.
        index: usize,
        /// The requested type.
        expected: &'static str,
    },
}

impl ContainerError {
    /// Wraps a constructor failure for `key`.
    pub fn construction(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Construction {
            key: key.into(),
            source: source.into(),
        }
    }
}

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_chain() {
        let err = ContainerError::CyclicDependency {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic service dependency: a -> b -> a");
    }

    #[test]
    fn construction_error_keeps_source() {
        let err = ContainerError::construction("log", "disk full");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk full"));
    }
}
