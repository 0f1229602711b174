use std::fmt;
use std::rc::Rc;

use thiserror::Error;


pub type Result<T> = std::result::Result<T, Error>;


/// Everything that can go wrong while observing or proxying a deferred value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A computation (at construction, or assigned through a facade) cannot be
    /// called with zero arguments.
    #[error("Failed to construct deferred value: '{type_name}' object is not callable with zero arguments")]
    NotInvocable { type_name: &'static str },

    /// A failure raised by host code: the wrapped computation or a capability
    /// invoked on the observed value. Never wrapped or translated.
    #[error("{0}")]
    Propagated(Exception),

    /// The observed value has no capability for the requested operation.
    #[error("{operation}")]
    Unsupported { operation: String },

    /// A facade read of a field that holds nothing yet.
    #[error("deferred value has no {field}")]
    FieldAbsent { field: &'static str },
}


impl Error {
    #[inline]
    pub fn unsupported(operation: impl Into<String>) -> Error {
        Error::Unsupported { operation: operation.into() }
    }


    /// Raise a new host exception.
    #[inline]
    pub fn raise(kind: &'static str, message: impl Into<String>) -> Error {
        Error::Propagated(Exception::new(kind, message))
    }


    /// The host exception carried by this error, if it is one.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Error::Propagated(exception) => Some(exception),
            _ => None,
        }
    }
}


/// A host-level exception.
///
/// Cloning shares the same exception; equality is identity, so a caller can
/// check that the failure it receives is the very one the host raised.
#[derive(Clone)]
pub struct Exception(Rc<ExceptionData>);


struct ExceptionData {
    kind: &'static str,
    message: String,
}


impl Exception {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Exception {
        Exception(Rc::new(ExceptionData {
            kind,
            message: message.into(),
        }))
    }


    /// The exception class name, e.g. `"ZeroDivisionError"`.
    pub fn kind(&self) -> &'static str {
        self.0.kind
    }


    pub fn message(&self) -> &str {
        &self.0.message
    }


    pub fn ptr_eq(&self, other: &Exception) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}


impl PartialEq for Exception {
    fn eq(&self, other: &Exception) -> bool {
        self.ptr_eq(other)
    }
}


impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.0.kind)
            .field("message", &self.0.message)
            .finish()
    }
}


impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.message)
    }
}
