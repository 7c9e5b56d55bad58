//! The four error kinds this layer can raise, all derived from one root so
//! callers can catch broadly.

use std::error::Error as StdError;
use thiserror::Error;

/// The pool's error type. Wraps a driver error (`Driver`) alongside the
/// three lease/admission error kinds and [`PoolError::InvalidCursor`],
/// which a [`SteadyCursor`](crate::steady::SteadyCursor) also raises
/// directly since it shares the same "use after close" shape.
#[derive(Debug, Error)]
pub enum PoolError<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// The driver reports insufficient thread-safety for the requested
    /// operation (no pooling at all, or a shared lease on a driver whose
    /// connections aren't safe to share).
    #[error("driver does not report sufficient thread-safety for this operation")]
    NotSupported,

    /// The pool is saturated and configured not to block.
    #[error("too many connections are already open")]
    TooManyConnections,

    /// A method was called on a lease whose `close()` already ran.
    #[error("connection was already returned to the pool")]
    InvalidConnection,

    /// A method was called on a cursor whose `close()` already ran.
    #[error("cursor was already closed")]
    InvalidCursor,

    /// An error from the underlying driver, propagated untouched.
    #[error(transparent)]
    Driver(#[from] E),
}

impl<E> PoolError<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// The wrapped driver error, if this is a [`PoolError::Driver`].
    pub fn as_driver_error(&self) -> Option<&E> {
        match self {
            PoolError::Driver(e) => Some(e),
            _ => None,
        }
    }
}
