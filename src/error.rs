//! Error types for retained size computation.

use thiserror::Error;

/// Native error codes reported by the heap introspection service.
///
/// Codes follow the JVMTI numbering so an embedding over a real VM can pass
/// them through without translation.
///
/// # Examples
///
/// ```
/// use retained_size::error::ServiceError;
///
/// let err = ServiceError::from_code(20);
/// assert_eq!(err, ServiceError::InvalidObject);
/// assert_eq!(err.code(), 20);
/// assert_eq!(ServiceError::from_code(9999), ServiceError::Other(9999));
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceError {
    #[error("invalid thread")]
    InvalidThread,
    #[error("thread not suspended")]
    ThreadNotSuspended,
    #[error("thread already suspended")]
    ThreadSuspended,
    #[error("thread not alive")]
    ThreadNotAlive,
    #[error("invalid object")]
    InvalidObject,
    #[error("not available")]
    NotAvailable,
    #[error("out of memory")]
    OutOfMemory,
    #[error("illegal argument")]
    IllegalArgument,
    #[error("operation interrupted")]
    Interrupted,
    #[error("internal error")]
    Internal,
    #[error("service error code {0}")]
    Other(i32),
}

impl ServiceError {
    pub fn code(&self) -> i32 {
        match self {
            ServiceError::InvalidThread => 10,
            ServiceError::ThreadNotSuspended => 13,
            ServiceError::ThreadSuspended => 14,
            ServiceError::ThreadNotAlive => 15,
            ServiceError::InvalidObject => 20,
            ServiceError::NotAvailable => 98,
            ServiceError::OutOfMemory => 110,
            ServiceError::IllegalArgument => 103,
            ServiceError::Interrupted => 52,
            ServiceError::Internal => 113,
            ServiceError::Other(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            10 => ServiceError::InvalidThread,
            13 => ServiceError::ThreadNotSuspended,
            14 => ServiceError::ThreadSuspended,
            15 => ServiceError::ThreadNotAlive,
            20 => ServiceError::InvalidObject,
            98 => ServiceError::NotAvailable,
            110 => ServiceError::OutOfMemory,
            103 => ServiceError::IllegalArgument,
            52 => ServiceError::Interrupted,
            113 => ServiceError::Internal,
            other => ServiceError::Other(other),
        }
    }
}

/// Errors surfaced by the retained size engine.
///
/// A tag leak has no variant here: the traversal driver halts on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizesError {
    #[error("heap introspection failed: {0}")]
    Service(ServiceError),
    #[error("deadline elapsed before the computation finished")]
    Timeout,
    #[error("computation was interrupted")]
    Interrupted,
    #[error("tag value {0:#x} does not address a live tag record")]
    StaleTag(i64),
    #[error("tag value {0:#x} released while still holding retained entries")]
    UndrainedTag(i64),
}

impl SizesError {
    /// True for the two cooperative-cancellation outcomes.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SizesError::Timeout | SizesError::Interrupted)
    }
}

impl From<ServiceError> for SizesError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Interrupted => SizesError::Interrupted,
            other => SizesError::Service(other),
        }
    }
}

/// Result type for retained size operations
pub type SizesResult<T> = Result<T, SizesError>;

/// Log a failed operation. Cancellation is an expected outcome and only
/// reaches the debug log.
pub fn report_error(err: &SizesError, context: &str) {
    if err.is_cancellation() {
        log::debug!("{context}: {err}");
        return;
    }

    match err {
        SizesError::Service(service) => {
            log::error!("ERROR: service: {}({}): {}", service.code(), service, context)
        }
        other => log::error!("ERROR: {context}: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (SizesError::Timeout, "deadline elapsed before the computation finished"),
            (SizesError::Interrupted, "computation was interrupted"),
            (
                SizesError::Service(ServiceError::OutOfMemory),
                "heap introspection failed: out of memory",
            ),
            (
                SizesError::Service(ServiceError::Other(7)),
                "heap introspection failed: service error code 7",
            ),
            (
                SizesError::StaleTag(0x10),
                "tag value 0x10 does not address a live tag record",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn service_codes_round_trip() {
        let known = [
            ServiceError::InvalidThread,
            ServiceError::ThreadNotSuspended,
            ServiceError::ThreadSuspended,
            ServiceError::ThreadNotAlive,
            ServiceError::InvalidObject,
            ServiceError::NotAvailable,
            ServiceError::OutOfMemory,
            ServiceError::IllegalArgument,
            ServiceError::Interrupted,
            ServiceError::Internal,
        ];

        for err in known {
            assert_eq!(ServiceError::from_code(err.code()), err);
        }
    }

    #[test]
    fn interrupted_code_becomes_cancellation() {
        let err: SizesError = ServiceError::Interrupted.into();
        assert_eq!(err, SizesError::Interrupted);
        assert!(err.is_cancellation());

        let err: SizesError = ServiceError::InvalidObject.into();
        assert_eq!(err, SizesError::Service(ServiceError::InvalidObject));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn sizes_result_alias_behaves_like_result() {
        fn take_result(value: SizesResult<i64>) -> i64 {
            value.unwrap_or_default()
        }

        assert_eq!(take_result(Ok(42)), 42);
        assert_eq!(take_result(Err(SizesError::Timeout)), 0);
    }
}
