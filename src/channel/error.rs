//! Channel errors and the close cause.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Cause recorded when a channel is closed or cancelled, surfaced to both
/// peers. The first recorded cause is permanent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cause {
    /// Cancellation without an application supplied reason.
    Cancelled,
    /// Application supplied reason.
    Reason(Arc<str>),
}

impl Cause {
    /// Constructs an application supplied cause.
    pub fn reason(reason: impl Into<Arc<str>>) -> Cause {
        Cause::Reason(reason.into())
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Cancelled => f.write_str("channel cancelled"),
            Cause::Reason(reason) => f.write_str(reason),
        }
    }
}

fn fmt_closed(f: &mut fmt::Formatter<'_>, operation: &str, cause: &Option<Cause>) -> fmt::Result {
    match cause {
        None => write!(f, "{} on a closed channel", operation),
        Some(cause) => write!(f, "{} on a closed channel: {}", operation, cause),
    }
}

/// Error for blocking send. Carries the undelivered value back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError<T> {
    Closed(T, Option<Cause>),
}

/// Error for nonblocking send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T, Option<Cause>),
}

/// Error for send with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    Timeout(T),
    Closed(T, Option<Cause>),
}

/// Error for blocking receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    Closed(Option<Cause>),
}

/// Error for nonblocking receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed(Option<Cause>),
}

/// Error for receive with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed(Option<Cause>),
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(err: SendError<T>) -> Self {
        let SendError::Closed(value, cause) = err;
        TrySendError::Closed(value, cause)
    }
}

impl<T> From<TrySendError<T>> for SendError<T> {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Closed(value, cause) => SendError::Closed(value, cause),
            TrySendError::Full(_) => panic!("got full error in blocking send"),
        }
    }
}

impl<T> From<TrySendError<T>> for SendTimeoutError<T> {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(value) => SendTimeoutError::Timeout(value),
            TrySendError::Closed(value, cause) => SendTimeoutError::Closed(value, cause),
        }
    }
}

impl From<RecvError> for TryRecvError {
    fn from(err: RecvError) -> Self {
        let RecvError::Closed(cause) = err;
        TryRecvError::Closed(cause)
    }
}

impl From<TryRecvError> for RecvError {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Closed(cause) => RecvError::Closed(cause),
            TryRecvError::Empty => panic!("got empty error in blocking recv"),
        }
    }
}

impl From<TryRecvError> for RecvTimeoutError {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => RecvTimeoutError::Timeout,
            TryRecvError::Closed(cause) => RecvTimeoutError::Closed(cause),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let SendError::Closed(_, cause) = self;
        fmt_closed(f, "sending", cause)
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("sending on a full channel"),
            TrySendError::Closed(_, cause) => fmt_closed(f, "sending", cause),
        }
    }
}

impl<T> fmt::Display for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendTimeoutError::Timeout(_) => f.write_str("sending timed out"),
            SendTimeoutError::Closed(_, cause) => fmt_closed(f, "sending", cause),
        }
    }
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let RecvError::Closed(cause) = self;
        fmt_closed(f, "receiving", cause)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => f.write_str("receiving on an empty channel"),
            TryRecvError::Closed(cause) => fmt_closed(f, "receiving", cause),
        }
    }
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvTimeoutError::Timeout => f.write_str("receiving timed out"),
            RecvTimeoutError::Closed(cause) => fmt_closed(f, "receiving", cause),
        }
    }
}

impl<T: fmt::Debug> Error for SendError<T> {}
impl<T: fmt::Debug> Error for TrySendError<T> {}
impl<T: fmt::Debug> Error for SendTimeoutError<T> {}
impl Error for RecvError {}
impl Error for TryRecvError {}
impl Error for RecvTimeoutError {}
