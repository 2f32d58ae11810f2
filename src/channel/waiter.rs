//! Queued waiter variants and their two phase resume protocol.
//!
//! Phase one (`claim`) runs under the channel lock and atomically reserves a
//! waiter, extracting its element and resume target; the matching phase two
//! runs after the lock is released (see `Wakeup` in [core](super::core)).
//! Cancellation contends with claim on the same state word, so a claim that
//! already happened always wins and the element stays delivered.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

use super::error::{RecvError, SendError};
use crate::select::{Identifier, Selector};
use crate::session::SessionWaker;

const WAITING: u8 = 0;
const CLAIMED: u8 = 1;
const CANCELLED: u8 = 2;

/// Suspended sender holding its undelivered element.
pub(crate) struct ThreadSend<T> {
    state: AtomicU8,
    waker: UnsafeCell<Option<SessionWaker<Result<(), SendError<T>>>>>,
    value: UnsafeCell<Option<T>>,
}

// SAFETY: cells are taken only by the single winner of the state exchange.
unsafe impl<T: Send> Sync for ThreadSend<T> {}

impl<T> ThreadSend<T> {
    pub fn new(waker: SessionWaker<Result<(), SendError<T>>>, value: T) -> Self {
        ThreadSend {
            state: AtomicU8::new(WAITING),
            waker: UnsafeCell::new(Some(waker)),
            value: UnsafeCell::new(Some(value)),
        }
    }

    /// Phase one: claims this waiter, taking its element and resume target.
    /// Returns None if the waiter was cancelled or claimed before.
    pub fn claim(&self) -> Option<(T, SessionWaker<Result<(), SendError<T>>>)> {
        if self.state.compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            return None;
        }
        let value = unsafe { (*self.value.get()).take() };
        let waker = unsafe { (*self.waker.get()).take() };
        match (value, waker) {
            (Some(value), Some(waker)) => Some((value, waker)),
            _ => unreachable!("send waiter claimed twice"),
        }
    }

    /// Marks the waiter cancelled, taking the undelivered element back.
    /// Returns None if a claim got there first.
    pub fn cancel(&self) -> Option<T> {
        if self.state.compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            return None;
        }
        unsafe { (*self.value.get()).take() }
    }
}

/// Suspended receiver.
pub(crate) struct ThreadRecv<T> {
    state: AtomicU8,
    waker: UnsafeCell<Option<SessionWaker<Result<T, RecvError>>>>,
}

// SAFETY: the cell is taken only by the single winner of the state exchange.
unsafe impl<T: Send> Sync for ThreadRecv<T> {}

impl<T> ThreadRecv<T> {
    pub fn new(waker: SessionWaker<Result<T, RecvError>>) -> Self {
        ThreadRecv { state: AtomicU8::new(WAITING), waker: UnsafeCell::new(Some(waker)) }
    }

    /// Phase one: claims this waiter, taking its resume target.
    pub fn claim(&self) -> Option<SessionWaker<Result<T, RecvError>>> {
        if self.state.compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            return None;
        }
        match unsafe { (*self.waker.get()).take() } {
            Some(waker) => Some(waker),
            None => unreachable!("receive waiter claimed twice"),
        }
    }

    /// Marks the waiter cancelled. Returns false if a claim got there first.
    pub fn cancel(&self) -> bool {
        self.state.compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }
}

pub(crate) enum SendWaiter<T> {
    Thread(ThreadSend<T>),
    Selector(Selector),
}

impl<T> SendWaiter<T> {
    pub fn matches(&self, identifier: &Identifier) -> bool {
        if let SendWaiter::Selector(selector) = self {
            selector.identify(identifier)
        } else {
            false
        }
    }
}

pub(crate) enum RecvWaiter<T> {
    Thread(ThreadRecv<T>),
    Selector(Selector),
}

impl<T> RecvWaiter<T> {
    pub fn matches(&self, identifier: &Identifier) -> bool {
        if let RecvWaiter::Selector(selector) = self {
            selector.identify(identifier)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;

    #[test]
    fn claim_beats_cancel() {
        let (session, waker) = session::session();
        let waiter = ThreadSend::new(waker, 5);
        let (value, waker) = waiter.claim().unwrap();
        assert_eq!(value, 5);
        assert_eq!(waiter.cancel(), None);
        waker.wake(Ok(()));
        assert_eq!(session.wait(), Ok(()));
    }

    #[test]
    fn cancel_takes_value_back() {
        let (_session, waker) = session::session();
        let waiter = ThreadSend::new(waker, 5);
        assert_eq!(waiter.cancel(), Some(5));
        assert!(waiter.claim().is_none());
    }

    #[test]
    fn recv_claim_is_exclusive() {
        let (session, waker) = session::session::<Result<i32, RecvError>>();
        let waiter = ThreadRecv::new(waker);
        let waker = waiter.claim().unwrap();
        assert!(!waiter.cancel());
        assert!(waiter.claim().is_none());
        waker.wake(Ok(3));
        assert_eq!(session.wait(), Ok(3));
    }
}
