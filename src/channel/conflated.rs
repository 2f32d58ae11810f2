//! Channel keeping only the latest unreceived value.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use static_assertions::assert_impl_all;

use super::core::{Core, IntoIter, OnRecv, OnRecvCatching, OnSend};
use super::error::{Cause, RecvError, RecvTimeoutError, SendError, TryRecvError, TrySendError};

/// Single slot holding either nothing or the latest sent value. The empty
/// state is the `None` variant, which user code cannot forge as a value.
pub(crate) struct Slot<T> {
    value: Option<T>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Slot { value: None }
    }

    pub fn len(&self) -> usize {
        self.value.is_some() as usize
    }

    /// Stores a value, conflating any value not yet received.
    pub fn put(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

/// Channel holding at most one value where every send overwrites the
/// previous unreceived one. Sends never block; receivers block while the
/// slot is empty. Clones share the same channel.
pub struct ConflatedChannel<T> {
    core: Arc<Core<T>>,
}

assert_impl_all!(ConflatedChannel<i32>: Send, Sync);

impl<T> Clone for ConflatedChannel<T> {
    fn clone(&self) -> Self {
        ConflatedChannel { core: self.core.clone() }
    }
}

impl<T> Default for ConflatedChannel<T> {
    fn default() -> Self {
        ConflatedChannel::new()
    }
}

impl<T> ConflatedChannel<T> {
    pub fn new() -> ConflatedChannel<T> {
        ConflatedChannel { core: Core::conflated() }
    }

    /// Sends a value. A waiting receiver gets it directly; otherwise it
    /// replaces whatever the slot held. Fails only on a closed channel.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.core.send(true, None, value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => unreachable!("conflated channel got full"),
            Err(TrySendError::Closed(value, cause)) => Err(SendError::Closed(value, cause)),
        }
    }

    /// Same as [send](ConflatedChannel::send); conflated sends never block.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.core.send(true, None, value)
    }

    /// Receives the latest sent value, blocking while the slot is empty.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.core.recv(false, None).map_err(RecvError::from)
    }

    /// Attempts to receive without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.core.recv(true, None)
    }

    /// Receives a value, giving up once `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        self.core.recv(false, Some(deadline)).map_err(RecvTimeoutError::from)
    }

    /// Closes the channel for sending; an unreceived value stays receivable.
    /// Returns false if the channel was closed before.
    pub fn close(&self, cause: Option<Cause>) -> bool {
        self.core.close(cause)
    }

    /// Closes the channel and resets the slot, waking remaining receivers
    /// with the cause, [Cause::Cancelled] if none is given.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        self.core.cancel(cause)
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Conflated channels overwrite instead of filling up.
    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    pub fn is_closed_for_send(&self) -> bool {
        self.core.is_closed_for_send()
    }

    pub fn is_closed_for_receive(&self) -> bool {
        self.core.is_closed_for_receive()
    }

    /// Send clause for [select!](crate::select!).
    pub fn on_send(&self) -> OnSend<T> {
        OnSend::new(self.core.clone())
    }

    /// Receive clause for [select!](crate::select!).
    pub fn on_recv(&self) -> OnRecv<T> {
        OnRecv::new(self.core.clone())
    }

    /// Receive clause for [select!](crate::select!) surfacing the close
    /// cause.
    pub fn on_recv_catching(&self) -> OnRecvCatching<T> {
        OnRecvCatching::new(self.core.clone())
    }
}

impl<T> IntoIterator for ConflatedChannel<T> {
    type IntoIter = IntoIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.core)
    }
}

impl<T: fmt::Debug> fmt::Debug for ConflatedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_value(f)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn send_overwrites_unreceived_value() {
        let channel = ConflatedChannel::new();
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        channel.send(3).unwrap();
        assert_eq!(channel.recv(), Ok(3));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(channel.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));
    }

    #[test]
    fn send_never_fills() {
        let channel = ConflatedChannel::new();
        for value in 0..100 {
            channel.try_send(value).unwrap();
            assert!(!channel.is_full());
        }
        assert_eq!(channel.recv(), Ok(99));
    }

    #[test]
    fn close_keeps_last_value() {
        let channel = ConflatedChannel::new();
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        assert!(channel.close(None));
        assert!(channel.is_closed_for_send());
        assert!(!channel.is_closed_for_receive());
        assert_eq!(channel.send(3), Err(SendError::Closed(3, None)));
        assert_eq!(channel.recv(), Ok(2));
        assert_eq!(channel.recv(), Err(RecvError::Closed(None)));
        assert!(channel.is_closed_for_receive());
    }

    #[test]
    fn cancel_resets_slot() {
        let channel = ConflatedChannel::new();
        channel.send(1).unwrap();
        assert!(channel.cancel(None));
        assert!(channel.is_empty());
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed(Some(Cause::Cancelled))));
    }

    #[test]
    fn into_iter_yields_latest_then_ends() {
        let channel = ConflatedChannel::new();
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        channel.close(None);
        let mut iter = channel.into_iter();
        assert_eq!(iter.next(), Some(2));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn debug_renders_value() {
        let channel = ConflatedChannel::new();
        channel.send(3).unwrap();
        assert_eq!(format!("{:?}", channel), "(value=3)");
        channel.recv().unwrap();
        assert_eq!(format!("{:?}", channel), "(value=<empty>)");
    }
}
