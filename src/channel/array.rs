//! Bounded FIFO channel backed by a growable ring buffer.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use static_assertions::assert_impl_all;

use super::core::{Core, IntoIter, OnRecv, OnRecvCatching, OnSend};
use super::error::{
    Cause, RecvError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError,
};

// Ring storage starts small and doubles on demand up to the channel
// capacity. It never shrinks.
const INITIAL_SIZE: usize = 8;

pub(crate) struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        RingBuffer { slots: Self::allocate(capacity.min(INITIAL_SIZE)), head: 0, len: 0, capacity }
    }

    fn allocate(size: usize) -> Box<[Option<T>]> {
        std::iter::repeat_with(|| None).take(size).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push(&mut self, value: T) {
        assert!(self.len < self.capacity, "ring buffer overflow");
        if self.len == self.slots.len() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(value);
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    fn grow(&mut self) {
        let mut slots = Self::allocate((self.slots.len() * 2).min(self.capacity));
        for index in 0..self.len {
            let slot = (self.head + index) % self.slots.len();
            slots[index] = self.slots[slot].take();
        }
        self.slots = slots;
        self.head = 0;
    }
}

/// Bounded multi-producer multi-consumer FIFO channel.
///
/// Up to `capacity` values are buffered. Producers block while the buffer is
/// full, consumers block while it is empty, and buffered values are
/// delivered in send order. Clones share the same channel.
pub struct ArrayChannel<T> {
    core: Arc<Core<T>>,
    capacity: usize,
}

assert_impl_all!(ArrayChannel<i32>: Send, Sync);

impl<T> Clone for ArrayChannel<T> {
    fn clone(&self) -> Self {
        ArrayChannel { core: self.core.clone(), capacity: self.capacity }
    }
}

impl<T> ArrayChannel<T> {
    /// Constructs a channel buffering up to `capacity` values.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> ArrayChannel<T> {
        assert!(capacity > 0, "capacity must be greater than 0");
        ArrayChannel { core: Core::array(capacity), capacity }
    }

    /// Sends a value, blocking while the buffer is full.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.core.send(false, None, value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => unreachable!("got full in blocking send"),
            Err(TrySendError::Closed(value, cause)) => Err(SendError::Closed(value, cause)),
        }
    }

    /// Attempts to send a value without blocking.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.core.send(true, None, value)
    }

    /// Sends a value, giving up once `timeout` elapses. A send that gave up
    /// left no trace: the value comes back and nothing was delivered.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        let deadline = Instant::now() + timeout;
        self.core.send(false, Some(deadline), value).map_err(SendTimeoutError::from)
    }

    /// Receives a value, blocking while the channel is empty. Fails with the
    /// close cause once the channel is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.core.recv(false, None).map_err(RecvError::from)
    }

    /// Attempts to receive a value without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.core.recv(true, None)
    }

    /// Receives a value, giving up once `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        self.core.recv(false, Some(deadline)).map_err(RecvTimeoutError::from)
    }

    /// Closes the channel for sending. Suspended senders fail with the
    /// cause; buffered values stay receivable. Returns false if the channel
    /// was closed before.
    pub fn close(&self, cause: Option<Cause>) -> bool {
        self.core.close(cause)
    }

    /// Closes the channel, discards buffered values and wakes remaining
    /// receivers with the cause, [Cause::Cancelled] if none is given.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        self.core.cancel(cause)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    pub fn is_closed_for_send(&self) -> bool {
        self.core.is_closed_for_send()
    }

    /// True once the channel is closed and nothing receivable remains.
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

impl<T> IntoIterator for ArrayChannel<T> {
    type IntoIter = IntoIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.core)
    }
}

impl<T> fmt::Debug for ArrayChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayChannel(buffer:capacity={},size={})", self.capacity, self.core.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test]
    #[should_panic]
    fn capacity_zero() {
        ArrayChannel::<()>::new(0);
    }

    #[test]
    fn ring_wraps_around() {
        let mut ring = RingBuffer::new(4);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.pop(), Some(1));
        ring.push(3);
        ring.push(4);
        ring.push(5);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), Some(5));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn ring_grow_preserves_order() {
        let mut ring = RingBuffer::new(20);
        for value in 0..8 {
            ring.push(value);
        }
        for value in 0..4 {
            assert_eq!(ring.pop(), Some(value));
        }
        for value in 8..16 {
            ring.push(value);
        }
        for value in 4..16 {
            assert_eq!(ring.pop(), Some(value));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn send_recv_in_order() {
        let channel = ArrayChannel::new(2);
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        assert_eq!(channel.recv(), Ok(1));
        assert_eq!(channel.recv(), Ok(2));
        assert!(channel.is_empty());
    }

    #[test]
    fn try_send_full() {
        let channel = ArrayChannel::new(2);
        channel.try_send(1).unwrap();
        channel.try_send(2).unwrap();
        assert!(channel.is_full());
        assert_eq!(channel.try_send(3), Err(TrySendError::Full(3)));
        assert_eq!(channel.try_recv(), Ok(1));
        assert_eq!(channel.try_recv(), Ok(2));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn buffer_grows_up_to_capacity() {
        let channel = ArrayChannel::new(20);
        for value in 0..20 {
            channel.try_send(value).unwrap();
        }
        assert!(channel.is_full());
        assert_eq!(channel.try_send(20), Err(TrySendError::Full(20)));
        for value in 0..20 {
            assert_eq!(channel.try_recv(), Ok(value));
        }
    }

    #[test]
    fn close_is_monotonic() {
        let channel = ArrayChannel::new(2);
        channel.send(1).unwrap();
        assert!(channel.close(None));
        assert!(!channel.close(Some(Cause::reason("late"))));
        assert!(channel.is_closed_for_send());
        assert!(!channel.is_closed_for_receive());
        assert_eq!(channel.try_send(2), Err(TrySendError::Closed(2, None)));
        assert_eq!(channel.try_recv(), Ok(1));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed(None)));
        assert!(channel.is_closed_for_receive());
    }

    #[test_case(None; "without cause")]
    #[test_case(Some(Cause::reason("overflow")); "with cause")]
    fn try_send_after_close_reports_cause(cause: Option<Cause>) {
        let channel = ArrayChannel::new(1);
        channel.close(cause.clone());
        assert_eq!(channel.try_send(9), Err(TrySendError::Closed(9, cause)));
    }

    #[test]
    fn cancel_discards_buffered_values() {
        let channel = ArrayChannel::new(2);
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        assert!(channel.cancel(None));
        assert!(channel.is_empty());
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed(Some(Cause::Cancelled))));
        assert_eq!(channel.try_send(3), Err(TrySendError::Closed(3, Some(Cause::Cancelled))));
    }

    #[test]
    fn cancel_after_close_keeps_first_cause() {
        let channel = ArrayChannel::new(2);
        channel.send(1).unwrap();
        assert!(channel.close(None));
        assert!(!channel.cancel(Some(Cause::reason("late"))));
        // the buffer is discarded anyway
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed(None)));
    }

    #[test]
    fn recv_timeout_empty() {
        let channel = ArrayChannel::<i32>::new(1);
        assert_eq!(channel.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));
        channel.send(1).unwrap();
        assert_eq!(channel.recv_timeout(Duration::from_millis(50)), Ok(1));
    }

    #[test]
    fn into_iter_drains_then_ends() {
        let channel = ArrayChannel::new(3);
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        channel.send(3).unwrap();
        channel.close(None);

        let mut iter = channel.into_iter();
        assert_eq!(iter.next(), Some(1));
        assert_eq!(iter.next(), Some(2));
        assert_eq!(iter.next(), Some(3));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn debug_renders_buffer() {
        let channel = ArrayChannel::new(2);
        channel.send(1).unwrap();
        assert_eq!(format!("{:?}", channel), "ArrayChannel(buffer:capacity=2,size=1)");
    }
}
