//! Shared channel engine: waiter queues, close and cancel protocol, direct
//! rendezvous handoff, sender promotion and select hooks. The concrete
//! buffer policies live in [array](super::array) and
//! [conflated](super::conflated).
//!
//! The engine holds one short lock over buffer state and waiter queues.
//! Resumptions are two phased: a waiter is claimed under the lock, the
//! matching [Wakeup] completes after the lock is released, so resumed
//! parties never observe the engine mid-mutation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use num_enum::{IntoPrimitive, UnsafeFromPrimitive};

use super::array::RingBuffer;
use super::conflated::Slot;
use super::error::{Cause, RecvError, SendError, TryRecvError, TrySendError};
use super::list::{Node, WaiterList};
use super::waiter::{RecvWaiter, SendWaiter, ThreadRecv, ThreadSend};
use crate::select::{self, Identifier, Selector};
use crate::session::{self, Session, SessionWaker};

#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, UnsafeFromPrimitive)]
pub(crate) enum Permit {
    Closed = 0,
    Consume = 1,
}

impl From<Permit> for select::Permit {
    fn from(permit: Permit) -> Self {
        Self::with_primitive(permit.into())
    }
}

impl From<select::Permit> for Permit {
    fn from(permit: select::Permit) -> Self {
        unsafe { Permit::from_unchecked(permit.into_primitive()) }
    }
}

/// Buffer policy. Rendezvous and unlimited shapes are out of scope, so the
/// policy set is closed.
pub(crate) enum Buffer<T> {
    Array(RingBuffer<T>),
    Conflated(Slot<T>),
}

impl<T> Buffer<T> {
    fn len(&self) -> usize {
        match self {
            Buffer::Array(ring) => ring.len(),
            Buffer::Conflated(slot) => slot.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no more value can be admitted, counting outstanding send
    /// reservations. The conflated slot overwrites, so it never fills.
    fn is_full(&self, reserved: usize) -> bool {
        match self {
            Buffer::Array(ring) => ring.len() + reserved >= ring.capacity(),
            Buffer::Conflated(_) => false,
        }
    }

    /// True when the buffer can back one more receive reservation with a
    /// pushed value. The array needs physical room; the conflated slot keeps
    /// only the latest value, so it backs at most one reservation.
    fn can_reserve(&self, reserved: usize) -> bool {
        match self {
            Buffer::Array(ring) => ring.len() < ring.capacity(),
            Buffer::Conflated(_) => reserved == 0,
        }
    }

    fn push(&mut self, value: T) {
        match self {
            Buffer::Array(ring) => ring.push(value),
            Buffer::Conflated(slot) => slot.put(value),
        }
    }

    fn pop(&mut self) -> Option<T> {
        match self {
            Buffer::Array(ring) => ring.pop(),
            Buffer::Conflated(slot) => slot.take(),
        }
    }

    fn clear(&mut self) {
        match self {
            Buffer::Array(ring) => ring.clear(),
            Buffer::Conflated(slot) => slot.clear(),
        }
    }
}

/// Phase two of a waiter handoff, completed after the state lock is
/// released.
enum Wakeup<T> {
    Send(SessionWaker<Result<(), SendError<T>>>, Result<(), SendError<T>>),
    Recv(SessionWaker<Result<T, RecvError>>, Result<T, RecvError>),
    Select(Selector, Permit),
}

impl<T> Wakeup<T> {
    fn complete(self) {
        match self {
            Wakeup::Send(waker, result) => waker.wake(result),
            Wakeup::Recv(waker, result) => waker.wake(result),
            Wakeup::Select(selector, permit) => selector.complete(permit.into()),
        }
    }
}

fn complete<T>(wakeups: Vec<Wakeup<T>>) {
    for wakeup in wakeups {
        wakeup.complete();
    }
}

struct State<T> {
    buffer: Buffer<T>,
    closed: Option<Option<Cause>>,
    cancelled: bool,
    send_permits: usize,
    recv_permits: usize,
    senders: WaiterList<SendWaiter<T>>,
    receivers: WaiterList<RecvWaiter<T>>,
}

impl<T> State<T> {
    fn new(buffer: Buffer<T>) -> Self {
        State {
            buffer,
            closed: None,
            cancelled: false,
            send_permits: 0,
            recv_permits: 0,
            senders: WaiterList::new(),
            receivers: WaiterList::new(),
        }
    }

    fn cause(&self) -> Option<Cause> {
        self.closed.as_ref().and_then(|cause| cause.clone())
    }

    fn is_full(&self) -> bool {
        self.buffer.is_full(self.send_permits)
    }

    /// Buffered values not reserved by an outstanding receive permit.
    fn available(&self) -> usize {
        self.buffer.len().saturating_sub(self.recv_permits)
    }

    /// Values a receiver could still obtain: buffered plus reserved sends.
    fn recvable_len(&self) -> usize {
        self.buffer.len() + self.send_permits
    }

    fn is_recvable(&self) -> bool {
        self.recvable_len() != 0
    }

    /// Hands the value to the first live queued receiver: directly for a
    /// suspended one, through the buffer and a receive reservation for a
    /// selecting one. Gives the value back when nobody takes it.
    fn deliver(&mut self, value: T, wakeups: &mut Vec<Wakeup<T>>) -> Result<(), T> {
        while let Some(node) = self.receivers.pop_front() {
            if let RecvWaiter::Selector(_) = node.waiter() {
                if !self.buffer.can_reserve(self.recv_permits) {
                    // No room to back another reservation; the receiver
                    // stays queued until one drains.
                    self.receivers.push_front(node);
                    break;
                }
            }
            match node.waiter() {
                RecvWaiter::Thread(thread) => {
                    if let Some(waker) = thread.claim() {
                        wakeups.push(Wakeup::Recv(waker, Ok(value)));
                        return Ok(());
                    }
                },
                RecvWaiter::Selector(selector) => {
                    if selector.claim() {
                        let selector = selector.clone();
                        self.buffer.push(value);
                        self.recv_permits += 1;
                        wakeups.push(Wakeup::Select(selector, Permit::Consume));
                        return Ok(());
                    }
                },
            }
        }
        Err(value)
    }

    /// Moves the first live queued sender's element into freed capacity, or
    /// grants a send reservation to a selecting sender. Skips waiters that
    /// were cancelled or lost their selection elsewhere.
    fn promote(&mut self, wakeups: &mut Vec<Wakeup<T>>) {
        while let Some(node) = self.senders.pop_front() {
            match node.waiter() {
                SendWaiter::Thread(thread) => {
                    if let Some((value, waker)) = thread.claim() {
                        self.buffer.push(value);
                        wakeups.push(Wakeup::Send(waker, Ok(())));
                        return;
                    }
                },
                SendWaiter::Selector(selector) => {
                    if selector.claim() {
                        let selector = selector.clone();
                        self.send_permits += 1;
                        wakeups.push(Wakeup::Select(selector, Permit::Consume));
                        return;
                    }
                },
            }
        }
    }

    /// Serves queued receivers once sender promotion made buffered values
    /// available again: a suspended receiver takes the head value directly,
    /// a selecting one gets a reservation on it.
    fn wake_receiver(&mut self, wakeups: &mut Vec<Wakeup<T>>) {
        while self.available() != 0 {
            let Some(node) = self.receivers.pop_front() else {
                return;
            };
            match node.waiter() {
                RecvWaiter::Thread(thread) => {
                    if let Some(waker) = thread.claim() {
                        let Some(value) = self.buffer.pop() else {
                            unreachable!("available buffer held no value")
                        };
                        wakeups.push(Wakeup::Recv(waker, Ok(value)));
                    }
                },
                RecvWaiter::Selector(selector) => {
                    if selector.claim() {
                        self.recv_permits += 1;
                        wakeups.push(Wakeup::Select(selector.clone(), Permit::Consume));
                    }
                },
            }
        }
    }

    fn close_senders(&mut self, wakeups: &mut Vec<Wakeup<T>>) {
        let cause = self.cause();
        while let Some(node) = self.senders.pop_front() {
            match node.waiter() {
                SendWaiter::Thread(thread) => {
                    if let Some((value, waker)) = thread.claim() {
                        wakeups.push(Wakeup::Send(waker, Err(SendError::Closed(value, cause.clone()))));
                    }
                },
                SendWaiter::Selector(selector) => {
                    if selector.claim() {
                        wakeups.push(Wakeup::Select(selector.clone(), Permit::Closed));
                    }
                },
            }
        }
    }

    fn close_receivers(&mut self, wakeups: &mut Vec<Wakeup<T>>) {
        let cause = self.cause();
        while let Some(node) = self.receivers.pop_front() {
            match node.waiter() {
                RecvWaiter::Thread(thread) => {
                    if let Some(waker) = thread.claim() {
                        wakeups.push(Wakeup::Recv(waker, Err(RecvError::Closed(cause.clone()))));
                    }
                },
                RecvWaiter::Selector(selector) => {
                    if selector.claim() {
                        wakeups.push(Wakeup::Select(selector.clone(), Permit::Closed));
                    }
                },
            }
        }
    }

    fn select_send_permit(&mut self) -> Option<Permit> {
        if self.closed.is_some() {
            Some(Permit::Closed)
        } else if !self.is_full() {
            self.send_permits += 1;
            Some(Permit::Consume)
        } else {
            None
        }
    }

    fn select_recv_permit(&mut self) -> Option<Permit> {
        if self.available() != 0 {
            self.recv_permits += 1;
            Some(Permit::Consume)
        } else if self.closed.is_some() {
            if self.send_permits != 0 {
                None
            } else if self.buffer.is_empty() {
                Some(Permit::Closed)
            } else {
                // Let reservation holders contend for the remaining values.
                self.recv_permits += 1;
                Some(Permit::Consume)
            }
        } else {
            None
        }
    }
}

pub(crate) struct Core<T> {
    state: Mutex<State<T>>,
}

// SAFETY: waiter list nodes are raw pointers owned by the state; access to
// them is confined to critical sections over the state lock.
unsafe impl<T: Send> Send for Core<T> {}
unsafe impl<T: Send> Sync for Core<T> {}

impl<T> Core<T> {
    pub fn array(capacity: usize) -> Arc<Core<T>> {
        Arc::new(Core { state: Mutex::new(State::new(Buffer::Array(RingBuffer::new(capacity)))) })
    }

    pub fn conflated() -> Arc<Core<T>> {
        Arc::new(Core { state: Mutex::new(State::new(Buffer::Conflated(Slot::new()))) })
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap()
    }

    pub fn send(&self, trying: bool, deadline: Option<Instant>, value: T) -> Result<(), TrySendError<T>> {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        if state.closed.is_some() {
            let cause = state.cause();
            return Err(TrySendError::Closed(value, cause));
        }
        let value = match state.deliver(value, &mut wakeups) {
            Ok(()) => {
                drop(state);
                complete(wakeups);
                return Ok(());
            },
            Err(value) => value,
        };
        if !state.is_full() {
            state.buffer.push(value);
            return Ok(());
        }
        if trying {
            return Err(TrySendError::Full(value));
        }
        let (session, waker) = session::session();
        let node = Node::new(SendWaiter::Thread(ThreadSend::new(waker, value)));
        state.senders.push_back(node.clone());
        drop(state);
        let result = match deadline {
            None => session.wait(),
            Some(deadline) => match session.wait_until(deadline) {
                Some(result) => result,
                None => return self.abandon_send(&node, session),
            },
        };
        result.map_err(TrySendError::from)
    }

    /// Backs out of a suspended send whose deadline passed. A resumption that
    /// already claimed the waiter wins the race and the send completes.
    fn abandon_send(
        &self,
        node: &Arc<Node<SendWaiter<T>>>,
        session: Session<Result<(), SendError<T>>>,
    ) -> Result<(), TrySendError<T>> {
        let mut state = self.lock();
        let SendWaiter::Thread(thread) = node.waiter() else {
            unreachable!("abandoned waiter is not a suspended send")
        };
        match thread.cancel() {
            Some(value) => {
                state.senders.remove(node);
                Err(TrySendError::Full(value))
            },
            None => {
                drop(state);
                session.wait().map_err(TrySendError::from)
            },
        }
    }

    pub fn recv(&self, trying: bool, deadline: Option<Instant>) -> Result<T, TryRecvError> {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        if state.available() != 0 {
            let Some(value) = state.buffer.pop() else {
                unreachable!("available buffer held no value")
            };
            state.promote(&mut wakeups);
            if state.closed.is_some() && !state.is_recvable() {
                state.close_receivers(&mut wakeups);
            }
            drop(state);
            complete(wakeups);
            return Ok(value);
        }
        if state.closed.is_some() && !state.is_recvable() {
            let cause = state.cause();
            return Err(TryRecvError::Closed(cause));
        }
        if trying {
            return Err(TryRecvError::Empty);
        }
        let (session, waker) = session::session();
        let node = Node::new(RecvWaiter::Thread(ThreadRecv::new(waker)));
        state.receivers.push_back(node.clone());
        drop(state);
        let result = match deadline {
            None => session.wait(),
            Some(deadline) => match session.wait_until(deadline) {
                Some(result) => result,
                None => return self.abandon_recv(&node, session),
            },
        };
        result.map_err(TryRecvError::from)
    }

    fn abandon_recv(
        &self,
        node: &Arc<Node<RecvWaiter<T>>>,
        session: Session<Result<T, RecvError>>,
    ) -> Result<T, TryRecvError> {
        let mut state = self.lock();
        let RecvWaiter::Thread(thread) = node.waiter() else {
            unreachable!("abandoned waiter is not a suspended receive")
        };
        if thread.cancel() {
            state.receivers.remove(node);
            Err(TryRecvError::Empty)
        } else {
            drop(state);
            session.wait().map_err(TryRecvError::from)
        }
    }

    /// Closes the channel. Queued senders are drained with the cause;
    /// buffered values stay receivable; queued receivers are drained once
    /// nothing receivable remains. Returns false if already closed.
    pub fn close(&self, cause: Option<Cause>) -> bool {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        if state.closed.is_some() {
            return false;
        }
        state.closed = Some(cause);
        state.close_senders(&mut wakeups);
        if !state.is_recvable() {
            state.close_receivers(&mut wakeups);
        }
        drop(state);
        complete(wakeups);
        true
    }

    /// Closes the channel recording a cause, discards buffered values and
    /// wakes remaining receivers with the cause. Idempotent on the cause:
    /// cancelling an already closed channel still discards its buffer.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        let was_open = state.closed.is_none();
        if was_open {
            state.closed = Some(Some(cause.unwrap_or(Cause::Cancelled)));
            state.close_senders(&mut wakeups);
        }
        state.cancelled = true;
        state.buffer.clear();
        if !state.is_recvable() {
            state.close_receivers(&mut wakeups);
        }
        drop(state);
        complete(wakeups);
        was_open
    }

    pub fn select_send_permit(&self) -> Option<select::Permit> {
        let mut state = self.lock();
        state.select_send_permit().map(Into::into)
    }

    /// Writes a value with a previously granted send reservation. The value
    /// was admitted when the permit was granted, so it is still delivered on
    /// a channel that closed in between; only cancellation rejects it.
    pub fn consume_send_permit(&self, value: T) -> Result<(), SendError<T>> {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        assert!(state.send_permits > 0, "consumed send permit was never granted");
        state.send_permits -= 1;
        if state.cancelled {
            let cause = state.cause();
            if !state.is_recvable() {
                state.close_receivers(&mut wakeups);
            }
            drop(state);
            complete(wakeups);
            return Err(SendError::Closed(value, cause));
        }
        if let Err(value) = state.deliver(value, &mut wakeups) {
            state.buffer.push(value);
        }
        if state.closed.is_some() && !state.is_recvable() {
            state.close_receivers(&mut wakeups);
        }
        drop(state);
        complete(wakeups);
        Ok(())
    }

    pub fn watch_send(&self, selector: Selector) -> bool {
        let mut state = self.lock();
        if let Some(permit) = state.select_send_permit() {
            if !selector.apply(permit.into()) && permit == Permit::Consume {
                state.send_permits -= 1;
            }
            return true;
        }
        state.senders.push_back(Node::new(SendWaiter::Selector(selector)));
        false
    }

    pub fn unwatch_send(&self, identifier: &Identifier) {
        let mut state = self.lock();
        state.senders.remove_first(|waiter| waiter.matches(identifier));
    }

    pub fn select_recv_permit(&self) -> Option<select::Permit> {
        let mut state = self.lock();
        state.select_recv_permit().map(Into::into)
    }

    /// Takes a value with a previously granted receive reservation. Returns
    /// None only when the channel closed or was cancelled in between.
    pub fn consume_recv_permit(&self) -> Option<T> {
        let mut wakeups = Vec::new();
        let mut state = self.lock();
        assert!(state.recv_permits > 0, "consumed receive permit was never granted");
        state.recv_permits -= 1;
        let value = state.buffer.pop();
        if value.is_some() {
            state.promote(&mut wakeups);
            state.wake_receiver(&mut wakeups);
            if state.closed.is_some() && !state.is_recvable() {
                state.close_receivers(&mut wakeups);
            }
        }
        drop(state);
        complete(wakeups);
        value
    }

    pub fn watch_recv(&self, selector: Selector) -> bool {
        let mut state = self.lock();
        if let Some(permit) = state.select_recv_permit() {
            if !selector.apply(permit.into()) && permit == Permit::Consume {
                state.recv_permits -= 1;
            }
            return true;
        }
        state.receivers.push_back(Node::new(RecvWaiter::Selector(selector)));
        false
    }

    pub fn unwatch_recv(&self, identifier: &Identifier) {
        let mut state = self.lock();
        state.receivers.remove_first(|waiter| waiter.matches(identifier));
    }

    pub fn close_cause(&self) -> Option<Cause> {
        self.lock().cause()
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    pub fn is_closed_for_send(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn is_closed_for_receive(&self) -> bool {
        let state = self.lock();
        state.closed.is_some() && !state.is_recvable()
    }

    pub fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    where
        T: fmt::Debug,
    {
        let state = self.lock();
        match &state.buffer {
            Buffer::Conflated(slot) => match slot.get() {
                Some(value) => write!(f, "(value={:?})", value),
                None => f.write_str("(value=<empty>)"),
            },
            Buffer::Array(_) => unreachable!("array channel renders its buffer instead"),
        }
    }
}

/// Send clause for [select!](crate::select!): ready when the channel can
/// admit a value or is closed.
pub struct OnSend<T> {
    core: Arc<Core<T>>,
}

impl<T> OnSend<T> {
    pub(crate) fn new(core: Arc<Core<T>>) -> Self {
        OnSend { core }
    }
}

impl<T> select::Selectable for OnSend<T> {
    fn select_permit(&self) -> Option<select::Permit> {
        self.core.select_send_permit()
    }

    fn watch_permit(&self, selector: Selector) -> bool {
        self.core.watch_send(selector)
    }

    fn unwatch_permit(&self, identifier: &Identifier) {
        self.core.unwatch_send(identifier)
    }
}

impl<T> select::PermitWriter for OnSend<T> {
    type Item = T;
    type Result = Result<(), SendError<T>>;

    fn consume_permit(&mut self, permit: select::Permit, value: Self::Item) -> Self::Result {
        match Permit::from(permit) {
            Permit::Closed => Err(SendError::Closed(value, self.core.close_cause())),
            Permit::Consume => self.core.consume_send_permit(value),
        }
    }
}

/// Receive clause for [select!](crate::select!): ready when a value is
/// obtainable or the channel is closed. Consuming yields `None` once the
/// channel is drained and closed.
pub struct OnRecv<T> {
    core: Arc<Core<T>>,
}

impl<T> OnRecv<T> {
    pub(crate) fn new(core: Arc<Core<T>>) -> Self {
        OnRecv { core }
    }
}

impl<T> select::Selectable for OnRecv<T> {
    fn select_permit(&self) -> Option<select::Permit> {
        self.core.select_recv_permit()
    }

    fn watch_permit(&self, selector: Selector) -> bool {
        self.core.watch_recv(selector)
    }

    fn unwatch_permit(&self, identifier: &Identifier) {
        self.core.unwatch_recv(identifier)
    }
}

impl<T> select::PermitReader for OnRecv<T> {
    type Result = Option<T>;

    fn consume_permit(&mut self, permit: select::Permit) -> Self::Result {
        match Permit::from(permit) {
            Permit::Closed => None,
            Permit::Consume => self.core.consume_recv_permit(),
        }
    }
}

/// Receive clause that surfaces the close cause instead of folding it into
/// `None`.
pub struct OnRecvCatching<T> {
    core: Arc<Core<T>>,
}

impl<T> OnRecvCatching<T> {
    pub(crate) fn new(core: Arc<Core<T>>) -> Self {
        OnRecvCatching { core }
    }
}

impl<T> select::Selectable for OnRecvCatching<T> {
    fn select_permit(&self) -> Option<select::Permit> {
        self.core.select_recv_permit()
    }

    fn watch_permit(&self, selector: Selector) -> bool {
        self.core.watch_recv(selector)
    }

    fn unwatch_permit(&self, identifier: &Identifier) {
        self.core.unwatch_recv(identifier)
    }
}

impl<T> select::PermitReader for OnRecvCatching<T> {
    type Result = Result<T, RecvError>;

    fn consume_permit(&mut self, permit: select::Permit) -> Self::Result {
        match Permit::from(permit) {
            Permit::Closed => Err(RecvError::Closed(self.core.close_cause())),
            Permit::Consume => match self.core.consume_recv_permit() {
                Some(value) => Ok(value),
                None => Err(RecvError::Closed(self.core.close_cause())),
            },
        }
    }
}

/// An iterator draining a channel until it is closed. Each step advances the
/// shared channel state.
pub struct IntoIter<T> {
    core: Arc<Core<T>>,
}

impl<T> IntoIter<T> {
    pub(crate) fn new(core: Arc<Core<T>>) -> Self {
        IntoIter { core }
    }
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.core.recv(false, None).ok()
    }
}

impl<T> std::iter::FusedIterator for IntoIter<T> {}
