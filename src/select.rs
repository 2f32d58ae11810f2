//! Selectively read and write values to/from multiple selectables
//! simultaneously.
//!
//! A selection runs an at-most-once election among its clauses: whichever
//! [Selectable] applies a [Permit] to its [Selector] first wins, every later
//! application fails, and losing clauses leave their channel untouched.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::session::{self, SessionWaker};

/// Permit promises to [Select] that consuming the chosen operation will not
/// block the current execution.
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    primitive: usize,
}

impl Permit {
    /// Constructs a permit with primitive value.
    pub const fn with_primitive(primitive: usize) -> Self {
        Permit { primitive }
    }

    /// Turns this permit to its primitive value.
    pub fn into_primitive(self) -> usize {
        self.primitive
    }
}

const UNDECIDED: usize = usize::MAX;

struct Core {
    winner: AtomicUsize,
    waker: UnsafeCell<Option<SessionWaker<(usize, Permit)>>>,
}

// SAFETY: the waker cell is taken only by the winner of the election.
unsafe impl Send for Core {}
unsafe impl Sync for Core {}

impl Core {
    fn new(waker: SessionWaker<(usize, Permit)>) -> Arc<Core> {
        Arc::new(Core { winner: AtomicUsize::new(UNDECIDED), waker: UnsafeCell::new(Some(waker)) })
    }

    fn identifier(core: &Arc<Core>) -> Identifier {
        Identifier { raw: Arc::as_ptr(core) as usize }
    }
}

/// [Selector] identifier.
pub struct Identifier {
    raw: usize,
}

impl Identifier {
    fn equals(&self, other: &Identifier) -> bool {
        self.raw == other.raw
    }
}

/// Selector waits for a permit application from one of the watched
/// [Selectable]s.
pub struct Selector {
    index: usize,
    core: Arc<Core>,
}

impl Clone for Selector {
    fn clone(&self) -> Self {
        Selector { index: self.index, core: self.core.clone() }
    }
}

impl Selector {
    fn new(index: usize, core: Arc<Core>) -> Self {
        Selector { index, core }
    }

    /// Applies a permit if no contending clause applied one before.
    pub fn apply(self, permit: Permit) -> bool {
        if self.claim() {
            self.complete(permit);
            return true;
        }
        false
    }

    /// Phase one of an application: wins the at-most-once election across all
    /// contending clauses, or loses to a clause that won earlier.
    pub(crate) fn claim(&self) -> bool {
        self.core.winner.compare_exchange(UNDECIDED, self.index, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    /// Phase two: delivers the permit to the selecting thread. Must follow a
    /// successful [Selector::claim] and runs outside any channel lock.
    pub(crate) fn complete(self, permit: Permit) {
        // SAFETY: the claim succeeded, so this selector owns the waker.
        let waker = unsafe { (*self.core.waker.get()).take() };
        match waker {
            Some(waker) => waker.wake((self.index, permit)),
            None => unreachable!("selection completed twice"),
        }
    }

    /// Identifies this selector as given identifier.
    pub fn identify(&self, identifier: &Identifier) -> bool {
        Core::identifier(&self.core).equals(identifier)
    }
}

/// Enumerates selectables in predictable but not fixed order so no clause
/// starves across repeated selections.
#[derive(Clone)]
struct Enumerator<'a> {
    next: usize,
    end: usize,
    selectables: &'a [Option<&'a dyn Selectable>],
}

impl<'a> Enumerator<'a> {
    fn new(selectables: &'a [Option<&'a dyn Selectable>]) -> Self {
        let start = rand_usize() % selectables.len();
        Enumerator { next: start, end: start + selectables.len(), selectables }
    }
}

impl<'a> Iterator for Enumerator<'a> {
    type Item = (usize, Option<&'a dyn Selectable>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            None
        } else {
            let index = self.next % self.selectables.len();
            self.next += 1;
            Some((index, self.selectables[index]))
        }
    }
}

fn rand_usize() -> usize {
    use std::cell::Cell;
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    thread_local! {
        static STATE: Cell<u64> = Cell::new(RandomState::new().build_hasher().finish() | 1);
    }
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x as usize
    })
}

struct Witness<'a> {
    count: usize,
    identifier: Identifier,
    selectables: Enumerator<'a>,
}

impl Drop for Witness<'_> {
    fn drop(&mut self) {
        for (_, selectable) in self.selectables.clone().take(self.count) {
            if let Some(selectable) = selectable {
                selectable.unwatch_permit(&self.identifier);
            }
        }
    }
}

/// Select candidate to read and/or write value in blocking or nonblocking.
pub trait Select<'a> {
    /// Returns all selectable candidates.
    fn selectables(&'a self) -> &[Option<&'a dyn Selectable>];

    /// Tries to select a permit for consumption.
    ///
    /// # Safety
    /// The returned permit must be consumed, otherwise it leaks channel
    /// capacity.
    unsafe fn try_select(&'a self) -> Option<(usize, Permit)> {
        for (index, selectable) in Enumerator::new(self.selectables()) {
            if let Some(selectable) = selectable {
                if let Some(permit) = selectable.select_permit() {
                    return Some((index, permit));
                }
            }
        }
        None
    }

    /// Selects a permit for consumption, blocking until one clause is ready.
    ///
    /// # Safety
    /// The returned permit must be consumed, otherwise it leaks channel
    /// capacity.
    ///
    /// # Panics
    /// Panics when every clause is disabled.
    unsafe fn select(&'a self) -> (usize, Permit) {
        if let Some(selection) = self.try_select() {
            return selection;
        }
        let selectables = self.selectables();
        let (session, waker) = session::session();
        let core = Core::new(waker);
        let identifier = Core::identifier(&core);
        let enumerator = Enumerator::new(selectables);
        let mut checked = 0;
        let mut disabled = 0;
        for (index, selectable) in enumerator.clone() {
            match selectable {
                None => disabled += 1,
                Some(selectable) => {
                    let selector = Selector::new(index, core.clone());
                    if selectable.watch_permit(selector) && session.is_ready() {
                        break;
                    }
                },
            }
            checked += 1;
        }
        if disabled == selectables.len() {
            panic!("all select cases disabled with no `default`");
        }
        let witness = Witness { count: checked, identifier, selectables: enumerator };
        let selection = session.wait();
        drop(witness);
        selection
    }
}

impl<'a> Select<'a> for [Option<&'a dyn Selectable>] {
    fn selectables(&'a self) -> &[Option<&'a dyn Selectable>] {
        self
    }
}

/// [Select] candidate.
pub trait Selectable {
    /// Attempts to reserve a ready permit without blocking or watching.
    fn select_permit(&self) -> Option<Permit>;

    /// Watches for an available permit. Returns true if a permit was already
    /// available and has been applied to the selector.
    fn watch_permit(&self, selector: Selector) -> bool;

    /// Removes a previously watched selector.
    fn unwatch_permit(&self, identifier: &Identifier);
}

/// Writer that writes value with a previously selected permit.
pub trait PermitWriter: Selectable {
    type Item;
    type Result;

    /// Consumes the permit and writes given value. This operation must not
    /// block.
    fn consume_permit(&mut self, permit: Permit, value: Self::Item) -> Self::Result;
}

/// Reader that reads value with a previously selected permit.
pub trait PermitReader: Selectable {
    type Result;

    /// Consumes the permit and reads a value. This operation must not block.
    fn consume_permit(&mut self, permit: Permit) -> Self::Result;
}

impl<T> Selectable for &T
where
    T: Selectable,
{
    fn select_permit(&self) -> Option<Permit> {
        (**self).select_permit()
    }

    fn watch_permit(&self, selector: Selector) -> bool {
        (**self).watch_permit(selector)
    }

    fn unwatch_permit(&self, identifier: &Identifier) {
        (**self).unwatch_permit(identifier)
    }
}

impl<T> Selectable for &mut T
where
    T: Selectable,
{
    fn select_permit(&self) -> Option<Permit> {
        (**self).select_permit()
    }

    fn watch_permit(&self, selector: Selector) -> bool {
        (**self).watch_permit(selector)
    }

    fn unwatch_permit(&self, identifier: &Identifier) {
        (**self).unwatch_permit(identifier)
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::{ArrayChannel, Cause, RecvError, SendError, TryRecvError};
    use crate::select;

    #[test]
    fn select_closed() {
        let channel = ArrayChannel::<i32>::new(1);
        channel.close(None);
        let mut receiving = channel.on_recv();
        let mut sending = channel.on_send();
        select! {
            r = <-receiving => assert_eq!(r, None),
        }
        select! {
            r = sending<-2 => assert_eq!(r, Err(SendError::Closed(2, None))),
        }
    }

    #[test]
    fn select_ready() {
        let channel = ArrayChannel::new(1);
        channel.send(9).unwrap();
        let mut receiving = channel.on_recv();
        select! {
            r = <-receiving => assert_eq!(r, Some(9)),
        }
        assert!(channel.is_empty());
    }

    #[test]
    fn select_handover() {
        let channel = ArrayChannel::new(1);
        let mut sending = channel.on_send();
        let mut receiving = channel.on_recv();

        select! {
            _ = <-receiving => panic!("empty"),
            _ = sending<-1 => {},
        }

        select! {
            r = <-receiving => assert_eq!(r, Some(1)),
            _ = sending<-2 => panic!("full"),
        }
    }

    #[test]
    fn select_recv_catching_reports_cause() {
        let channel = ArrayChannel::<i32>::new(1);
        channel.cancel(Some(Cause::reason("boom")));
        let mut receiving = channel.on_recv_catching();
        select! {
            r = <-receiving => assert_eq!(r, Err(RecvError::Closed(Some(Cause::reason("boom"))))),
        }
    }

    #[test]
    #[should_panic(expected = "all select cases disabled with no `default`")]
    fn select_disabled() {
        let channel = ArrayChannel::<i32>::new(1);
        let mut receiving = channel.on_recv();
        select! {
            _ = <-receiving, if false => unreachable!("not enabled"),
        }
    }

    #[test]
    fn select_disabled_default() {
        let channel = ArrayChannel::<i32>::new(1);
        let mut receiving = channel.on_recv();
        select! {
            _ = <-receiving, if false => unreachable!("not enabled"),
            default => {},
        }
    }

    #[test]
    fn select_loop_default() {
        let channel = ArrayChannel::new(1);
        let mut sending = channel.on_send();
        let mut receiving = channel.on_recv();
        let mut sent = false;
        let mut received = false;
        loop {
            select! {
                _ = <-receiving => received = true,
                _ = sending<-1, if !sent => sent = true,
                default => {
                    assert!(sent);
                    assert!(received);
                    break;
                }
            }
        }
    }

    #[test]
    fn select_send_until_full() {
        let channel = ArrayChannel::new(2);
        let mut sending = channel.on_send();
        let mut sent = 0;
        loop {
            select! {
                r = sending<-2 => {
                    r.unwrap();
                    sent += 1;
                },
                default => break,
            }
        }
        assert_eq!(sent, 2);
        assert_eq!(channel.try_recv(), Ok(2));
        assert_eq!(channel.try_recv(), Ok(2));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn select_prefers_ready_clause() {
        let idle = ArrayChannel::<i32>::new(1);
        let ready = ArrayChannel::new(1);
        for i in 0..1000 {
            ready.send(i).unwrap();
            let mut recv_idle = idle.on_recv();
            let mut recv_ready = ready.on_recv();
            select! {
                _ = <-recv_idle => panic!("idle channel selected"),
                r = <-recv_ready => assert_eq!(r, Some(i)),
            }
            assert_eq!(idle.try_recv(), Err(TryRecvError::Empty));
            assert!(idle.is_empty());
        }
    }
}
