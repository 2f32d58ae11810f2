//! Intrusive doubly linked list of queued waiters.
//!
//! Nodes are shared between the list and the operation that enqueued them so
//! an abandoning caller can unlink its own node in O(1). Link cells are only
//! touched through `&mut WaiterList`, which the channel engine derives from
//! its state lock; waiter payloads arbitrate claim and cancel through their
//! own atomic state (see [waiter](super::waiter)).

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Arc;

pub(crate) struct Node<W> {
    waiter: W,
    linked: Cell<bool>,
    prev: Cell<Option<NonNull<Node<W>>>>,
    next: Cell<Option<NonNull<Node<W>>>>,
}

// SAFETY: link cells are only accessed under the owning channel lock.
unsafe impl<W: Send> Send for Node<W> {}
unsafe impl<W: Sync> Sync for Node<W> {}

impl<W> Node<W> {
    pub fn new(waiter: W) -> Arc<Node<W>> {
        Arc::new(Node { waiter, linked: Cell::new(false), prev: Cell::new(None), next: Cell::new(None) })
    }

    pub fn waiter(&self) -> &W {
        &self.waiter
    }
}

pub(crate) struct WaiterList<W> {
    head: Option<NonNull<Node<W>>>,
    tail: Option<NonNull<Node<W>>>,
}

impl<W> WaiterList<W> {
    pub const fn new() -> Self {
        WaiterList { head: None, tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends the node. The list keeps one reference until the node is
    /// unlinked again.
    pub fn push_back(&mut self, node: Arc<Node<W>>) {
        let ptr = Self::into_ptr(node);
        unsafe {
            let node = ptr.as_ref();
            node.linked.set(true);
            node.prev.set(self.tail);
            node.next.set(None);
        }
        match self.tail {
            Some(tail) => unsafe { tail.as_ref().next.set(Some(ptr)) },
            None => self.head = Some(ptr),
        }
        self.tail = Some(ptr);
    }

    /// Prepends the node; used to put back a waiter that cannot be served
    /// yet without losing its queue position.
    pub fn push_front(&mut self, node: Arc<Node<W>>) {
        let ptr = Self::into_ptr(node);
        unsafe {
            let node = ptr.as_ref();
            node.linked.set(true);
            node.prev.set(None);
            node.next.set(self.head);
        }
        match self.head {
            Some(head) => unsafe { head.as_ref().prev.set(Some(ptr)) },
            None => self.tail = Some(ptr),
        }
        self.head = Some(ptr);
    }

    pub fn pop_front(&mut self) -> Option<Arc<Node<W>>> {
        let head = self.head?;
        Some(self.unlink(head))
    }

    /// Unlinks the given node if it is still queued. Idempotent.
    pub fn remove(&mut self, node: &Node<W>) -> bool {
        if !node.linked.get() {
            return false;
        }
        let ptr = NonNull::from(node);
        drop(self.unlink(ptr));
        true
    }

    /// Unlinks and returns the first node whose waiter matches the predicate.
    pub fn remove_first(&mut self, mut pred: impl FnMut(&W) -> bool) -> Option<Arc<Node<W>>> {
        let mut cursor = self.head;
        while let Some(ptr) = cursor {
            let node = unsafe { ptr.as_ref() };
            if pred(&node.waiter) {
                return Some(self.unlink(ptr));
            }
            cursor = node.next.get();
        }
        None
    }

    fn into_ptr(node: Arc<Node<W>>) -> NonNull<Node<W>> {
        unsafe { NonNull::new_unchecked(Arc::into_raw(node) as *mut Node<W>) }
    }

    fn unlink(&mut self, ptr: NonNull<Node<W>>) -> Arc<Node<W>> {
        let (prev, next) = unsafe {
            let node = ptr.as_ref();
            debug_assert!(node.linked.get());
            node.linked.set(false);
            let links = (node.prev.get(), node.next.get());
            node.prev.set(None);
            node.next.set(None);
            links
        };
        match prev {
            Some(prev) => unsafe { prev.as_ref().next.set(next) },
            None => self.head = next,
        }
        match next {
            Some(next) => unsafe { next.as_ref().prev.set(prev) },
            None => self.tail = prev,
        }
        unsafe { Arc::from_raw(ptr.as_ptr()) }
    }
}

impl<W> Drop for WaiterList<W> {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut list = WaiterList::new();
        assert!(list.is_empty());
        list.push_back(Node::new(1));
        list.push_back(Node::new(2));
        list.push_back(Node::new(3));
        assert!(!list.is_empty());
        assert_eq!(*list.pop_front().unwrap().waiter(), 1);
        assert_eq!(*list.pop_front().unwrap().waiter(), 2);
        assert_eq!(*list.pop_front().unwrap().waiter(), 3);
        assert!(list.pop_front().is_none());
    }

    #[test]
    fn remove_unlinks_once() {
        let mut list = WaiterList::new();
        let second = Node::new(2);
        list.push_back(Node::new(1));
        list.push_back(second.clone());
        list.push_back(Node::new(3));
        assert!(list.remove(&second));
        assert!(!list.remove(&second));
        assert_eq!(*list.pop_front().unwrap().waiter(), 1);
        assert_eq!(*list.pop_front().unwrap().waiter(), 3);
        assert!(list.pop_front().is_none());
    }

    #[test]
    fn remove_first_matches_predicate() {
        let mut list = WaiterList::new();
        list.push_back(Node::new(1));
        list.push_back(Node::new(2));
        list.push_back(Node::new(3));
        assert_eq!(*list.remove_first(|w| *w == 2).unwrap().waiter(), 2);
        assert!(list.remove_first(|w| *w == 9).is_none());
        assert_eq!(*list.pop_front().unwrap().waiter(), 1);
        assert_eq!(*list.pop_front().unwrap().waiter(), 3);
    }

    #[test]
    fn push_front_restores_head() {
        let mut list = WaiterList::new();
        list.push_back(Node::new(2));
        list.push_front(Node::new(1));
        assert_eq!(*list.pop_front().unwrap().waiter(), 1);
        assert_eq!(*list.pop_front().unwrap().waiter(), 2);
    }
}
