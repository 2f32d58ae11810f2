//! One shot wait and wake pair used to suspend channel participants.
//!
//! A [Session] parks the calling thread until its [SessionWaker] publishes a
//! value. Publication is a small status machine where the least significant
//! bit flags that the accompanying cell write has completed, so a contender
//! observing a transition in progress spins until the cell is released
//! instead of reading a torn slot.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Instant;

use num_enum::{IntoPrimitive, UnsafeFromPrimitive};
use static_assertions::assert_impl_all;

// Least bit used as release flag.
#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, UnsafeFromPrimitive)]
enum Status {
    Empty = 0b000,
    Value = 0b010,
    Joining = 0b100,
    Joined = 0b110,
}

impl Status {
    fn into_release(self) -> usize {
        let bits: usize = self.into();
        bits | 0b001
    }

    fn from_bits(bits: usize) -> Status {
        unsafe { Status::from_unchecked(bits & !0b001) }
    }

    fn is_released(bits: usize) -> bool {
        bits & 0b001 != 0
    }
}

struct Joint<T> {
    status: AtomicUsize,
    value: UnsafeCell<Option<T>>,
    waiter: UnsafeCell<Option<Thread>>,
}

// SAFETY: cells are published and claimed through status transitions carrying
// the release bit, so at most one side touches a cell at a time.
unsafe impl<T: Send> Send for Joint<T> {}
unsafe impl<T: Send> Sync for Joint<T> {}

impl<T> Joint<T> {
    fn new() -> Arc<Joint<T>> {
        Arc::new(Joint {
            status: AtomicUsize::new(Status::Empty.into()),
            value: UnsafeCell::new(None),
            waiter: UnsafeCell::new(None),
        })
    }

    fn is_ready(&self) -> bool {
        Status::from_bits(self.status.load(Ordering::Relaxed)) == Status::Value
    }

    fn wake(&self, value: T) {
        let mut bits = self.status.load(Ordering::Relaxed);
        if Status::from_bits(bits) == Status::Empty {
            match self.status.compare_exchange(
                Status::Empty.into(),
                Status::Value.into(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    unsafe { *self.value.get() = Some(value) };
                    self.status.store(Status::Value.into_release(), Ordering::Release);
                    return;
                },
                Err(actual) => bits = actual,
            }
        }
        loop {
            if Status::from_bits(bits) != Status::Joining {
                // The session gave up past its deadline and nobody will wait
                // again; the value has nowhere to go.
                return;
            }
            if !Status::is_released(bits) {
                std::hint::spin_loop();
                bits = self.status.load(Ordering::Relaxed);
                continue;
            }
            match self.status.compare_exchange_weak(bits, Status::Value.into(), Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => {
                    let waiter = unsafe { (*self.waiter.get()).take() };
                    unsafe { *self.value.get() = Some(value) };
                    self.status.store(Status::Value.into_release(), Ordering::Release);
                    if let Some(thread) = waiter {
                        thread.unpark();
                    }
                    return;
                },
                Err(actual) => bits = actual,
            }
        }
    }

    fn wait_value(&self, deadline: Option<Instant>) -> Option<T> {
        let mut bits = self.status.load(Ordering::Relaxed);
        if Status::from_bits(bits) == Status::Empty {
            match self.status.compare_exchange(
                Status::Empty.into(),
                Status::Joining.into(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    unsafe { *self.waiter.get() = Some(thread::current()) };
                    self.status.store(Status::Joining.into_release(), Ordering::Release);
                    bits = Status::Joining.into_release();
                },
                Err(actual) => bits = actual,
            }
        }
        loop {
            match Status::from_bits(bits) {
                Status::Joining => {
                    match deadline {
                        None => thread::park(),
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return None;
                            }
                            thread::park_timeout(deadline - now);
                        },
                    }
                    bits = self.status.load(Ordering::Relaxed);
                },
                Status::Value => {
                    if !Status::is_released(bits) {
                        std::hint::spin_loop();
                        bits = self.status.load(Ordering::Relaxed);
                        continue;
                    }
                    match self.status.compare_exchange_weak(
                        bits,
                        Status::Joined.into_release(),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return unsafe { (*self.value.get()).take() },
                        Err(actual) => bits = actual,
                    }
                },
                Status::Empty | Status::Joined => unreachable!("session waited after completion"),
            }
        }
    }
}

/// Waiting half of a [session] pair; parks the owning thread until waked.
pub(crate) struct Session<T> {
    joint: Arc<Joint<T>>,
}

/// Waking half of a [session] pair; hands a value to the waiting thread.
pub(crate) struct SessionWaker<T> {
    joint: Arc<Joint<T>>,
}

assert_impl_all!(Session<()>: Send);
assert_impl_all!(SessionWaker<()>: Send);

impl<T> Session<T> {
    /// Checks whether a value has been published already.
    pub fn is_ready(&self) -> bool {
        self.joint.is_ready()
    }

    /// Blocks until waked.
    pub fn wait(self) -> T {
        match self.joint.wait_value(None) {
            Some(value) => value,
            None => unreachable!("wait without deadline returned empty"),
        }
    }

    /// Blocks until waked or the deadline passes, whichever happens first.
    /// After a deadline miss the session stays usable: a racing wake can
    /// still be collected with [Session::wait].
    pub fn wait_until(&self, deadline: Instant) -> Option<T> {
        self.joint.wait_value(Some(deadline))
    }
}

impl<T> SessionWaker<T> {
    /// Publishes the value and unparks the waiting thread.
    pub fn wake(self, value: T) {
        self.joint.wake(value);
    }
}

/// Constructs facilities to suspend the calling thread until waked from
/// another thread. The waker must be used at most once.
pub(crate) fn session<T>() -> (Session<T>, SessionWaker<T>) {
    let joint = Joint::new();
    (Session { joint: joint.clone() }, SessionWaker { joint })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use more_asserts::assert_ge;

    use super::*;

    #[test]
    fn wake_before_wait() {
        let (session, waker) = session();
        waker.wake(5);
        assert!(session.is_ready());
        assert_eq!(session.wait(), 5);
    }

    #[test]
    fn wait_before_wake() {
        let (session, waker) = session();
        let waking = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            waker.wake(7);
        });
        assert_eq!(session.wait(), 7);
        waking.join().unwrap();
    }

    #[test]
    fn wait_until_deadline() {
        let (session, waker) = session::<i32>();
        let now = Instant::now();
        assert_eq!(session.wait_until(now + Duration::from_millis(100)), None);
        assert_ge!(now.elapsed(), Duration::from_millis(100));
        waker.wake(3);
        assert_eq!(session.wait(), 3);
    }
}
