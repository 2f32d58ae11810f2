//! Channels transferring values from producers to consumers.
//!
//! [ArrayChannel] buffers up to a fixed capacity in FIFO order while
//! [ConflatedChannel] keeps only the latest unreceived value. Both are
//! cheaply cloneable handles over one shared channel, close explicitly with
//! an optional [Cause], and participate in [select!](crate::select!) through
//! their `on_send`, `on_recv` and `on_recv_catching` clauses.

mod array;
mod conflated;
mod core;
mod error;
mod list;
mod waiter;

pub use self::array::ArrayChannel;
pub use self::conflated::ConflatedChannel;
pub use self::core::{IntoIter, OnRecv, OnRecvCatching, OnSend};
pub use self::error::{
    Cause, RecvError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError,
};
