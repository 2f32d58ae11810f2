//! # Selectable in-process channels
//!
//! `chute` transfers values from producers to consumers through shared,
//! cheaply cloneable channel handles. Two channel shapes are provided:
//!
//! * [channel::ArrayChannel] buffers up to a fixed capacity and delivers in
//!   FIFO order. Producers block while the buffer is full, consumers block
//!   while it is empty.
//! * [channel::ConflatedChannel] keeps at most one value. Producers never
//!   block; every send overwrites the previous unreceived value.
//!
//! Channels close explicitly, optionally with a [channel::Cause] that is
//! surfaced to both peers, and can be cancelled to additionally discard
//! buffered values. The [select!] macro waits on several send and receive
//! clauses simultaneously and runs exactly one of them.
//!
//! ## Example
//! ```rust
//! use std::thread;
//!
//! use chute::channel::ArrayChannel;
//!
//! let channel = ArrayChannel::new(2);
//! let producer = channel.clone();
//! thread::spawn(move || {
//!     for value in 1..=3 {
//!         producer.send(value).unwrap();
//!     }
//!     producer.close(None);
//! });
//!
//! let received: Vec<i32> = channel.into_iter().collect();
//! assert_eq!(received, vec![1, 2, 3]);
//! ```
//!
//! ## Select
//! ```rust
//! use chute::channel::ArrayChannel;
//! use chute::select;
//!
//! let numbers = ArrayChannel::<i32>::new(1);
//! let words = ArrayChannel::new(1);
//! words.send("ready").unwrap();
//!
//! let mut recv_number = numbers.on_recv();
//! let mut recv_word = words.on_recv();
//! select! {
//!     _ = <-recv_number => unreachable!("nothing sent"),
//!     word = <-recv_word => assert_eq!(word, Some("ready")),
//! }
//! ```

pub mod channel;
pub mod select;
mod select_macro;
mod session;
