//! # bytefifo - fixed-capacity byte FIFO
//!
//! A single-producer, single-consumer byte ring buffer for embedded and
//! resource-constrained code. The buffer never allocates: it borrows a
//! caller-owned storage region for its whole lifetime.
//!
//! ## Design
//!
//! - Capacity must be a power of two; physical offsets are `cursor & (capacity - 1)`
//! - Write/read cursors only ever increase, so `used = write - read` with no
//!   empty/full ambiguity
//! - Bulk `push`/`pull` copy at most two contiguous segments per call
//! - Partial transfers are normal: the returned count is what actually moved
//! - An atomic access state serializes push/pull; a caller that loses the race
//!   gets [`PushError::Busy`] / [`PullError::Busy`] instead of corrupted cursors
//!
//! ## Features
//!
//! - `std` (default): implements `std::error::Error` for the error types.
//!   Without it the crate is `no_std`.
//! - `log`: emits `log::trace!` records for init and every push/pull.
//!
//! ## Example
//!
//! ```
//! use bytefifo::{PullError, RingBuffer};
//!
//! let mut storage = [0u8; 64];
//! let fifo = RingBuffer::init(64, &mut storage).unwrap();
//!
//! // Producer: only what fits is accepted
//! let written = fifo.push_slice(b"hello world").unwrap();
//! assert_eq!(written, 11);
//!
//! // Consumer: drain in whatever chunk size suits the framing
//! let mut out = [0u8; 5];
//! assert_eq!(fifo.pull_slice(&mut out), Ok(5));
//! assert_eq!(&out, b"hello");
//! assert_eq!(fifo.used_size(), 6);
//!
//! let mut rest = [0u8; 16];
//! assert_eq!(fifo.pull_slice(&mut rest), Ok(6));
//! assert_eq!(fifo.pull_slice(&mut rest), Err(PullError::Empty));
//! ```

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![warn(missing_docs)]

/// Trace hook mirroring init and transfer outcomes; compiles to nothing
/// unless the `log` feature is enabled.
macro_rules! fifo_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            log::trace!($($arg)*);
        }
    }};
}

mod ring_buffer;

pub use ring_buffer::{AccessState, InitError, PullError, PushError, RingBuffer};
