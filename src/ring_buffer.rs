use core::cell::UnsafeCell;
use core::fmt;

#[cfg(not(loom))]
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Reasons a buffer cannot be initialized over the given storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Capacity is zero or not a power of two
    InvalidCapacity,
    /// Storage region is shorter than the requested capacity
    StorageTooSmall,
}

/// Reasons a push was rejected without copying anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Another push or pull holds the buffer; retry later
    Busy,
    /// Source slice does not cover the requested length
    NullSource,
    /// No free space left
    Full,
}

/// Reasons a pull was rejected without copying anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullError {
    /// Another push or pull holds the buffer; retry later
    Busy,
    /// Destination slice cannot hold the requested length
    NullDest,
    /// No buffered data
    Empty,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity => f.write_str("capacity must be a non-zero power of two"),
            Self::StorageTooSmall => f.write_str("storage is shorter than the requested capacity"),
        }
    }
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("buffer is busy with another operation"),
            Self::NullSource => f.write_str("source does not cover the requested length"),
            Self::Full => f.write_str("buffer is full"),
        }
    }
}

impl fmt::Display for PullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("buffer is busy with another operation"),
            Self::NullDest => f.write_str("destination cannot hold the requested length"),
            Self::Empty => f.write_str("buffer is empty"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InitError {}

#[cfg(feature = "std")]
impl std::error::Error for PushError {}

#[cfg(feature = "std")]
impl std::error::Error for PullError {}

/// Access state guarding the cursors and storage
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    /// No push or pull in progress
    Unlocked = 0,
    /// A push or pull is copying bytes
    Locked = 1,
}

impl AccessState {
    fn from_raw(raw: u8) -> Self {
        if raw == AccessState::Locked as u8 {
            AccessState::Locked
        } else {
            AccessState::Unlocked
        }
    }
}

/// Fixed-capacity byte FIFO over caller-owned storage
///
/// - Single producer, single consumer
/// - Capacity is a power of two, fixed at init
/// - Never allocates; storage is borrowed for the buffer's lifetime
///
/// # Invariants
/// - `write_cursor - read_cursor <= capacity` (wrapping `u32` subtraction)
/// - Both cursors only move forward; the physical offset of a cursor is
///   `cursor & mask`
/// - Storage is only touched while `state` is [`AccessState::Locked`], and only
///   by the operation that moved it there
pub struct RingBuffer<'a> {
    /// Caller region; only the first `capacity` bytes are used
    storage: UnsafeCell<&'a mut [u8]>,
    capacity: u32,
    /// `capacity - 1`
    mask: u32,
    /// Total bytes ever pushed
    write_cursor: AtomicU32,
    /// Total bytes ever pulled
    read_cursor: AtomicU32,
    state: AtomicU8,
}

// Safety: storage is reached only through an `AccessGuard`, and at most one
// guard exists at a time (acquired by compare-exchange on `state`).
unsafe impl Sync for RingBuffer<'_> {}

impl fmt::Debug for RingBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("write_cursor", &self.write_cursor.load(Ordering::Relaxed))
            .field("read_cursor", &self.read_cursor.load(Ordering::Relaxed))
            .field("state", &self.access_state())
            .finish()
    }
}

/// Exclusive access to the storage for the duration of one push or pull.
/// Dropping it returns the buffer to [`AccessState::Unlocked`].
struct AccessGuard<'g, 'a> {
    fifo: &'g RingBuffer<'a>,
}

impl AccessGuard<'_, '_> {
    fn storage(&mut self) -> &mut [u8] {
        let capacity = self.fifo.capacity as usize;
        // Safety: the guard is unique (see `RingBuffer::try_lock`), so no other
        // reference into the storage exists while it is alive.
        let storage = unsafe { &mut **self.fifo.storage.get() };
        &mut storage[..capacity]
    }
}

impl Drop for AccessGuard<'_, '_> {
    fn drop(&mut self) {
        self.fifo
            .state
            .store(AccessState::Unlocked as u8, Ordering::Release);
    }
}

impl<'a> RingBuffer<'a> {
    /// Initialize a buffer of `capacity` bytes over `storage`
    ///
    /// # Arguments
    /// * `capacity` - Buffer size in bytes, a non-zero power of two
    /// * `storage` - Backing region of at least `capacity` bytes
    ///
    /// # Returns
    /// * `Ok(RingBuffer)` empty and unlocked
    /// * `Err(InitError::InvalidCapacity)` if capacity is 0 or not a power of two
    /// * `Err(InitError::StorageTooSmall)` if `storage` is shorter than `capacity`
    ///
    /// Storage bytes are not cleared.
    pub fn init(capacity: u32, storage: &'a mut [u8]) -> Result<Self, InitError> {
        if !capacity.is_power_of_two() {
            fifo_trace!("fifo init failed: capacity {} is not a power of two", capacity);
            return Err(InitError::InvalidCapacity);
        }

        let storage_len = u32::try_from(storage.len()).unwrap_or(u32::MAX);
        if storage_len < capacity {
            fifo_trace!(
                "fifo init failed: storage of {} bytes < capacity {}",
                storage_len,
                capacity
            );
            return Err(InitError::StorageTooSmall);
        }

        fifo_trace!("fifo init success, capacity {}", capacity);

        Ok(RingBuffer {
            storage: UnsafeCell::new(storage),
            capacity,
            mask: capacity - 1,
            write_cursor: AtomicU32::new(0),
            read_cursor: AtomicU32::new(0),
            state: AtomicU8::new(AccessState::Unlocked as u8),
        })
    }

    /// Initialize a buffer that uses the whole of `storage`
    ///
    /// `storage.len()` must be a power of two that fits in `u32`.
    pub fn from_slice(storage: &'a mut [u8]) -> Result<Self, InitError> {
        let capacity = u32::try_from(storage.len()).map_err(|_| InitError::InvalidCapacity)?;
        Self::init(capacity, storage)
    }

    /// Get the capacity in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of buffered bytes
    ///
    /// Exact when no push or pull is running concurrently; otherwise a
    /// snapshot that still lies within `0..=capacity`.
    pub fn used_size(&self) -> u32 {
        // Read first: a newer write cursor can only make the result larger.
        let read = self.read_cursor.load(Ordering::Acquire);
        let write = self.write_cursor.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity)
    }

    /// Number of bytes that can still be pushed
    pub fn remaining_size(&self) -> u32 {
        self.capacity - self.used_size()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.used_size() == 0
    }

    /// True when no space is left
    pub fn is_full(&self) -> bool {
        self.used_size() == self.capacity
    }

    /// Current access state
    pub fn access_state(&self) -> AccessState {
        AccessState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Copy up to `len` bytes from the start of `src` into the buffer
    ///
    /// Only `min(len, remaining_size())` bytes are taken; the rest of `src` is
    /// left to the caller to retry.
    ///
    /// # Returns
    /// * `Ok(n)` - number of bytes actually written
    /// * `Err(PushError::NullSource)` if `src` is shorter than `len`
    /// * `Err(PushError::Busy)` if another push or pull is in progress
    /// * `Err(PushError::Full)` if there is no free space
    pub fn push(&self, src: &[u8], len: u32) -> Result<u32, PushError> {
        if (src.len() as u64) < u64::from(len) {
            fifo_trace!("push failed: source of {} bytes < len {}", src.len(), len);
            return Err(PushError::NullSource);
        }

        let Some(mut guard) = self.try_lock() else {
            fifo_trace!("push failed: busy");
            return Err(PushError::Busy);
        };

        // The guard's acquire orders these after the previous holder's stores.
        let write = self.write_cursor.load(Ordering::Relaxed);
        let read = self.read_cursor.load(Ordering::Relaxed);
        let used = write.wrapping_sub(read);
        if used == self.capacity {
            fifo_trace!("push failed: full");
            return Err(PushError::Full);
        }

        let push_len = (self.capacity - used).min(len);
        let n = push_len as usize;
        let offset = self.offset(write);
        let first = n.min(self.capacity as usize - offset);

        let storage = guard.storage();
        storage[offset..offset + first].copy_from_slice(&src[..first]);
        storage[..n - first].copy_from_slice(&src[first..n]);

        self.write_cursor
            .store(write.wrapping_add(push_len), Ordering::Release);
        drop(guard);

        fifo_trace!("ready to push {} bytes, pushed {}", len, push_len);
        Ok(push_len)
    }

    /// Push as much of `src` as fits
    pub fn push_slice(&self, src: &[u8]) -> Result<u32, PushError> {
        let len = u32::try_from(src.len()).unwrap_or(u32::MAX);
        self.push(src, len)
    }

    /// Move up to `len` buffered bytes into the start of `dst`
    ///
    /// Pulled bytes stay in storage but are behind the read cursor and can no
    /// longer be observed.
    ///
    /// # Returns
    /// * `Ok(n)` - number of bytes actually read
    /// * `Err(PullError::NullDest)` if `dst` is shorter than `len`
    /// * `Err(PullError::Busy)` if another push or pull is in progress
    /// * `Err(PullError::Empty)` if nothing is buffered
    pub fn pull(&self, dst: &mut [u8], len: u32) -> Result<u32, PullError> {
        if (dst.len() as u64) < u64::from(len) {
            fifo_trace!("pull failed: destination of {} bytes < len {}", dst.len(), len);
            return Err(PullError::NullDest);
        }

        let Some(mut guard) = self.try_lock() else {
            fifo_trace!("pull failed: busy");
            return Err(PullError::Busy);
        };

        let write = self.write_cursor.load(Ordering::Relaxed);
        let read = self.read_cursor.load(Ordering::Relaxed);
        let used = write.wrapping_sub(read);
        if used == 0 {
            fifo_trace!("pull failed: empty");
            return Err(PullError::Empty);
        }

        let pull_len = used.min(len);
        let n = pull_len as usize;
        let offset = self.offset(read);
        let first = n.min(self.capacity as usize - offset);

        let storage = guard.storage();
        dst[..first].copy_from_slice(&storage[offset..offset + first]);
        dst[first..n].copy_from_slice(&storage[..n - first]);

        self.read_cursor
            .store(read.wrapping_add(pull_len), Ordering::Release);
        drop(guard);

        fifo_trace!("ready to pull {} bytes, pulled {}", len, pull_len);
        Ok(pull_len)
    }

    /// Pull as many bytes as `dst` can hold
    pub fn pull_slice(&self, dst: &mut [u8]) -> Result<u32, PullError> {
        let len = u32::try_from(dst.len()).unwrap_or(u32::MAX);
        self.pull(dst, len)
    }

    /// Discard all buffered bytes without clearing storage
    pub fn reset(&mut self) {
        self.write_cursor.store(0, Ordering::Relaxed);
        self.read_cursor.store(0, Ordering::Relaxed);
        self.state
            .store(AccessState::Unlocked as u8, Ordering::Relaxed);
    }

    /// End the buffer and hand the whole storage region back to the caller
    pub fn into_storage(self) -> &'a mut [u8] {
        self.storage.into_inner()
    }

    /// Physical storage offset of a logical cursor
    #[inline]
    fn offset(&self, cursor: u32) -> usize {
        (cursor & self.mask) as usize
    }

    fn try_lock(&self) -> Option<AccessGuard<'_, 'a>> {
        self.state
            .compare_exchange(
                AccessState::Unlocked as u8,
                AccessState::Locked as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| AccessGuard { fifo: self })
    }
}



// Run with: RUSTFLAGS="--cfg loom" cargo test --release --lib loom
#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;
    use std::sync::Arc;

    /// Run `f` against a fresh buffer of `capacity` bytes, then free its
    /// storage once every clone of the handle has been dropped.
    fn with_fifo(capacity: usize, f: impl FnOnce(&Arc<RingBuffer<'static>>)) {
        let storage: &'static mut [u8] = Box::leak(vec![0u8; capacity].into_boxed_slice());
        let fifo = Arc::new(RingBuffer::from_slice(storage).unwrap());
        f(&fifo);

        let fifo = Arc::try_unwrap(fifo).expect("all threads joined");
        let storage: *mut [u8] = fifo.into_storage();
        // Safety: `storage` came from `Box::leak` above and nothing borrows it now.
        drop(unsafe { Box::from_raw(storage) });
    }

    /// A racing push and pull each see the other either fully or not at all,
    /// and the bytes come out in push order.
    #[test]
    fn loom_push_pull_order() {
        loom::model(|| {
            with_fifo(4, |fifo| {
                let fifo_p = fifo.clone();
                let fifo_c = fifo.clone();

                let producer = thread::spawn(move || fifo_p.push_slice(&[1, 2]));
                let consumer = thread::spawn(move || {
                    let mut buf = [0u8; 4];
                    match fifo_c.pull_slice(&mut buf) {
                        Ok(n) => buf[..n as usize].to_vec(),
                        Err(PullError::Busy) | Err(PullError::Empty) => Vec::new(),
                        Err(e) => panic!("Unexpected error: {:?}", e),
                    }
                });

                let pushed = producer.join().unwrap();
                let mut received = consumer.join().unwrap();

                // The whole 2-byte push lands under one guard, so a pull
                // never observes half of it.
                assert!(received.is_empty() || received == [1, 2]);

                let mut rest = [0u8; 4];
                match fifo.pull_slice(&mut rest) {
                    Ok(n) => received.extend_from_slice(&rest[..n as usize]),
                    Err(e) => assert_eq!(e, PullError::Empty),
                }

                match pushed {
                    Ok(n) => {
                        assert_eq!(n, 2);
                        assert_eq!(received, vec![1, 2]);
                    }
                    Err(e) => {
                        assert_eq!(e, PushError::Busy);
                        assert!(received.is_empty());
                    }
                }
                assert!(fifo.is_empty());
                assert_eq!(fifo.access_state(), AccessState::Unlocked);
            });
        });
    }

    /// Two concurrent pushes never both hold the guard.
    #[test]
    fn loom_concurrent_push_exclusive() {
        loom::model(|| {
            with_fifo(4, |fifo| {
                let other = fifo.clone();

                let t = thread::spawn(move || other.push_slice(&[7, 7]));
                let mine = fifo.push_slice(&[9, 9]);
                let theirs = t.join().unwrap();

                let pushed: u32 = [mine, theirs]
                    .iter()
                    .map(|r| match r {
                        Ok(n) => *n,
                        Err(PushError::Busy) => 0,
                        Err(e) => panic!("Unexpected error: {:?}", e),
                    })
                    .sum();
                assert_eq!(fifo.used_size(), pushed);
                assert_eq!(fifo.access_state(), AccessState::Unlocked);
            });
        });
    }
}
