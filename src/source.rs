// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Contracts for the camera driver stack consumed by the acquisition loops.
//!
//! The driver owns every frame buffer. A loop sees a buffer only through a
//! [`ScopedBuffer`], which borrows the request it came from and hands the
//! memory back to the driver exactly once when dropped. Anything that must
//! outlive the scope is copied into a [`crate::image::MaterializedImage`].

use crate::{
    error::DeviceError,
    event::{Metadata, NotificationEvent, StreamFlags, StreamId, StreamLayout},
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::warn;

/// Read access to one stream's buffer, valid only while the guard lives.
///
/// The slice returned by [`ScopedBuffer::as_slice`] borrows the guard, so it
/// cannot be kept past the scope. The release hook runs on drop, including
/// early returns and unwinding.
pub struct ScopedBuffer<'a> {
    data: &'a [u8],
    release: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> ScopedBuffer<'a> {
    /// Guard with nothing to release.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            release: None,
        }
    }

    /// Guard that calls `release` once when the scope ends.
    pub fn with_release(data: &'a [u8], release: impl FnOnce() + 'a) -> Self {
        Self {
            data,
            release: Some(Box::new(release)),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for ScopedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ScopedBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ScopedBuffer")
            .field("len", &self.data.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Buffer Access Service: scoped read access to a completed request's
/// stream buffers.
pub trait BufferAccess {
    /// Returns `None` when the request carries no buffer for `stream`.
    fn acquire_scoped_read(&self, stream: StreamId) -> Option<ScopedBuffer<'_>>;
}

/// Payload of a `FrameReady` event.
pub trait FrameRequest: BufferAccess {
    fn metadata(&self) -> &Metadata;

    /// Sensor timestamp in microseconds.
    fn timestamp_us(&self) -> i64;
}

/// The camera driver stack: pipeline control plus the blocking event queue.
///
/// A loop that owns a source is its only caller; implementations need not
/// guard against concurrent control calls.
pub trait NotificationSource {
    type Request: FrameRequest;

    fn open(&mut self) -> Result<(), DeviceError>;

    fn configure(&mut self, streams: StreamFlags) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Blocks until the next event. This is the only suspension point of the
    /// acquisition loops.
    fn wait(&mut self) -> NotificationEvent<Self::Request>;

    /// Layout of a configured stream, `None` if it was not configured.
    fn stream_info(&self, stream: StreamId) -> Option<StreamLayout>;

    fn viewfinder_stream_present(&self) -> bool {
        self.stream_info(StreamId::Viewfinder).is_some()
    }

    fn still_stream_present(&self) -> bool {
        self.stream_info(StreamId::Still).is_some()
    }
}

/// Stops and restarts capture after a timeout. Encoding is left alone.
pub(crate) fn restart_capture<S: NotificationSource>(source: &mut S) -> Result<(), DeviceError> {
    if let Err(e) = source.stop() {
        warn!("stop before capture restart failed: {e}");
    }
    source.start()
}

/// Stops capture on a teardown path where the run result is already decided.
pub(crate) fn stop_quietly<S: NotificationSource>(source: &mut S) {
    if let Err(e) = source.stop() {
        warn!("camera stop failed: {e}");
    }
}

/// Cooperative cancellation token checked once at the head of every loop
/// iteration.
///
/// Clones share the same flag. Clearing it does not interrupt a pending
/// `wait`; the loop observes it on its next iteration.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        RunFlag(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic time source used to measure how long a state has been current.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn scoped_buffer_releases_once_on_drop() {
        let released = Cell::new(0);
        let data = [1u8, 2, 3];
        {
            let guard = ScopedBuffer::with_release(&data, || released.set(released.get() + 1));
            assert_eq!(guard.as_slice(), &[1, 2, 3]);
            assert_eq!(released.get(), 0);
        }
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn scoped_buffer_releases_on_early_return() {
        fn first_byte(guard: ScopedBuffer<'_>) -> Option<u8> {
            let b = *guard.as_slice().first()?;
            if b > 0 {
                return Some(b);
            }
            None
        }

        let released = Cell::new(0);
        let data = [9u8];
        let guard = ScopedBuffer::with_release(&data, || released.set(released.get() + 1));
        assert_eq!(first_byte(guard), Some(9));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn run_flag_clones_share_state() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(other.is_running());
        flag.shutdown();
        assert!(!other.is_running());
    }
}
