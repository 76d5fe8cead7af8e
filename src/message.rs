//! Streaming per-message buffer shared between the receive pipeline and a
//! consumer.
//!
//! Each inbound logical message gets one writer/reader pair over a pooled,
//! append-only byte buffer. The writer appends WebSocket frames as they
//! arrive; the reader consumes concurrently, so header classification starts
//! before the body has fully landed. A bounded notification channel carries
//! one notice per appended frame: notices are pure wakeups (the reader
//! always re-checks shared state), so a stale notice left in a recycled
//! channel is harmless. The bound doubles as per-message backpressure on
//! frames appended but not yet observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pool::{PooledBuf, PooledChannel, Pools};

/// Wakeup sent after each appended frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameNotice {
    /// Bytes the frame added.
    pub len: usize,
    /// Whether the frame completed the message.
    pub end_of_message: bool,
}

/// The reader half was dropped; remaining frames should be drained, not
/// buffered.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("message reader dropped before the message completed")]
pub struct MessageAbandoned;

struct Cursor {
    buf: PooledBuf,
    pos: usize,
}

struct Shared {
    // held only across memcpy, never across an await
    cursor: Mutex<Cursor>,
    end_of_message: AtomicBool,
    writer_gone: AtomicBool,
    // cancelled when the reader is dropped; lets a writer blocked on a full
    // notice channel observe abandonment instead of waiting forever
    abandoned: CancellationToken,
}

fn lock(mutex: &Mutex<Cursor>) -> MutexGuard<'_, Cursor> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a writer/reader pair backed by pooled storage.
///
/// `frame_capacity` bounds unobserved appended frames; `initial_capacity`
/// sizes the rented buffer.
#[must_use]
pub fn channel(
    pools: &Pools,
    frame_capacity: usize,
    initial_capacity: usize,
) -> (MessageWriter, MessageReader) {
    let shared = Arc::new(Shared {
        cursor: Mutex::new(Cursor {
            buf: pools.buffers.rent(initial_capacity),
            pos: 0,
        }),
        end_of_message: AtomicBool::new(false),
        writer_gone: AtomicBool::new(false),
        abandoned: CancellationToken::new(),
    });
    let notices = pools.channels.rent(frame_capacity);
    let writer = MessageWriter {
        shared: Arc::clone(&shared),
        notices: notices.sender(),
    };
    let reader = MessageReader {
        shared,
        notices,
    };
    (writer, reader)
}

/// Producing half: appends frames as they arrive off the socket.
pub struct MessageWriter {
    shared: Arc<Shared>,
    notices: mpsc::Sender<FrameNotice>,
}

impl MessageWriter {
    /// Append one frame and wake the reader.
    ///
    /// Suspends when `frame_capacity` notices are outstanding, stalling the
    /// receive loop until the reader catches up.
    ///
    /// # Errors
    ///
    /// [`MessageAbandoned`] when the reader has been dropped; the caller
    /// drains the rest of the message without buffering it.
    pub async fn append(&self, frame: &[u8], end_of_message: bool) -> Result<(), MessageAbandoned> {
        if self.shared.abandoned.is_cancelled() {
            return Err(MessageAbandoned);
        }
        {
            let mut cursor = lock(&self.shared.cursor);
            cursor.buf.extend_from_slice(frame);
        }
        if end_of_message {
            self.shared.end_of_message.store(true, Ordering::Release);
        }
        let notice = FrameNotice {
            len: frame.len(),
            end_of_message,
        };
        tokio::select! {
            () = self.shared.abandoned.cancelled() => Err(MessageAbandoned),
            sent = self.notices.send(notice) => sent.map_err(|_| MessageAbandoned),
        }
    }
}

impl Drop for MessageWriter {
    fn drop(&mut self) {
        self.shared.writer_gone.store(true, Ordering::Release);
        // failure means the channel already holds a wakeup
        let _ = self.notices.try_send(FrameNotice {
            len: 0,
            end_of_message: false,
        });
    }
}

/// Consuming half: a seekable cursor over the bytes received so far.
pub struct MessageReader {
    shared: Arc<Shared>,
    notices: PooledChannel<FrameNotice>,
}

impl MessageReader {
    /// Bytes received so far (not the final message length until
    /// [`has_end_of_message`](Self::has_end_of_message) is true).
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.shared.cursor).buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        lock(&self.shared.cursor).pos
    }

    /// Move the read position, clamped to the bytes received so far.
    pub fn seek(&mut self, pos: usize) {
        let mut cursor = lock(&self.shared.cursor);
        cursor.pos = pos.min(cursor.buf.len());
    }

    /// Whether the final frame has been appended.
    #[must_use]
    pub fn has_end_of_message(&self) -> bool {
        self.shared.end_of_message.load(Ordering::Acquire)
    }

    /// Read up to `out.len()` bytes, suspending until that many bytes are
    /// buffered or the message is complete.
    ///
    /// A return shorter than `out.len()` means end of message (or a writer
    /// that went away mid-message, in which case the bytes received so far
    /// are all there will ever be).
    pub async fn read(&mut self, out: &mut [u8]) -> usize {
        let mut filled = 0;
        loop {
            filled += self.copy_available(&mut out[filled..]);
            if filled == out.len() {
                return filled;
            }
            if self.message_settled() {
                // a frame may have landed between the copy and the check
                filled += self.copy_available(&mut out[filled..]);
                return filled;
            }
            let _ = self.notices.recv().await;
        }
    }

    /// Append every remaining byte (from the current position to the final
    /// end of message) onto `out`; returns the count.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> usize {
        let mut total = 0;
        loop {
            total += self.drain_available(out);
            if self.message_settled() {
                total += self.drain_available(out);
                return total;
            }
            let _ = self.notices.recv().await;
        }
    }

    fn message_settled(&self) -> bool {
        self.shared.end_of_message.load(Ordering::Acquire)
            || self.shared.writer_gone.load(Ordering::Acquire)
    }

    fn copy_available(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut cursor = lock(&self.shared.cursor);
        let available = cursor.buf.len() - cursor.pos;
        let n = available.min(out.len());
        out[..n].copy_from_slice(&cursor.buf[cursor.pos..cursor.pos + n]);
        cursor.pos += n;
        n
    }

    fn drain_available(&self, out: &mut Vec<u8>) -> usize {
        let mut cursor = lock(&self.shared.cursor);
        let n = cursor.buf.len() - cursor.pos;
        out.extend_from_slice(&cursor.buf[cursor.pos..]);
        cursor.pos = cursor.buf.len();
        n
    }
}

impl Drop for MessageReader {
    fn drop(&mut self) {
        self.shared.abandoned.cancel();
    }
}
