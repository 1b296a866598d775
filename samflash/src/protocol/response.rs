//! Response buffer and FIFO read-request queue.
//!
//! The SAM-BA monitor answers with unframed bytes: nothing in the stream
//! marks where one reply ends and the next begins. Replies are therefore
//! matched purely by order and length. Every read the session issues is
//! queued as a pending request; incoming bytes are appended to a
//! [`ResponseBuffer`] and handed to the head of the queue once enough of
//! them have arrived.
//!
//! The queue performs no I/O and never reads the clock itself. The caller
//! feeds bytes with [`ResponseQueue::feed`] and advances time with
//! [`ResponseQueue::expire`], which keeps the matching rules testable
//! without a device.

use log::{debug, trace};
use std::collections::VecDeque;
use std::time::Instant;

use crate::error::{Error, Result};

/// How a request behaves when its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Must receive the full length, otherwise fails and discards the buffer.
    #[default]
    Strict,
    /// Resolves with whatever arrived once the deadline passes.
    Lenient,
}

/// Identifier handed out for each queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// An outstanding read.
#[derive(Debug, Clone)]
struct PendingRequest {
    id: RequestId,
    length: usize,
    deadline: Instant,
    mode: ReadMode,
}

/// Append-only byte region with independent read and write cursors.
///
/// Both cursors return to zero whenever everything written has been read.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl ResponseBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append incoming bytes at the write cursor.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Read cursor position.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Write cursor position.
    pub fn write_pos(&self) -> usize {
        self.data.len()
    }

    /// Remove up to `n` bytes from the front.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.available());
        let bytes = self.data[self.read_pos..self.read_pos + n].to_vec();
        self.read_pos += n;
        self.reset_if_drained();
        bytes
    }

    /// Drop every unread byte and reset both cursors.
    pub fn discard(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    fn reset_if_drained(&mut self) {
        if self.read_pos == self.data.len() {
            self.discard();
        }
    }
}

/// FIFO queue of reads matched against a [`ResponseBuffer`].
#[derive(Debug, Default)]
pub struct ResponseQueue {
    buffer: ResponseBuffer,
    pending: VecDeque<PendingRequest>,
    completed: Vec<(RequestId, Result<Vec<u8>>)>,
    next_id: u64,
}

impl ResponseQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a read of `length` bytes that must finish by `deadline`.
    ///
    /// Bytes already buffered count towards the request immediately.
    pub fn enqueue(&mut self, length: usize, deadline: Instant, mode: ReadMode) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        trace!("Queued read {id:?}: {length} bytes ({mode:?})");
        self.pending.push_back(PendingRequest {
            id,
            length,
            deadline,
            mode,
        });
        self.satisfy();
        id
    }

    /// Append bytes delivered by the transport and resolve what they complete.
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        trace!("< {} bytes", bytes.len());
        self.buffer.append(bytes);
        self.satisfy();
    }

    /// Apply deadlines that have passed at `now`, head first.
    pub fn expire(&mut self, now: Instant) {
        while let Some(head) = self.pending.front() {
            if head.deadline > now {
                break;
            }
            let Some(head) = self.pending.pop_front() else {
                break;
            };

            let available = self.buffer.available();
            let outcome = match head.mode {
                ReadMode::Lenient => Ok(self.buffer.take(head.length)),
                ReadMode::Strict if available >= head.length => Ok(self.buffer.take(head.length)),
                ReadMode::Strict => {
                    debug!(
                        "Read {:?} timed out with {available}/{} bytes, discarding buffer",
                        head.id, head.length
                    );
                    self.buffer.discard();
                    Err(Error::Timeout {
                        requested: head.length,
                        available,
                    })
                },
            };
            self.completed.push((head.id, outcome));
            self.satisfy();
        }
    }

    /// Remove the outcome of a finished request.
    ///
    /// Returns `None` while the request is still pending.
    pub fn take(&mut self, id: RequestId) -> Option<Result<Vec<u8>>> {
        let index = self.completed.iter().position(|(done, _)| *done == id)?;
        Some(self.completed.swap_remove(index).1)
    }

    /// Give up on `id` after the transport failed underneath it.
    ///
    /// The request and any outcome already recorded for it are dropped, and
    /// the buffered bytes are discarded since their alignment to later
    /// replies is unknown.
    pub fn abandon(&mut self, id: RequestId) {
        self.pending.retain(|req| req.id != id);
        self.completed.retain(|(done, _)| *done != id);
        self.buffer.discard();
        debug!("Abandoned read {id:?}");
    }

    /// Whether `id` is still waiting for bytes.
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.iter().any(|req| req.id == id)
    }

    /// Number of requests still waiting.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Deadline of the request at the head of the queue.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|req| req.deadline)
    }

    /// The underlying byte buffer.
    pub fn buffer(&self) -> &ResponseBuffer {
        &self.buffer
    }

    fn satisfy(&mut self) {
        while let Some(head) = self.pending.front() {
            if self.buffer.available() < head.length {
                break;
            }
            let Some(head) = self.pending.pop_front() else {
                break;
            };
            let bytes = self.buffer.take(head.length);
            self.completed.push((head.id, Ok(bytes)));
        }
    }
}
