//! Concurrency-safe per-stream record buffer.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

#[derive(Debug)]
struct Inner {
    records: VecDeque<Bytes>,
    closed: bool,
}

/// An ordered queue of serialized records for one destination stream.
///
/// [`StreamBuffer`] supports one concurrent appender (the ingestion path) and one
/// concurrent drainer (the flush worker) without external locking. Records are drained
/// in the order they were appended; FIFO order within a stream is the basis for the
/// in-order write guarantee.
///
/// Cloning shares the underlying queue, so the consumer and the flush worker operate on
/// the same contents. The internal lock is only held for queue manipulation, never
/// across a destination write.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl StreamBuffer {
    /// Creates a new empty buffer.
    pub fn new() -> Self {
        let inner = Inner {
            records: VecDeque::new(),
            closed: false,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Appends one serialized record to the end of the buffer.
    ///
    /// Fails with [`ErrorKind::BufferClosed`] once the buffer has been closed.
    pub async fn append(&self, record: Bytes) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.closed {
            bail!(
                ErrorKind::BufferClosed,
                "record appended to a closed stream buffer"
            );
        }
        inner.records.push_back(record);

        Ok(())
    }

    /// Returns the number of buffered records.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes and returns up to `max` of the oldest buffered records.
    ///
    /// Returns fewer than `max` entries (possibly none) if the buffer holds fewer.
    /// Never waits for more records to arrive.
    pub async fn drain_up_to(&self, max: usize) -> Vec<Bytes> {
        let mut inner = self.inner.lock().await;

        let take = max.min(inner.records.len());
        inner.records.drain(..take).collect()
    }

    /// Closes the buffer and releases its contents.
    ///
    /// Closing is idempotent. Subsequent appends fail; drains return nothing.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;

        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.records.clear();
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}
