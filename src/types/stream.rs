//! Per-stream write configuration.

use serde::{Deserialize, Serialize};

use crate::buffer::StreamBuffer;

/// How a stream's records relate to the data already present in its final table.
///
/// The buffering core treats this as opaque; destinations use it to decide their write
/// semantics when promoting staging tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

/// Binds a stream's identity to the buffer accumulating its records.
///
/// One instance exists per declared stream for the duration of a sync run. The identity
/// fields are immutable after construction; only the buffer contents change. Cloning is
/// cheap and shares the underlying buffer.
#[derive(Debug, Clone)]
pub struct StreamWriteConfig {
    stream_name: String,
    schema_name: String,
    table_name: String,
    tmp_table_name: String,
    sync_mode: SyncMode,
    buffer: StreamBuffer,
}

impl StreamWriteConfig {
    /// Creates a stream write configuration with an empty buffer.
    pub fn new(
        stream_name: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        tmp_table_name: impl Into<String>,
        sync_mode: SyncMode,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            tmp_table_name: tmp_table_name.into(),
            sync_mode,
            buffer: StreamBuffer::new(),
        }
    }

    /// Name of the source stream.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Destination schema containing both the staging and final tables.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Final, externally visible table the stream's records are promoted into.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Staging table that accumulates flushed records before promotion.
    pub fn tmp_table_name(&self) -> &str {
        &self.tmp_table_name
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// The buffer holding serialized records awaiting a flush.
    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }
}
