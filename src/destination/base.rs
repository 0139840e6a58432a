use bytes::Bytes;
use std::future::Future;

use crate::error::SinkResult;
use crate::types::StreamWriteConfig;

/// Trait for storage systems that can receive buffered records from the sink.
///
/// [`Destination`] implementations define how drained batches are persisted into staging
/// tables and how staging tables are promoted into final tables. The buffering core only
/// depends on this capability interface and never on a concrete storage technology.
///
/// Write and commit errors are treated as fatal to the sync run by the caller; the
/// destination itself performs no retries. Implementations should make
/// [`Destination::drop_table`] tolerate tables that no longer exist, since the consumer
/// drops staging tables unconditionally on both close paths.
pub trait Destination {
    /// Writes a batch of serialized records into the named staging table.
    ///
    /// The batch was already removed from the stream's buffer, so a failure here loses
    /// at most this one in-flight batch, never the whole buffer. Batches for one stream
    /// arrive in ingestion order.
    fn write_batch(
        &self,
        schema_name: &str,
        table_name: &str,
        records: Vec<Bytes>,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    /// Atomically replaces every stream's final table with its staging table's contents.
    ///
    /// Must be all-or-nothing across the given streams: a failure for any stream leaves
    /// every final table unchanged. Conceptually, each final table is deleted if present
    /// and the staging table is renamed into its place, in a single transaction.
    fn commit_final_tables(
        &self,
        stream_configs: &[StreamWriteConfig],
    ) -> impl Future<Output = SinkResult<()>> + Send;

    /// Drops a staging table if it exists.
    ///
    /// Failures are surfaced to the caller but never prevent sibling drops from being
    /// attempted.
    fn drop_table(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> impl Future<Output = SinkResult<()>> + Send;
}
