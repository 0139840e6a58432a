//! Background flush worker draining stream buffers into staging storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::config::FlushConfig;
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;
use crate::types::StreamWriteConfig;

/// Runs one flush pass over every configured stream.
///
/// For each stream, while the buffer holds more than `min_records` entries, up to
/// `batch_size` records are drained and written to the stream's staging table. Writing
/// happens after the drain lock is released, so no buffer lock is held across a storage
/// write. With `min_records = 0` a pass empties every buffer, which is how the
/// success-close drain flushes remainders regardless of size.
pub(crate) async fn flush_streams<D: Destination>(
    min_records: usize,
    batch_size: usize,
    stream_configs: &HashMap<String, StreamWriteConfig>,
    destination: &D,
) -> SinkResult<()> {
    for config in stream_configs.values() {
        let buffer = config.buffer();

        while buffer.len().await > min_records {
            let batch = buffer.drain_up_to(batch_size).await;
            if batch.is_empty() {
                // The buffer was closed or drained concurrently.
                break;
            }

            debug!(
                "flushing {} records from stream '{}' into {}.{}",
                batch.len(),
                config.stream_name(),
                config.schema_name(),
                config.tmp_table_name()
            );

            destination
                .write_batch(config.schema_name(), config.tmp_table_name(), batch)
                .await?;
        }
    }

    Ok(())
}

/// The periodic flush task of a sync run.
///
/// A single [`FlushWorker`] is spawned by the record consumer at start. It runs flush
/// passes at a fixed delay: the next pass is scheduled only after the previous one
/// completed, so slow destination writes naturally throttle the cadence and at most one
/// pass is ever in flight.
#[derive(Debug)]
pub struct FlushWorker<D> {
    stream_configs: Arc<HashMap<String, StreamWriteConfig>>,
    destination: D,
    config: FlushConfig,
    failed: Arc<AtomicBool>,
    shutdown_rx: ShutdownRx,
}

impl<D> FlushWorker<D>
where
    D: Destination + Send + Sync + 'static,
{
    pub fn new(
        stream_configs: Arc<HashMap<String, StreamWriteConfig>>,
        destination: D,
        config: FlushConfig,
        failed: Arc<AtomicBool>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            stream_configs,
            destination,
            config,
            failed,
            shutdown_rx,
        }
    }

    /// Spawns the worker task and returns a handle to await its termination.
    pub fn start(self) -> FlushWorkerHandle {
        FlushWorkerHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    async fn run(mut self) -> SinkResult<()> {
        let delay = Duration::from_millis(self.config.flush_delay_ms);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    debug!("flush worker received shutdown signal, stopping");
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }

            if let Err(err) = flush_streams(
                self.config.min_records,
                self.config.batch_size,
                &self.stream_configs,
                &self.destination,
            )
            .await
            {
                // A failed pass is fatal to the run. Recording it here lets the close
                // path pick the failure procedure even if the caller passes
                // `has_failed = false`.
                self.failed.store(true, Ordering::SeqCst);
                error!("flush pass failed, no further passes will run: {}", err);
                return Err(err);
            }
        }
    }
}

/// Handle for awaiting a running [`FlushWorker`].
#[derive(Debug)]
pub struct FlushWorkerHandle {
    handle: JoinHandle<SinkResult<()>>,
}

impl FlushWorkerHandle {
    /// Waits for the worker to stop, bounded by `wait`.
    ///
    /// Stopping is cooperative: an in-flight flush pass is allowed to finish. Only once
    /// the bound elapses is the task force-aborted, and an elapsed bound is not an
    /// error. A worker that stopped with a flush error propagates that error here.
    pub async fn wait(mut self, wait: Duration) -> SinkResult<()> {
        match timeout(wait, &mut self.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(sink_error!(
                ErrorKind::FlushWorkerPanic,
                "flush worker task terminated abnormally",
                source: err
            )),
            Err(_) => {
                warn!("flush worker did not stop within {:?}, aborting it", wait);
                self.handle.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::destination::memory::MemoryDestination;
    use crate::types::{StreamWriteConfig, SyncMode};
    use bytes::Bytes;

    /// Destination whose writes never resolve, simulating a hung storage backend.
    #[derive(Debug, Clone)]
    struct StalledDestination;

    impl Destination for StalledDestination {
        async fn write_batch(
            &self,
            _schema_name: &str,
            _table_name: &str,
            _records: Vec<Bytes>,
        ) -> SinkResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn commit_final_tables(&self, _stream_configs: &[StreamWriteConfig]) -> SinkResult<()> {
            Ok(())
        }

        async fn drop_table(&self, _schema_name: &str, _table_name: &str) -> SinkResult<()> {
            Ok(())
        }
    }

    /// Destination whose writes panic, simulating a worker task dying abnormally.
    #[derive(Debug, Clone)]
    struct PanickingDestination;

    impl Destination for PanickingDestination {
        async fn write_batch(
            &self,
            _schema_name: &str,
            _table_name: &str,
            _records: Vec<Bytes>,
        ) -> SinkResult<()> {
            panic!("destination write exploded");
        }

        async fn commit_final_tables(&self, _stream_configs: &[StreamWriteConfig]) -> SinkResult<()> {
            Ok(())
        }

        async fn drop_table(&self, _schema_name: &str, _table_name: &str) -> SinkResult<()> {
            Ok(())
        }
    }

    fn stream_config(stream: &str) -> StreamWriteConfig {
        StreamWriteConfig::new(
            stream,
            "public",
            format!("{stream}_final"),
            format!("{stream}_tmp"),
            SyncMode::Incremental,
        )
    }

    async fn fill(config: &StreamWriteConfig, count: usize) {
        for n in 0..count {
            config
                .buffer()
                .append(Bytes::from(n.to_string()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pass_drains_buffers_down_to_the_watermark() {
        let config = stream_config("events");
        fill(&config, 1200).await;
        let configs = HashMap::from([("events".to_owned(), config.clone())]);
        let destination = MemoryDestination::new();

        flush_streams(500, 500, &configs, &destination).await.unwrap();

        // 1200 -> 700 -> 200, which is at or below the watermark.
        assert_eq!(config.buffer().len().await, 200);
        let staged = destination.table_rows("public", "events_tmp").await.unwrap();
        assert_eq!(staged.len(), 1000);
    }

    #[tokio::test]
    async fn pass_skips_streams_below_the_watermark() {
        let config = stream_config("events");
        fill(&config, 499).await;
        let configs = HashMap::from([("events".to_owned(), config.clone())]);
        let destination = MemoryDestination::new();

        flush_streams(500, 500, &configs, &destination).await.unwrap();

        assert_eq!(config.buffer().len().await, 499);
        assert!(!destination.table_exists("public", "events_tmp").await);
    }

    #[tokio::test]
    async fn zero_watermark_pass_empties_every_buffer() {
        let first = stream_config("first");
        let second = stream_config("second");
        fill(&first, 750).await;
        fill(&second, 3).await;
        let configs = HashMap::from([
            ("first".to_owned(), first.clone()),
            ("second".to_owned(), second.clone()),
        ]);
        let destination = MemoryDestination::new();

        flush_streams(0, 500, &configs, &destination).await.unwrap();

        assert!(first.buffer().is_empty().await);
        assert!(second.buffer().is_empty().await);
        assert_eq!(
            destination.table_rows("public", "first_tmp").await.unwrap().len(),
            750
        );
        assert_eq!(
            destination.table_rows("public", "second_tmp").await.unwrap().len(),
            3
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_timeout_aborts_a_stalled_worker() {
        let config = stream_config("stalled");
        fill(&config, 10).await;
        let configs = Arc::new(HashMap::from([("stalled".to_owned(), config.clone())]));
        let (shutdown_tx, _rx) = create_shutdown_channel();

        let flush_config = FlushConfig {
            min_records: 0,
            batch_size: 500,
            flush_delay_ms: 10,
        };
        let handle = FlushWorker::new(
            configs,
            StalledDestination,
            flush_config,
            Arc::new(AtomicBool::new(false)),
            shutdown_tx.subscribe(),
        )
        .start();

        // Let the pass start and hang inside the destination write.
        sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.shutdown();

        // The worker cannot observe the signal while stuck in a write; the bounded
        // wait gives up, aborts the task, and an elapsed bound is not an error.
        handle.wait(Duration::from_millis(100)).await.unwrap();

        // The batch had already been drained before the write stalled.
        assert!(config.buffer().is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_panic_is_reported_as_such() {
        let config = stream_config("panicky");
        fill(&config, 1).await;
        let configs = Arc::new(HashMap::from([("panicky".to_owned(), config)]));
        let (shutdown_tx, _rx) = create_shutdown_channel();

        let flush_config = FlushConfig {
            min_records: 0,
            batch_size: 500,
            flush_delay_ms: 10,
        };
        let handle = FlushWorker::new(
            configs,
            PanickingDestination,
            flush_config,
            Arc::new(AtomicBool::new(false)),
            shutdown_tx.subscribe(),
        )
        .start();

        let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FlushWorkerPanic);
    }

    #[tokio::test]
    async fn batches_preserve_ingestion_order() {
        let config = stream_config("ordered");
        fill(&config, 1100).await;
        let configs = HashMap::from([("ordered".to_owned(), config.clone())]);
        let destination = MemoryDestination::new();

        flush_streams(0, 500, &configs, &destination).await.unwrap();

        let staged = destination.table_rows("public", "ordered_tmp").await.unwrap();
        let expected: Vec<Bytes> = (0..1100).map(|n| Bytes::from(n.to_string())).collect();
        assert_eq!(staged, expected);
    }
}
