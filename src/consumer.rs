//! Record consumer orchestrating buffering, flushing and finalization for one sync run.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::termination_signal;
use crate::config::FlushConfig;
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::types::{Message, StreamWriteConfig, SyncMode};
use crate::workers::flush::{FlushWorker, FlushWorkerHandle, flush_streams};

/// Bounded wait for the flush worker on the success close path, generous enough for an
/// in-flight batch write to complete.
const GRACEFUL_CLOSE_WAIT: Duration = Duration::from_secs(5 * 60);

/// Bounded wait for the flush worker on the failure close path. Nothing staged will be
/// promoted, so there is no reason to linger.
const FAILED_CLOSE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum ConsumerState {
    /// Streams are being declared; the flush worker is not running yet.
    Declaring {
        stream_configs: HashMap<String, StreamWriteConfig>,
    },
    /// Ingestion is active and the flush worker runs in the background.
    Running {
        stream_configs: Arc<HashMap<String, StreamWriteConfig>>,
        worker: FlushWorkerHandle,
    },
    /// The run was finalized; no further operations are accepted.
    Closed,
}

/// Accumulates record messages in per-stream buffers and finalizes the run on close.
///
/// One [`RecordConsumer`] handles exactly one sync run. Streams are declared with
/// [`RecordConsumer::add_stream`], then [`RecordConsumer::start`] spawns the periodic
/// flush worker, [`RecordConsumer::accept`] is invoked once per inbound protocol message,
/// and [`RecordConsumer::close`] terminates the run. On a clean close every remaining
/// buffered record is drained to staging and all staging tables are promoted into final
/// tables in one atomic commit; on a failed close staging tables are dropped without
/// promotion, leaving final tables untouched.
///
/// Any error raised during ingestion or by a background flush pass is remembered, so the
/// close sequence picks the failure procedure even when the caller believes the run
/// succeeded.
#[derive(Debug)]
pub struct RecordConsumer<D> {
    destination: D,
    flush_config: FlushConfig,
    failed: Arc<AtomicBool>,
    shutdown_tx: ShutdownTx,
    state: ConsumerState,
}

impl<D> RecordConsumer<D>
where
    D: Destination + Clone + Send + Sync + 'static,
{
    pub fn new(destination: D, flush_config: FlushConfig) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            destination,
            flush_config,
            failed: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            state: ConsumerState::Declaring {
                stream_configs: HashMap::new(),
            },
        }
    }

    /// Declares a destination stream before the run starts.
    ///
    /// Each ingested record must reference one of the declared streams. Declaring the
    /// same stream twice is rejected: silently overwriting would orphan a buffer that
    /// may already be configured elsewhere.
    pub fn add_stream(
        &mut self,
        stream_name: &str,
        schema_name: &str,
        table_name: &str,
        tmp_table_name: &str,
        sync_mode: SyncMode,
    ) -> SinkResult<()> {
        let ConsumerState::Declaring { stream_configs } = &mut self.state else {
            bail!(
                ErrorKind::InvalidState,
                "streams cannot be added after the consumer was started"
            );
        };

        if stream_configs.contains_key(stream_name) {
            bail!(
                ErrorKind::ConfigError,
                "stream declared twice",
                format!("stream '{stream_name}' already has a write configuration")
            );
        }

        stream_configs.insert(
            stream_name.to_owned(),
            StreamWriteConfig::new(stream_name, schema_name, table_name, tmp_table_name, sync_mode),
        );

        Ok(())
    }

    /// Starts the periodic flush worker and freezes the stream set.
    ///
    /// Must be called exactly once, from within a tokio runtime. Also spawns a listener
    /// that requests a graceful flush worker stop when the process receives an external
    /// termination signal.
    pub fn start(&mut self) -> SinkResult<()> {
        let ConsumerState::Declaring { stream_configs } = &mut self.state else {
            bail!(ErrorKind::InvalidState, "record consumer was already started");
        };

        self.flush_config.validate()?;

        let stream_configs = Arc::new(std::mem::take(stream_configs));

        info!(
            "starting flush worker for {} configured streams",
            stream_configs.len()
        );

        let worker = FlushWorker::new(
            stream_configs.clone(),
            self.destination.clone(),
            self.flush_config.clone(),
            self.failed.clone(),
            self.shutdown_tx.subscribe(),
        )
        .start();

        // Request a graceful scheduler stop if the host asks the process to terminate.
        // Finalization itself stays with the explicit `close` call.
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = termination_signal() => {
                    info!("termination signal received, requesting flush worker shutdown");
                    let _ = shutdown_tx.shutdown();
                }
                // The run is already shutting down, nothing to do.
                _ = shutdown_rx.changed() => {}
            }
        });

        self.state = ConsumerState::Running {
            stream_configs,
            worker,
        };

        Ok(())
    }

    /// Ingests one protocol message.
    ///
    /// Record messages are serialized and appended to their stream's buffer; all other
    /// message types are accepted without side effect. Any error is remembered in the
    /// consumer's failure state and re-raised, never swallowed.
    pub async fn accept(&mut self, message: Message) -> SinkResult<()> {
        let result = self.accept_message(message).await;

        if let Err(err) = &result {
            self.failed.store(true, Ordering::SeqCst);
            error!("failed to accept message: {}", err);
        }

        result
    }

    async fn accept_message(&mut self, message: Message) -> SinkResult<()> {
        let ConsumerState::Running { stream_configs, .. } = &self.state else {
            bail!(
                ErrorKind::InvalidState,
                "records can only be accepted while the consumer is running"
            );
        };

        // Only record messages are buffered.
        let Message::Record(record) = message else {
            return Ok(());
        };

        let Some(config) = stream_configs.get(&record.stream) else {
            bail!(
                ErrorKind::StreamNotConfigured,
                "record references a stream missing from the configured catalog",
                format!("stream '{}' was not declared before start", record.stream)
            );
        };

        let payload = Bytes::from(serde_json::to_vec(&record)?);
        config.buffer().append(payload).await
    }

    /// Returns whether any tracked ingestion or flush error occurred during the run.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Finalizes the run.
    ///
    /// With `has_failed = false` (and no tracked failure) the flush worker is stopped
    /// with a generous bounded wait, remaining buffer contents are drained to staging,
    /// and all staging tables are promoted into final tables in one atomic commit. With
    /// a failure the worker is stopped quickly and nothing is promoted. On both paths
    /// every buffer is closed and every staging table drop is attempted; drop errors are
    /// aggregated and surfaced after all drops were tried.
    ///
    /// A second invocation is a logged no-op and never re-runs the commit.
    pub async fn close(&mut self, has_failed: bool) -> SinkResult<()> {
        match std::mem::replace(&mut self.state, ConsumerState::Closed) {
            ConsumerState::Declaring { stream_configs } => {
                // An erroneous early close must not consume the consumer: put the
                // declared streams back so the run can still be started.
                self.state = ConsumerState::Declaring { stream_configs };
                bail!(
                    ErrorKind::InvalidState,
                    "record consumer was closed before being started"
                );
            }
            ConsumerState::Closed => {
                warn!("record consumer already closed, skipping finalization");
                Ok(())
            }
            ConsumerState::Running {
                stream_configs,
                worker,
            } => self.finalize(stream_configs, worker, has_failed).await,
        }
    }

    async fn finalize(
        &mut self,
        stream_configs: Arc<HashMap<String, StreamWriteConfig>>,
        worker: FlushWorkerHandle,
        has_failed: bool,
    ) -> SinkResult<()> {
        // No further flush passes are allowed to start; an in-flight pass may finish
        // within the bounded wait.
        let _ = self.shutdown_tx.shutdown();

        let mut errors: Vec<SinkError> = Vec::new();
        let has_failed = has_failed || self.has_failed();

        let wait = if has_failed {
            FAILED_CLOSE_WAIT
        } else {
            GRACEFUL_CLOSE_WAIT
        };
        if let Err(err) = worker.wait(wait).await {
            errors.push(err);
        }

        // A flush failure observed while waiting fails the run as well: staged data is
        // incomplete, so nothing may be promoted.
        let has_failed = has_failed || self.has_failed() || !errors.is_empty();

        if has_failed {
            error!("executing failed close procedure, staged data will be discarded");
        } else {
            info!("executing success close procedure");

            // Write anything that is left in the buffers, however little.
            match flush_streams(0, self.flush_config.batch_size, &stream_configs, &self.destination)
                .await
            {
                Ok(()) => {
                    let commit_targets: Vec<StreamWriteConfig> =
                        stream_configs.values().cloned().collect();
                    if let Err(err) = self.destination.commit_final_tables(&commit_targets).await {
                        error!("failed to commit final tables: {}", err);
                        errors.push(err);
                    }
                }
                Err(err) => {
                    error!("final drain failed, skipping commit: {}", err);
                    errors.push(err);
                }
            }
        }

        for config in stream_configs.values() {
            config.buffer().close().await;
        }

        // Best-effort drops: one failure must not prevent the remaining staging tables
        // from being dropped.
        for config in stream_configs.values() {
            if let Err(err) = self
                .destination
                .drop_table(config.schema_name(), config.tmp_table_name())
                .await
            {
                error!(
                    "failed to drop staging table {}.{}: {}",
                    config.schema_name(),
                    config.tmp_table_name(),
                    err
                );
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::MemoryDestination;
    use serde_json::json;

    fn consumer() -> RecordConsumer<MemoryDestination> {
        RecordConsumer::new(MemoryDestination::new(), FlushConfig::default())
    }

    fn record(stream: &str) -> Message {
        Message::Record(crate::types::RecordMessage {
            stream: stream.to_owned(),
            data: json!({"id": 1}),
            emitted_at: 0,
        })
    }

    #[tokio::test]
    async fn duplicate_stream_declaration_is_rejected() {
        let mut consumer = consumer();
        consumer
            .add_stream("users", "public", "users", "users_tmp", SyncMode::FullRefresh)
            .unwrap();

        let err = consumer
            .add_stream("users", "public", "users", "users_tmp2", SyncMode::FullRefresh)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn streams_cannot_be_added_after_start() {
        let mut consumer = consumer();
        consumer.start().unwrap();

        let err = consumer
            .add_stream("users", "public", "users", "users_tmp", SyncMode::FullRefresh)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        consumer.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut consumer = consumer();
        consumer.start().unwrap();

        let err = consumer.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        consumer.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn accept_before_start_fails_and_marks_the_run_failed() {
        let mut consumer = consumer();
        consumer
            .add_stream("users", "public", "users", "users_tmp", SyncMode::FullRefresh)
            .unwrap();

        let err = consumer.accept(record("users")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(consumer.has_failed());
    }

    #[tokio::test]
    async fn close_before_start_fails_and_keeps_declared_streams() {
        let mut consumer = consumer();
        consumer
            .add_stream("users", "public", "users", "users_tmp", SyncMode::FullRefresh)
            .unwrap();

        let err = consumer.close(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // The erroneous close must not consume the consumer: the declared stream is
        // still there and the run can still be started and finalized.
        let err = consumer
            .add_stream("users", "public", "users", "users_tmp2", SyncMode::FullRefresh)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        consumer.start().unwrap();
        consumer.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_flush_config_is_rejected_at_start() {
        let config = FlushConfig {
            batch_size: 0,
            ..FlushConfig::default()
        };
        let mut consumer = RecordConsumer::new(MemoryDestination::new(), config);

        let err = consumer.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
