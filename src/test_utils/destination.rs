use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkResult};
use crate::types::StreamWriteConfig;

#[derive(Debug, Default)]
struct Inner {
    /// `(schema, table, record count)` per write call, in call order.
    write_batches: Vec<(String, String, usize)>,
    /// `(schema, table)` per drop call, in call order.
    dropped_tables: Vec<(String, String)>,
    commit_calls: u64,
    fail_commit_for: Option<String>,
    fail_writes_to: Option<(String, String)>,
    fail_drops_of: Vec<(String, String)>,
}

/// Test wrapper for [`Destination`] implementations that tracks all operations.
///
/// [`TestDestinationWrapper`] wraps any destination and records every write, commit and
/// drop flowing through it. It can also inject failures: a commit failure whenever a
/// given stream is part of the commit, a write failure for a given staging table, or a
/// drop failure for given staging tables.
/// Injected failures happen before the wrapped destination is touched, so its state
/// stays exactly as it was, which is what the all-or-nothing assertions rely on.
#[derive(Debug, Clone)]
pub struct TestDestinationWrapper<D> {
    wrapped: D,
    inner: Arc<Mutex<Inner>>,
}

impl<D> TestDestinationWrapper<D> {
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped: destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Total number of records written to the given table across all batches.
    pub async fn records_written_to(&self, schema_name: &str, table_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .write_batches
            .iter()
            .filter(|(schema, table, _)| schema == schema_name && table == table_name)
            .map(|(_, _, count)| count)
            .sum()
    }

    /// Every write call as `(schema, table, record count)`, in call order.
    pub async fn write_batches(&self) -> Vec<(String, String, usize)> {
        let inner = self.inner.lock().await;
        inner.write_batches.clone()
    }

    /// Every dropped table as `(schema, table)`, in call order.
    pub async fn dropped_tables(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().await;
        inner.dropped_tables.clone()
    }

    /// Number of times a final-table commit was attempted.
    pub async fn commit_calls(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.commit_calls
    }

    /// Makes every commit involving the given stream fail before reaching the wrapped
    /// destination.
    pub async fn fail_commit_for(&self, stream_name: &str) {
        let mut inner = self.inner.lock().await;
        inner.fail_commit_for = Some(stream_name.to_owned());
    }

    /// Makes every write to the given table fail before reaching the wrapped
    /// destination.
    pub async fn fail_writes_to(&self, schema_name: &str, table_name: &str) {
        let mut inner = self.inner.lock().await;
        inner.fail_writes_to = Some((schema_name.to_owned(), table_name.to_owned()));
    }

    /// Makes every drop of the given table fail before reaching the wrapped
    /// destination. May be called for several tables.
    pub async fn fail_drop_of(&self, schema_name: &str, table_name: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .fail_drops_of
            .push((schema_name.to_owned(), table_name.to_owned()));
    }
}

impl<D> Destination for TestDestinationWrapper<D>
where
    D: Destination + Send + Sync,
{
    async fn write_batch(
        &self,
        schema_name: &str,
        table_name: &str,
        records: Vec<Bytes>,
    ) -> SinkResult<()> {
        {
            let mut inner = self.inner.lock().await;

            if inner.fail_writes_to.as_ref()
                == Some(&(schema_name.to_owned(), table_name.to_owned()))
            {
                bail!(
                    ErrorKind::DestinationWriteFailed,
                    "injected write failure",
                    format!("table {schema_name}.{table_name}")
                );
            }

            inner
                .write_batches
                .push((schema_name.to_owned(), table_name.to_owned(), records.len()));
        }

        self.wrapped.write_batch(schema_name, table_name, records).await
    }

    async fn commit_final_tables(&self, stream_configs: &[StreamWriteConfig]) -> SinkResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.commit_calls += 1;

            if let Some(stream) = &inner.fail_commit_for
                && stream_configs
                    .iter()
                    .any(|config| config.stream_name() == *stream)
            {
                bail!(
                    ErrorKind::DestinationCommitFailed,
                    "injected commit failure",
                    format!("stream '{stream}'")
                );
            }
        }

        self.wrapped.commit_final_tables(stream_configs).await
    }

    async fn drop_table(&self, schema_name: &str, table_name: &str) -> SinkResult<()> {
        {
            let mut inner = self.inner.lock().await;
            let key = (schema_name.to_owned(), table_name.to_owned());

            if inner.fail_drops_of.contains(&key) {
                bail!(
                    ErrorKind::DestinationTableDropFailed,
                    "injected drop failure",
                    format!("table {schema_name}.{table_name}")
                );
            }

            inner.dropped_tables.push(key);
        }

        self.wrapped.drop_table(schema_name, table_name).await
    }
}
