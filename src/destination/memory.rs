use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::destination::Destination;
use crate::error::SinkResult;
use crate::types::StreamWriteConfig;

/// Tables keyed by `(schema_name, table_name)`.
type TableKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableKey, Vec<Bytes>>,
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] stores staging and final tables in memory, making it ideal for
/// testing the buffering and finalization behavior of the sink without any external
/// storage. All data is lost when the process terminates.
///
/// The commit operation runs under a single lock, so promotion is atomic across streams
/// exactly as the [`Destination`] contract requires.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates a new empty memory destination.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the rows of the given table, or [`None`] if the table does not exist.
    pub async fn table_rows(&self, schema_name: &str, table_name: &str) -> Option<Vec<Bytes>> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&(schema_name.to_owned(), table_name.to_owned()))
            .cloned()
    }

    /// Returns whether the given table exists.
    pub async fn table_exists(&self, schema_name: &str, table_name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .tables
            .contains_key(&(schema_name.to_owned(), table_name.to_owned()))
    }

    /// Returns a copy of every table stored in this destination.
    ///
    /// Useful for verifying exactly which staging and final tables exist after a run.
    pub async fn tables(&self) -> HashMap<TableKey, Vec<Bytes>> {
        let inner = self.inner.lock().await;
        inner.tables.clone()
    }

    /// Clears all stored tables.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Destination for MemoryDestination {
    async fn write_batch(
        &self,
        schema_name: &str,
        table_name: &str,
        records: Vec<Bytes>,
    ) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        info!(
            "writing a batch of {} records into {}.{}",
            records.len(),
            schema_name,
            table_name
        );

        inner
            .tables
            .entry((schema_name.to_owned(), table_name.to_owned()))
            .or_default()
            .extend(records);

        Ok(())
    }

    async fn commit_final_tables(&self, stream_configs: &[StreamWriteConfig]) -> SinkResult<()> {
        // One critical section for the whole promotion keeps it all-or-nothing.
        let mut inner = self.inner.lock().await;

        info!("committing {} final tables", stream_configs.len());

        for config in stream_configs {
            let staged = inner
                .tables
                .remove(&(config.schema_name().to_owned(), config.tmp_table_name().to_owned()))
                .unwrap_or_default();
            inner
                .tables
                .insert((config.schema_name().to_owned(), config.table_name().to_owned()), staged);
        }

        Ok(())
    }

    async fn drop_table(&self, schema_name: &str, table_name: &str) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        info!("dropping table {}.{} if it exists", schema_name, table_name);

        inner
            .tables
            .remove(&(schema_name.to_owned(), table_name.to_owned()));

        Ok(())
    }
}
