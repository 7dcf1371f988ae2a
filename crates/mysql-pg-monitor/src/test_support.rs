//! In-memory backends for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{CountHint, SourceShard, TargetDatabase};
use crate::error::{MonitorError, Result};

/// How a fake call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Connection,
    Query,
}

impl Failure {
    fn into_error(self, what: &str) -> MonitorError {
        match self {
            Failure::Connection => MonitorError::connection(what, "connection refused"),
            Failure::Query => MonitorError::query(what, "statement rejected"),
        }
    }
}

/// Scripted result of an exact count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCount {
    Rows(i64),
    /// The `PRIMARY` hint is rejected; a plain count returns the rows.
    NoPrimaryKey(i64),
    Fail(Failure),
}

/// Tracks per-table concurrency of count calls.
#[derive(Default)]
pub struct Concurrency {
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
}

impl Concurrency {
    fn enter(&self, table: &str) {
        let mut in_flight = self.in_flight.lock();
        let now = in_flight.entry(table.to_string()).or_insert(0);
        *now += 1;
        let mut max = self.max_in_flight.lock();
        let peak = max.entry(table.to_string()).or_insert(0);
        *peak = (*peak).max(*now);
    }

    fn exit(&self, table: &str) {
        if let Some(now) = self.in_flight.lock().get_mut(table) {
            *now -= 1;
        }
    }

    /// Highest number of simultaneous count calls seen for any table.
    pub fn peak(&self) -> usize {
        self.max_in_flight.lock().values().copied().max().unwrap_or(0)
    }
}

struct CallScope<'a> {
    concurrency: &'a Concurrency,
    table: String,
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.concurrency.exit(&self.table);
    }
}

#[derive(Default)]
struct ShardScript {
    tables: Vec<String>,
    list_failure: Option<Failure>,
    estimates: HashMap<String, i64>,
    estimates_failure: Option<Failure>,
    counts: HashMap<String, FakeCount>,
    delay: Option<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// Scriptable [`SourceShard`].
pub struct FakeShard {
    name: String,
    script: Mutex<ShardScript>,
    count_calls: AtomicUsize,
    concurrency: Concurrency,
}

impl FakeShard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(ShardScript::default()),
            count_calls: AtomicUsize::new(0),
            concurrency: Concurrency::default(),
        }
    }

    /// Add tables that count `rows` exactly and estimate `rows` in the catalog.
    pub fn with_table(self, table: &str, rows: i64) -> Self {
        {
            let mut script = self.script.lock();
            script.tables.push(table.to_string());
            script.estimates.insert(table.to_string(), rows);
            script.counts.insert(table.to_string(), FakeCount::Rows(rows));
        }
        self
    }

    pub fn with_count(self, table: &str, count: FakeCount) -> Self {
        self.set_count(table, count);
        self
    }

    pub fn with_estimate(self, table: &str, rows: Option<i64>) -> Self {
        {
            let mut script = self.script.lock();
            match rows {
                Some(rows) => script.estimates.insert(table.to_string(), rows),
                None => script.estimates.remove(table),
            };
        }
        self
    }

    pub fn failing_list(self, failure: Failure) -> Self {
        self.script.lock().list_failure = Some(failure);
        self
    }

    pub fn failing_estimates(self, failure: Failure) -> Self {
        self.script.lock().estimates_failure = Some(failure);
        self
    }

    /// Every count call sleeps for `delay` first.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().delay = Some(delay);
        self
    }

    /// Cancel `token` once `calls` count calls have started.
    pub fn cancel_after(self, calls: usize, token: CancellationToken) -> Self {
        self.script.lock().cancel_after = Some((calls, token));
        self
    }

    pub fn set_count(&self, table: &str, count: FakeCount) {
        self.script.lock().counts.insert(table.to_string(), count);
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> &Concurrency {
        &self.concurrency
    }
}

#[async_trait]
impl SourceShard for FakeShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_base_tables(&self) -> Result<Vec<String>> {
        let script = self.script.lock();
        if let Some(failure) = script.list_failure {
            return Err(failure.into_error(&self.name));
        }
        let mut tables = script.tables.clone();
        tables.sort();
        Ok(tables)
    }

    async fn approximate_row_counts(&self) -> Result<HashMap<String, i64>> {
        let script = self.script.lock();
        if let Some(failure) = script.estimates_failure {
            return Err(failure.into_error(&self.name));
        }
        Ok(script.estimates.clone())
    }

    async fn count_rows(&self, table: &str, hint: CountHint) -> Result<i64> {
        let calls = self.count_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let (count, delay) = {
            let script = self.script.lock();
            if let Some((after, token)) = &script.cancel_after {
                if calls >= *after {
                    token.cancel();
                }
            }
            (
                script
                    .counts
                    .get(table)
                    .copied()
                    .unwrap_or(FakeCount::Fail(Failure::Query)),
                script.delay,
            )
        };

        self.concurrency.enter(table);
        let _scope = CallScope {
            concurrency: &self.concurrency,
            table: table.to_string(),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match (count, hint) {
            (FakeCount::Rows(rows), _) => Ok(rows),
            (FakeCount::NoPrimaryKey(_), CountHint::PrimaryKey) => {
                Err(MonitorError::query(table, "Key 'PRIMARY' doesn't exist"))
            }
            (FakeCount::NoPrimaryKey(rows), CountHint::None) => Ok(rows),
            (FakeCount::Fail(failure), _) => Err(failure.into_error(table)),
        }
    }

    async fn test_connection(&self) -> Result<()> {
        match self.script.lock().list_failure {
            Some(failure) => Err(failure.into_error(&self.name)),
            None => Ok(()),
        }
    }

    async fn close(&self) {}
}

#[derive(Default)]
struct TargetScript {
    statistics: HashMap<String, HashMap<String, i64>>,
    statistics_failure: Option<Failure>,
    counts: HashMap<(String, String), FakeCount>,
    delay: Option<Duration>,
    down: bool,
}

/// Scriptable [`TargetDatabase`].
#[derive(Default)]
pub struct FakeTarget {
    script: Mutex<TargetScript>,
    count_calls: AtomicUsize,
    concurrency: Concurrency,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact count and planner statistics for `schema.table`.
    pub fn with_table(self, schema: &str, table: &str, rows: i64) -> Self {
        {
            let mut script = self.script.lock();
            script
                .statistics
                .entry(schema.to_string())
                .or_default()
                .insert(table.to_string(), rows);
            script
                .counts
                .insert((schema.to_string(), table.to_string()), FakeCount::Rows(rows));
        }
        self
    }

    pub fn with_statistic(self, schema: &str, table: &str, rows: Option<i64>) -> Self {
        {
            let mut script = self.script.lock();
            let stats = script.statistics.entry(schema.to_string()).or_default();
            match rows {
                Some(rows) => stats.insert(table.to_string(), rows),
                None => stats.remove(table),
            };
        }
        self
    }

    pub fn with_count(self, schema: &str, table: &str, count: FakeCount) -> Self {
        self.set_count(schema, table, count);
        self
    }

    pub fn failing_statistics(self, failure: Failure) -> Self {
        self.script.lock().statistics_failure = Some(failure);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().delay = Some(delay);
        self
    }

    pub fn set_count(&self, schema: &str, table: &str, count: FakeCount) {
        self.script
            .lock()
            .counts
            .insert((schema.to_string(), table.to_string()), count);
    }

    /// Every call fails with a connection error.
    pub fn set_down(&self, down: bool) {
        self.script.lock().down = down;
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> &Concurrency {
        &self.concurrency
    }
}

#[async_trait]
impl TargetDatabase for FakeTarget {
    async fn table_statistics(&self, schema: &str) -> Result<HashMap<String, i64>> {
        let script = self.script.lock();
        if script.down {
            return Err(Failure::Connection.into_error("fake-pg"));
        }
        if let Some(failure) = script.statistics_failure {
            return Err(failure.into_error(schema));
        }
        Ok(script.statistics.get(schema).cloned().unwrap_or_default())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let (count, delay) = {
            let script = self.script.lock();
            if script.down {
                return Err(Failure::Connection.into_error("fake-pg"));
            }
            (
                script
                    .counts
                    .get(&(schema.to_string(), table.to_string()))
                    .copied()
                    .unwrap_or(FakeCount::Fail(Failure::Query)),
                script.delay,
            )
        };

        let qualified = format!("{schema}.{table}");
        self.concurrency.enter(&qualified);
        let _scope = CallScope {
            concurrency: &self.concurrency,
            table: qualified.clone(),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match count {
            FakeCount::Rows(rows) | FakeCount::NoPrimaryKey(rows) => Ok(rows),
            FakeCount::Fail(failure) => Err(failure.into_error(&qualified)),
        }
    }

    async fn test_connection(&self) -> Result<()> {
        if self.script.lock().down {
            return Err(Failure::Connection.into_error("fake-pg"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "fake-pg".to_string()
    }

    async fn close(&self) {}
}

/// Upcast helper for building shard lists.
pub fn shard(fake: FakeShard) -> Arc<dyn SourceShard> {
    Arc::new(fake)
}
