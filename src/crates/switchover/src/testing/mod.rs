//! In-memory endpoints for exercising the cutover without live servers
//!
//! Every fake records the calls made against it so tests can assert on the
//! exact mutations a run performed.

use crate::db::{PoolerAck, PoolerAdmin, PostgresEndpoint, Role};
use crate::error::{Result, SwitchoverError};
use crate::models::{
    AuditRow, BackendConnection, ColumnRef, ProxyDatabaseEntry, ProxyPool, ReplicationChannelStatus,
    SequenceLastValue, SequenceName, TimeWindow,
};
use crate::prompt::Confirm;
use crate::remote::{CommandOutput, RemoteShell};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::{sleep, Instant};

type Hook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct PostgresState {
    version: String,
    lag: HashMap<String, VecDeque<i64>>,
    slot_polls: u32,
    counts: HashMap<String, i64>,
    audit_rows: HashMap<String, Vec<AuditRow>>,
    connections: HashMap<String, Vec<BackendConnection>>,
    sequences: Vec<SequenceLastValue>,
    owners: HashMap<SequenceName, Vec<ColumnRef>>,
    column_max: HashMap<ColumnRef, Option<i64>>,
    setval_calls: Vec<(SequenceName, i64)>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    closed: bool,
}

/// Scriptable Postgres server
pub struct FakePostgres {
    role: Role,
    state: Mutex<PostgresState>,
}

impl FakePostgres {
    pub fn new(role: Role, version: impl Into<String>) -> Self {
        Self {
            role,
            state: Mutex::new(PostgresState {
                version: version.into(),
                ..Default::default()
            }),
        }
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.state.lock().version = version.into();
    }

    /// Successive lag readings for a slot; the last one repeats
    pub fn script_lag(&self, slot: &str, readings: &[i64]) {
        self.state
            .lock()
            .lag
            .insert(slot.to_string(), readings.iter().copied().collect());
    }

    /// Number of times the slot status was read
    pub fn slot_polls(&self) -> u32 {
        self.state.lock().slot_polls
    }

    pub fn set_count(&self, table: &str, count: i64) {
        self.state.lock().counts.insert(table.to_string(), count);
    }

    pub fn set_audit_rows(&self, table: &str, rows: Vec<AuditRow>) {
        self.state.lock().audit_rows.insert(table.to_string(), rows);
    }

    pub fn set_connections(&self, database: &str, connections: Vec<BackendConnection>) {
        self.state.lock().connections.insert(database.to_string(), connections);
    }

    /// Register a sequence owned by a single column
    pub fn add_sequence(&self, sequence: SequenceLastValue, owner: ColumnRef) {
        let mut state = self.state.lock();
        state.owners.insert(sequence.sequence(), vec![owner]);
        state.sequences.push(sequence);
    }

    pub fn clear_owners(&self, sequence: &SequenceName) {
        self.state.lock().owners.insert(sequence.clone(), Vec::new());
    }

    pub fn set_column_max(&self, column: &ColumnRef, value: Option<i64>) {
        self.state.lock().column_max.insert(column.clone(), value);
    }

    pub fn setval_calls(&self) -> Vec<(SequenceName, i64)> {
        self.state.lock().setval_calls.clone()
    }

    /// Make every call to the named trait method fail
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    /// Make every call to the named trait method take `delay` before answering
    pub fn set_delay(&self, operation: &str, delay: Duration) {
        self.state.lock().delays.insert(operation.to_string(), delay);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        let delay = self.state.lock().delays.get(operation).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if self.state.lock().failing.contains(operation) {
            return Err(SwitchoverError::Query {
                role: self.role,
                message: format!("simulated {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PostgresEndpoint for FakePostgres {
    fn role(&self) -> Role {
        self.role
    }

    async fn server_version(&self) -> Result<String> {
        self.enter("server_version").await?;
        let state = self.state.lock();
        Ok(state.version.clone())
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        self.enter("count_rows").await?;
        let state = self.state.lock();
        Ok(state.counts.get(table).copied().unwrap_or(0))
    }

    async fn audit_rows(&self, table: &str, _window: &TimeWindow) -> Result<Vec<AuditRow>> {
        self.enter("audit_rows").await?;
        let state = self.state.lock();
        Ok(state.audit_rows.get(table).cloned().unwrap_or_default())
    }

    async fn active_connections(&self, database: &str) -> Result<Vec<BackendConnection>> {
        self.enter("active_connections").await?;
        let state = self.state.lock();
        Ok(state.connections.get(database).cloned().unwrap_or_default())
    }

    async fn replication_slots(&self) -> Result<Vec<ReplicationChannelStatus>> {
        self.enter("replication_slots").await?;
        let mut state = self.state.lock();
        state.slot_polls += 1;

        let mut slots = Vec::new();
        for (name, readings) in state.lag.iter_mut() {
            let reading = if readings.len() > 1 {
                readings.pop_front()
            } else {
                readings.front().copied()
            };
            if let Some(lag) = reading {
                slots.push(ReplicationChannelStatus::new(name.clone(), lag));
            }
        }
        Ok(slots)
    }

    async fn sequence_last_values(&self, schema: &str) -> Result<Vec<SequenceLastValue>> {
        self.enter("sequence_last_values").await?;
        let state = self.state.lock();
        Ok(state
            .sequences
            .iter()
            .filter(|s| s.schema == schema)
            .cloned()
            .collect())
    }

    async fn sequence_owners(&self, sequence: &SequenceName) -> Result<Vec<ColumnRef>> {
        self.enter("sequence_owners").await?;
        let state = self.state.lock();
        Ok(state.owners.get(sequence).cloned().unwrap_or_default())
    }

    async fn column_max(&self, column: &ColumnRef) -> Result<Option<i64>> {
        self.enter("column_max").await?;
        let state = self.state.lock();
        Ok(state.column_max.get(column).copied().flatten())
    }

    async fn set_sequence_value(&self, sequence: &SequenceName, value: i64) -> Result<i64> {
        self.enter("set_sequence_value").await?;
        let mut state = self.state.lock();
        state.setval_calls.push((sequence.clone(), value));
        Ok(value)
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

#[derive(Default)]
struct PoolerState {
    databases: Vec<ProxyDatabaseEntry>,
    pools: Vec<ProxyPool>,
    pause_count: usize,
    resume_count: usize,
    pause_error: Option<String>,
    resume_error: Option<String>,
    paused_at: Option<Instant>,
    paused_window: Option<Duration>,
    closed: bool,
}

/// Scriptable PgBouncer admin console
pub struct FakePooler {
    state: Mutex<PoolerState>,
}

impl FakePooler {
    pub fn new(databases: Vec<ProxyDatabaseEntry>) -> Self {
        Self {
            state: Mutex::new(PoolerState {
                databases,
                ..Default::default()
            }),
        }
    }

    pub fn set_pools(&self, pools: Vec<ProxyPool>) {
        self.state.lock().pools = pools;
    }

    /// Number of PAUSE commands received, including failed ones
    pub fn pause_count(&self) -> usize {
        self.state.lock().pause_count
    }

    /// Number of RESUME commands received, including failed ones
    pub fn resume_count(&self) -> usize {
        self.state.lock().resume_count
    }

    /// Time between the last successful PAUSE and the RESUME that followed it
    pub fn paused_window(&self) -> Option<Duration> {
        self.state.lock().paused_window
    }

    pub fn fail_pause(&self, message: impl Into<String>) {
        self.state.lock().pause_error = Some(message.into());
    }

    pub fn fail_resume(&self, message: impl Into<String>) {
        self.state.lock().resume_error = Some(message.into());
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn set_paused(state: &mut PoolerState, db_name: &str, paused: bool) -> Result<()> {
        let entry = state
            .databases
            .iter_mut()
            .find(|d| d.name == db_name)
            .ok_or_else(|| SwitchoverError::Proxy(format!("ERROR: no such database: {}", db_name)))?;
        entry.paused = paused;
        Ok(())
    }
}

#[async_trait]
impl PoolerAdmin for FakePooler {
    async fn show_databases(&self) -> Result<Vec<ProxyDatabaseEntry>> {
        Ok(self.state.lock().databases.clone())
    }

    async fn show_pools(&self) -> Result<Vec<ProxyPool>> {
        Ok(self.state.lock().pools.clone())
    }

    async fn pause(&self, db_name: &str) -> Result<PoolerAck> {
        let mut state = self.state.lock();
        state.pause_count += 1;
        if let Some(ref message) = state.pause_error {
            return Err(SwitchoverError::Proxy(message.clone()));
        }
        Self::set_paused(&mut state, db_name, true)?;
        state.paused_at = Some(Instant::now());
        Ok(PoolerAck {
            statement: format!("PAUSE {}", db_name),
            rows_affected: 0,
        })
    }

    async fn resume(&self, db_name: &str) -> Result<PoolerAck> {
        let mut state = self.state.lock();
        state.resume_count += 1;
        if let Some(ref message) = state.resume_error {
            return Err(SwitchoverError::Proxy(message.clone()));
        }
        Self::set_paused(&mut state, db_name, false)?;
        if let Some(at) = state.paused_at.take() {
            state.paused_window = Some(at.elapsed());
        }
        Ok(PoolerAck {
            statement: format!("RESUME {}", db_name),
            rows_affected: 0,
        })
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

/// Remote shell that records commands and answers by prefix
#[derive(Default)]
pub struct FakeShell {
    commands: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
    hook: Mutex<Option<Hook>>,
    disposed: Mutex<bool>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Answer commands starting with `prefix`; unmatched commands succeed with empty output
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) {
        self.responses.lock().push((prefix.into(), output));
    }

    /// Run `hook` with every command before it is answered
    pub fn on_command(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.commands.lock().push(command.to_string());
        if let Some(ref hook) = *self.hook.lock() {
            hook(command);
        }

        let output = self
            .responses
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success(""));
        Ok(output)
    }

    async fn dispose(&self) -> Result<()> {
        *self.disposed.lock() = true;
        Ok(())
    }
}

/// Prompt with queued answers
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<bool>>,
    questions: Mutex<Vec<String>>,
    observer: Mutex<Option<Hook>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Default::default()
        }
    }

    /// Questions asked so far
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    /// Run `observer` with each question as it is asked
    pub fn on_ask(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Box::new(observer));
    }
}

#[async_trait]
impl Confirm for ScriptedPrompt {
    async fn confirm(&self, question: &str) -> Result<bool> {
        self.questions.lock().push(question.to_string());
        if let Some(ref observer) = *self.observer.lock() {
            observer(question);
        }
        self.answers
            .lock()
            .pop_front()
            .ok_or_else(|| SwitchoverError::Prompt("no scripted answer left".to_string()))
    }
}
