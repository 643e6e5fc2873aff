//! Service wiring: one engine, one PTY host, one notification channel.
//!
//! The service owns the receiving end of the notification channel (the role
//! the host shell plays) and mirrors every drained notification into the
//! JSONL event log.

use deck_core::config::DeckConfig;
use deck_core::events::Event;
use deck_core::types::{ExecutionId, ExecutionRecord, StartRequest, StartedExecution, TaskId};
use deck_exec::{EngineConfig, ExecError, ExecutionEngine};
use deck_notify::{ChannelSink, NotificationDispatcher, NotificationMessage};
use deck_pty::PtyHost;
use deck_store::{SqliteStore, StoreError};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use crate::event_log::{EventLogError, JsonlEventLog};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

pub struct DeckService {
    engine: ExecutionEngine,
    host: Arc<PtyHost>,
    notifications: mpsc::Receiver<NotificationMessage>,
    event_log: JsonlEventLog,
}

impl DeckService {
    pub fn open(
        sqlite_path: impl AsRef<Path>,
        event_log_root: impl AsRef<Path>,
        config: &DeckConfig,
    ) -> Result<Self, ServiceError> {
        let store = SqliteStore::open(sqlite_path)?;
        store.migrate()?;

        let host = Arc::new(PtyHost::new(config.terminal.shell.clone()));
        let engine = ExecutionEngine::new(host.clone(), store, EngineConfig::from_config(config));

        let mut dispatcher = NotificationDispatcher::from_config(&config.notifications);
        let (sink, notifications) = ChannelSink::channel();
        dispatcher.push_sink(Box::new(sink));
        engine.set_notifier(dispatcher);

        let event_log = JsonlEventLog::new(event_log_root.as_ref());
        event_log.ensure_layout()?;

        Ok(Self {
            engine,
            host,
            notifications,
            event_log,
        })
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn host(&self) -> &Arc<PtyHost> {
        &self.host
    }

    pub fn start(&self, request: &StartRequest) -> Result<StartedExecution, ServiceError> {
        let started = self.engine.start_execution(request);
        self.drain_notifications();
        Ok(started?)
    }

    pub fn cancel(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord, ServiceError> {
        let cancelled = self.engine.cancel_execution(execution_id);
        self.drain_notifications();
        cancelled?;
        self.engine
            .get_execution(execution_id)?
            .ok_or_else(|| {
                ServiceError::Exec(ExecError::NotRunning {
                    execution_id: execution_id.clone(),
                })
            })
    }

    pub fn show(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionRecord>, ServiceError> {
        Ok(self.engine.get_execution(execution_id)?)
    }

    pub fn list(&self) -> Result<Vec<ExecutionRecord>, ServiceError> {
        Ok(self.engine.get_all_executions()?)
    }

    pub fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionRecord>, ServiceError> {
        Ok(self.engine.get_executions_for_task(task_id)?)
    }

    pub fn running(&self) -> Result<Vec<ExecutionRecord>, ServiceError> {
        Ok(self.engine.get_running_executions()?)
    }

    pub fn events(&self, execution_id: &ExecutionId) -> Result<Vec<Event>, ServiceError> {
        Ok(self.engine.get_events_for_execution(execution_id)?)
    }

    /// Fail orphaned `running` rows left behind by a previous host process.
    pub fn recover(&self) -> Result<Vec<ExecutionId>, ServiceError> {
        let recovered = self.engine.recover_stale_records();
        self.drain_notifications();
        Ok(recovered?)
    }

    /// Drain pending lifecycle notifications into the JSONL event log.
    ///
    /// Returns how many notifications were drained. Log-append failures are
    /// reported and do not interrupt the drain.
    pub fn drain_notifications(&self) -> usize {
        let mut drained = 0;
        while let Ok(message) = self.notifications.try_recv() {
            drained += 1;
            if let Err(err) = self.event_log.append_both(&message) {
                eprintln!("[deckd] failed to append event log entry: {err}");
            }
        }
        drained
    }

    /// Shutdown: cancel everything still tracked and flush the log mirror.
    pub fn cleanup(&self) {
        self.engine.cleanup();
        self.drain_notifications();
    }
}
