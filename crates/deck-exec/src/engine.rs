//! Execution lifecycle manager.
//!
//! Starts, tracks, and tears down one Process Host session per execution,
//! keeping the persisted record and the in-memory registry consistent. The
//! registry `remove` is the single claim point for reaching a terminal state:
//! whichever of cancellation, completion detection, or shutdown cleanup
//! removes the entry performs the terminal write; everyone else observes the
//! entry as gone and backs off.

use chrono::Utc;
use deck_core::config::{resolve_fallback_workdir, DeckConfig};
use deck_core::events::{Event, EventKind};
use deck_core::state::{status_for_exit_code, ExecutionStatus};
use deck_core::types::{
    ExecutionId, ExecutionRecord, SessionId, StartRequest, StartedExecution, TaskId,
};
use deck_core::validation::{is_valid, Validate, ValidationLevel};
use deck_notify::{notification_for_event, NotificationDispatcher};
use deck_pty::{render_launch_command, ProcessHost};
use deck_store::SqliteStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::ExecError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completion-detection polling interval.
    pub poll_interval: Duration,
    pub terminal_rows: u16,
    pub terminal_cols: u16,
    /// Directory commands run in when the request names none.
    pub fallback_workdir: PathBuf,
}

impl EngineConfig {
    pub fn from_config(config: &DeckConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.execution.poll_interval_ms),
            terminal_rows: config.terminal.rows,
            terminal_cols: config.terminal.cols,
            fallback_workdir: resolve_fallback_workdir(
                config.execution.fallback_workdir.as_deref(),
            ),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&DeckConfig::default())
    }
}

/// Registry entry for a live execution: the derived session id plus the
/// cancellable detection handle.
struct ActiveExecution {
    session_id: SessionId,
    stop: Arc<AtomicBool>,
}

struct EngineShared {
    config: EngineConfig,
    host: Arc<dyn ProcessHost>,
    store: Mutex<SqliteStore>,
    registry: Mutex<HashMap<ExecutionId, ActiveExecution>>,
    notifier: Mutex<Option<NotificationDispatcher>>,
}

/// The execution lifecycle manager. One instance per running host,
/// constructed by the service wiring and passed explicitly to call sites.
#[derive(Clone)]
pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
}

impl ExecutionEngine {
    pub fn new(host: Arc<dyn ProcessHost>, store: SqliteStore, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                host,
                store: Mutex::new(store),
                registry: Mutex::new(HashMap::new()),
                notifier: Mutex::new(None),
            }),
        }
    }

    /// Attach the notification sink(s). Unset means notifications are dropped.
    pub fn set_notifier(&self, dispatcher: NotificationDispatcher) {
        *self.shared.notifier.lock().expect("notifier lock") = Some(dispatcher);
    }

    pub fn clear_notifier(&self) {
        *self.shared.notifier.lock().expect("notifier lock") = None;
    }

    /// Start an execution: persist a `running` record, create the Process
    /// Host session, register, notify, dispatch the command, and begin
    /// completion detection.
    ///
    /// A persistence failure propagates with nothing registered. Any later
    /// failure triggers best-effort compensation: the record is marked
    /// `failed` and the session and registry entry are torn down before the
    /// error propagates.
    pub fn start_execution(&self, request: &StartRequest) -> Result<StartedExecution, ExecError> {
        let issues = request.validate();
        if !is_valid(&issues) {
            let message = issues
                .iter()
                .filter(|issue| issue.level == ValidationLevel::Error)
                .map(|issue| issue.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ExecError::InvalidRequest { message });
        }

        let record = ExecutionRecord::started(request.task_id.clone(), Utc::now());
        self.shared
            .store
            .lock()
            .expect("store lock")
            .insert_execution(&record)?;

        match self.launch(&record, request) {
            Ok(()) => Ok(StartedExecution {
                execution_id: record.id,
                session_id: record.session_id,
            }),
            Err(err) => {
                self.abort_start(&record, &err);
                Err(err)
            }
        }
    }

    fn launch(&self, record: &ExecutionRecord, request: &StartRequest) -> Result<(), ExecError> {
        let shared = &self.shared;
        let session_id = record.session_id.as_ref();

        shared.host.create(
            session_id,
            shared.config.terminal_cols,
            shared.config.terminal_rows,
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        shared.registry.lock().expect("registry lock").insert(
            record.id.clone(),
            ActiveExecution {
                session_id: record.session_id.clone(),
                stop: Arc::clone(&stop),
            },
        );

        emit_event(
            shared,
            &record.id,
            &record.task_id,
            EventKind::ExecutionStarted,
            None,
        );

        let workdir = request
            .working_directory
            .clone()
            .unwrap_or_else(|| shared.config.fallback_workdir.clone());
        let launch = render_launch_command(&workdir, &request.command);
        shared.host.write(session_id, &format!("{launch}\n"))?;

        spawn_detection(
            Arc::clone(&self.shared),
            record.id.clone(),
            record.session_id.clone(),
            stop,
        );
        Ok(())
    }

    /// Compensating teardown for a start that failed after the record was
    /// persisted. Best-effort, not transactional: each step is attempted and
    /// logged on its own.
    fn abort_start(&self, record: &ExecutionRecord, err: &ExecError) {
        let shared = &self.shared;
        if let Some(active) = shared
            .registry
            .lock()
            .expect("registry lock")
            .remove(&record.id)
        {
            active.stop.store(true, Ordering::SeqCst);
        }
        if let Err(close_err) = shared.host.close(record.session_id.as_ref()) {
            eprintln!(
                "[exec] failed to close session {} after start failure: {close_err}",
                record.session_id
            );
        }

        let message = err.to_string();
        {
            let store = shared.store.lock().expect("store lock");
            let result = store
                .set_error(&record.id, &message)
                .and_then(|()| store.finish_execution(&record.id, Utc::now(), None))
                .and_then(|()| store.update_status(&record.id, ExecutionStatus::Failed));
            if let Err(store_err) = result {
                eprintln!(
                    "[exec] failed to mark execution {} failed: {store_err}",
                    record.id
                );
            }
        }

        let refreshed = self.load_record_quiet(&record.id);
        emit_event(
            shared,
            &record.id,
            &record.task_id,
            EventKind::ExecutionFailed { message },
            refreshed,
        );
    }

    /// Cancel a tracked execution.
    ///
    /// Rejected with "not found or not running" when the id is absent from
    /// the registry, even if a terminal record with that id exists.
    pub fn cancel_execution(&self, execution_id: &ExecutionId) -> Result<(), ExecError> {
        let shared = &self.shared;
        let active = shared
            .registry
            .lock()
            .expect("registry lock")
            .remove(execution_id)
            .ok_or_else(|| ExecError::NotRunning {
                execution_id: execution_id.clone(),
            })?;
        active.stop.store(true, Ordering::SeqCst);

        if let Err(err) = shared.host.close(active.session_id.as_ref()) {
            // The entry is already claimed; a failed close must not block the
            // terminal write.
            eprintln!(
                "[exec] failed to close session {} during cancel: {err}",
                active.session_id
            );
        }

        let record = {
            let store = shared.store.lock().expect("store lock");
            store.finish_execution(execution_id, Utc::now(), None)?;
            store.update_status(execution_id, ExecutionStatus::Cancelled)?;
            store
                .load_execution(execution_id)?
                .ok_or_else(|| ExecError::NotRunning {
                    execution_id: execution_id.clone(),
                })?
        };

        let task_id = record.task_id.clone();
        emit_event(
            shared,
            execution_id,
            &task_id,
            EventKind::ExecutionCancelled,
            Some(record),
        );
        Ok(())
    }

    pub fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, ExecError> {
        Ok(self
            .shared
            .store
            .lock()
            .expect("store lock")
            .load_execution(execution_id)?)
    }

    pub fn get_executions_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ExecutionRecord>, ExecError> {
        Ok(self
            .shared
            .store
            .lock()
            .expect("store lock")
            .list_executions_for_task(task_id)?)
    }

    pub fn get_all_executions(&self) -> Result<Vec<ExecutionRecord>, ExecError> {
        Ok(self
            .shared
            .store
            .lock()
            .expect("store lock")
            .list_executions()?)
    }

    pub fn get_running_executions(&self) -> Result<Vec<ExecutionRecord>, ExecError> {
        Ok(self.shared.store.lock().expect("store lock").list_running()?)
    }

    pub fn get_events_for_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<Event>, ExecError> {
        Ok(self
            .shared
            .store
            .lock()
            .expect("store lock")
            .list_events_for_execution(execution_id)?)
    }

    /// True while the execution is tracked in the registry.
    pub fn is_active(&self, execution_id: &ExecutionId) -> bool {
        self.shared
            .registry
            .lock()
            .expect("registry lock")
            .contains_key(execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.shared.registry.lock().expect("registry lock").len()
    }

    /// Shutdown teardown: cancel every tracked execution, swallowing and
    /// logging individual failures so one bad session cannot block the rest.
    /// The registry is empty afterwards; repeat calls are no-ops.
    pub fn cleanup(&self) {
        let shared = &self.shared;
        let drained: Vec<(ExecutionId, ActiveExecution)> = shared
            .registry
            .lock()
            .expect("registry lock")
            .drain()
            .collect();

        for (execution_id, active) in drained {
            active.stop.store(true, Ordering::SeqCst);
            if let Err(err) = shared.host.close(active.session_id.as_ref()) {
                eprintln!(
                    "[cleanup] failed to close session {}: {err}",
                    active.session_id
                );
            }

            {
                let store = shared.store.lock().expect("store lock");
                let result = store
                    .finish_execution(&execution_id, Utc::now(), None)
                    .and_then(|()| store.update_status(&execution_id, ExecutionStatus::Cancelled));
                if let Err(err) = result {
                    eprintln!("[cleanup] failed to mark execution {execution_id} cancelled: {err}");
                }
            }

            if let Some(record) = self.load_record_quiet(&execution_id) {
                let task_id = record.task_id.clone();
                emit_event(
                    shared,
                    &execution_id,
                    &task_id,
                    EventKind::ExecutionCancelled,
                    Some(record),
                );
            }
        }
    }

    /// Fail `running` rows that have no registry entry.
    ///
    /// Run once at host startup: a crashed or killed host leaves rows behind
    /// that nothing will ever complete.
    pub fn recover_stale_records(&self) -> Result<Vec<ExecutionId>, ExecError> {
        let shared = &self.shared;
        let running = shared.store.lock().expect("store lock").list_running()?;

        let mut recovered = Vec::new();
        for record in running {
            if self.is_active(&record.id) {
                continue;
            }

            let message = "host restarted while execution was running";
            {
                let store = shared.store.lock().expect("store lock");
                store.set_error(&record.id, message)?;
                store.finish_execution(&record.id, Utc::now(), None)?;
                store.update_status(&record.id, ExecutionStatus::Failed)?;
            }

            let refreshed = self.load_record_quiet(&record.id);
            emit_event(
                shared,
                &record.id,
                &record.task_id,
                EventKind::ExecutionFailed {
                    message: message.to_string(),
                },
                refreshed,
            );
            recovered.push(record.id);
        }
        Ok(recovered)
    }

    fn load_record_quiet(&self, execution_id: &ExecutionId) -> Option<ExecutionRecord> {
        self.shared
            .store
            .lock()
            .expect("store lock")
            .load_execution(execution_id)
            .ok()
            .flatten()
    }
}

fn spawn_detection(
    shared: Arc<EngineShared>,
    execution_id: ExecutionId,
    session_id: SessionId,
    stop: Arc<AtomicBool>,
) {
    let poll_interval = shared.config.poll_interval;
    thread::spawn(move || loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if !shared.host.has_session(session_id.as_ref()) {
            finish_detected(&shared, &execution_id);
            return;
        }
        thread::sleep(poll_interval);
    });
}

/// Terminal handling for a session observed gone. Claims the registry entry;
/// a lost claim means cancellation or cleanup got there first and this is a
/// no-op.
fn finish_detected(shared: &EngineShared, execution_id: &ExecutionId) {
    let Some(active) = shared
        .registry
        .lock()
        .expect("registry lock")
        .remove(execution_id)
    else {
        return;
    };
    active.stop.store(true, Ordering::SeqCst);

    // The polling channel only reports session existence, so a vanished
    // session is recorded as a clean exit.
    let exit_code = 0;
    let status = status_for_exit_code(exit_code);

    let record = {
        let store = shared.store.lock().expect("store lock");
        let result = store
            .finish_execution(execution_id, Utc::now(), Some(exit_code))
            .and_then(|()| store.update_status(execution_id, status));
        if let Err(err) = result {
            eprintln!("[exec] failed to persist completion for {execution_id}: {err}");
        }
        store.load_execution(execution_id).ok().flatten()
    };

    if let Some(record) = record {
        let task_id = record.task_id.clone();
        emit_event(
            shared,
            execution_id,
            &task_id,
            EventKind::ExecutionCompleted {
                exit_code: Some(exit_code),
            },
            Some(record),
        );
    }
}

/// Persist a lifecycle event and push it at the notifier, if one is attached.
/// Notification delivery is best-effort; per-sink failures are dropped.
fn emit_event(
    shared: &EngineShared,
    execution_id: &ExecutionId,
    task_id: &TaskId,
    kind: EventKind,
    record: Option<ExecutionRecord>,
) {
    let event = Event::for_execution(execution_id.clone(), task_id.clone(), Utc::now(), kind);
    if let Err(err) = shared
        .store
        .lock()
        .expect("store lock")
        .append_event(&event)
    {
        eprintln!("[exec] failed to persist event {}: {err}", event.id);
    }

    let notifier = shared.notifier.lock().expect("notifier lock");
    if let Some(dispatcher) = notifier.as_ref() {
        let message = notification_for_event(&event, record);
        let _ = dispatcher.dispatch(&message);
    }
}
