//! Turns submitted scripts into child processes and tracks their lifecycle.
//!
//! [`Engine::submit`] has a two-phase contract. It always returns after the
//! record is created and the executor is spawned; for single-fragment scripts
//! it additionally waits up to the configured grace window and returns the
//! finished record if the fragment settles in time. Otherwise the returned
//! record is a preview, and the store stays the source of truth for the
//! eventual status and output.

mod executor;
mod process;
pub(crate) mod registry;
mod script;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use command_store::CommandRepository;
use protocol::{CommandId, CommandRecord, CommandStatus};
use tokio::sync::oneshot;

use crate::error::EngineError;

use self::executor::Execution;
use self::registry::ProcessRegistry;
use self::script::Script;

const ORPHAN_NOTE: &str = "[interrupted: service restarted before completion]\n";

#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub(crate) shell: String,
    pub(crate) shell_arg: String,
    pub(crate) grace_window: Duration,
    pub(crate) max_output_bytes: usize,
}

#[derive(Clone)]
pub(crate) struct Engine {
    store: Arc<dyn CommandRepository>,
    registry: Arc<ProcessRegistry>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    pub(crate) fn new(store: Arc<dyn CommandRepository>, settings: EngineSettings) -> Self {
        Self {
            store,
            registry: ProcessRegistry::new(),
            settings: Arc::new(settings),
        }
    }

    pub(crate) async fn submit(&self, text: &str) -> Result<CommandRecord, EngineError> {
        let script = Script::parse(text).ok_or(EngineError::EmptyScript)?;
        let record = self.store.create(text, CommandStatus::InProcess).await?;
        // Registered before the executor exists so a stop never finds a
        // live command without an entry.
        let registration = self.registry.register(record.id);
        let execution = Execution::new(
            Arc::clone(&self.store),
            Arc::clone(&self.settings),
            registration,
            record.clone(),
        );
        tracing::info!(
            event = "command.submitted",
            command_id = record.id,
            fragments = script.fragments().len(),
        );

        if script.is_pipeline() {
            tokio::spawn(execution.run(script));
            return Ok(record);
        }

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let finished = execution.run(script).await;
            let _ = done_tx.send(finished);
        });
        match tokio::time::timeout(self.settings.grace_window, done_rx).await {
            Ok(Ok(finished)) => Ok(finished),
            _ => {
                tracing::debug!(
                    command_id = record.id,
                    grace_ms = self.settings.grace_window.as_millis() as u64,
                    "grace window elapsed, returning preview"
                );
                match self.store.get(record.id).await {
                    Ok(current) => Ok(current),
                    Err(err) => {
                        tracing::warn!(command_id = record.id, error = %err, "preview read failed");
                        Ok(record)
                    }
                }
            }
        }
    }

    /// Requests termination: cancels the executor between fragments and
    /// kills the child that is running right now, if any.
    pub(crate) async fn stop(&self, id: CommandId) -> Result<(), EngineError> {
        let record = self.store.get(id).await?;
        if record.status.is_terminal() {
            return Err(EngineError::StateConflict(record.status));
        }
        let pipeline = Script::parse(&record.script).is_some_and(|script| script.is_pipeline());

        let Some(handles) = self.registry.stop_handles(id) else {
            // The executor may have settled between the lookup and now.
            let current = self.store.get(id).await?;
            if current.status.is_terminal() {
                return Err(EngineError::StateConflict(current.status));
            }
            tracing::error!(
                event = "command.stop_inconsistent",
                command_id = id,
                pipeline,
                status = %current.status,
                "running command has no registry entry"
            );
            return Err(EngineError::InternalInconsistency(id));
        };

        let killed = match &handles.active {
            Some(handle) => handle.kill().await.map(Some),
            None => Ok(None),
        };
        handles.cancel.cancel();
        match killed {
            Ok(outcome) => {
                tracing::info!(
                    event = "command.stop_requested",
                    command_id = id,
                    pipeline,
                    pid = ?handles.active.as_ref().and_then(|handle| handle.pid()),
                    kill = ?outcome,
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    event = "command.kill_failed",
                    command_id = id,
                    error = %err,
                );
                Err(EngineError::Process(err))
            }
        }
    }

    pub(crate) async fn get(&self, id: CommandId) -> Result<CommandRecord, EngineError> {
        Ok(self.store.get(id).await?)
    }

    pub(crate) async fn list(&self) -> Result<Vec<CommandRecord>, EngineError> {
        Ok(self.store.list().await?)
    }

    /// Fails records that a previous process left running. Must run before
    /// the service accepts requests.
    ///
    /// Writes `failed` directly, including from `pending`, without going
    /// through the state machine: no executor is left to drive these records.
    pub(crate) async fn reconcile_orphans(&self) -> Result<usize, EngineError> {
        let mut reconciled = 0;
        for mut record in self.store.list().await? {
            if record.status.is_terminal() || self.registry.contains(record.id) {
                continue;
            }
            let previous = record.status;
            record.status = CommandStatus::Failed;
            if !record.output.is_empty() && !record.output.ends_with('\n') {
                record.output.push('\n');
            }
            record.output.push_str(ORPHAN_NOTE);
            self.store.update(&record).await?;
            tracing::warn!(
                event = "command.orphaned",
                command_id = record.id,
                previous = %previous,
            );
            reconciled += 1;
        }
        Ok(reconciled)
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }
}
