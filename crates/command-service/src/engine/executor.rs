use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use command_store::CommandRepository;
use protocol::{CommandId, CommandRecord, CommandStatus};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::process::{apply_process_group, describe_exit, kill_process_group, killed_by_signal};
use super::registry::{KillReply, ProcessHandle, Registration};
use super::script::Script;
use super::stream::{read_stream_capture, Capture};
use super::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum FragmentResult {
    Succeeded,
    Failed(String),
    Stopped,
}

pub(super) struct FragmentOutcome {
    pub(super) output: String,
    pub(super) result: FragmentResult,
}

/// Drives one command from its first fragment to a terminal status.
///
/// The execution is the only writer of its record while it runs, so store
/// updates for one id land in fragment order.
pub(super) struct Execution {
    store: Arc<dyn CommandRepository>,
    settings: Arc<EngineSettings>,
    registration: Registration,
    record: CommandRecord,
}

impl Execution {
    pub(super) fn new(
        store: Arc<dyn CommandRepository>,
        settings: Arc<EngineSettings>,
        registration: Registration,
        record: CommandRecord,
    ) -> Self {
        Self {
            store,
            settings,
            registration,
            record,
        }
    }

    pub(super) async fn run(mut self, script: Script) -> CommandRecord {
        let fragments = script.fragments();
        let total = fragments.len();
        for (index, fragment) in fragments.iter().enumerate() {
            if self.registration.cancel_token().is_cancelled() {
                tracing::info!(
                    event = "command.cancelled",
                    command_id = self.record.id,
                    fragment = index,
                    "stop observed before fragment start"
                );
                self.transition(CommandStatus::Stopped);
                break;
            }

            let outcome = run_fragment(fragment, &self.settings, &self.registration).await;
            self.record.output.push_str(&outcome.output);
            match outcome.result {
                FragmentResult::Succeeded => {}
                FragmentResult::Failed(reason) => {
                    tracing::warn!(
                        event = "fragment.failed",
                        command_id = self.record.id,
                        fragment = index,
                        reason = %reason,
                    );
                    self.transition(CommandStatus::Failed);
                }
                FragmentResult::Stopped => {
                    tracing::info!(
                        event = "fragment.stopped",
                        command_id = self.record.id,
                        fragment = index,
                    );
                    self.transition(CommandStatus::Stopped);
                }
            }
            if self.record.status.is_terminal() {
                break;
            }
            if index + 1 < total {
                self.persist("fragment").await;
            }
        }

        if self.record.status == CommandStatus::InProcess {
            self.transition(CommandStatus::Completed);
        }
        self.persist("final").await;
        tracing::info!(
            event = "command.finished",
            command_id = self.record.id,
            status = %self.record.status,
            output_len = self.record.output.len(),
        );
        self.record
    }

    fn transition(&mut self, next: CommandStatus) {
        if self.record.status.can_transition_to(next) {
            self.record.status = next;
        } else {
            tracing::warn!(
                command_id = self.record.id,
                from = %self.record.status,
                to = %next,
                "ignored backward status transition"
            );
        }
    }

    /// Failures are logged, not fatal: the output stays in memory and goes
    /// out with the next update.
    async fn persist(&self, stage: &'static str) {
        if let Err(err) = self.store.update(&self.record).await {
            tracing::error!(
                event = "command.persist_failed",
                command_id = self.record.id,
                stage,
                status = %self.record.status,
                error = %err,
            );
        }
    }
}

pub(super) async fn run_fragment(
    fragment: &str,
    settings: &EngineSettings,
    registration: &Registration,
) -> FragmentOutcome {
    match spawn_and_wait(fragment, settings, registration).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(
                event = "fragment.error",
                command_id = registration.id(),
                error = %format!("{err:#}"),
            );
            FragmentOutcome {
                output: format!("{err:#}\n"),
                result: FragmentResult::Failed(err.to_string()),
            }
        }
    }
}

async fn spawn_and_wait(
    fragment: &str,
    settings: &EngineSettings,
    registration: &Registration,
) -> anyhow::Result<FragmentOutcome> {
    let mut cmd = Command::new(&settings.shell);
    if !settings.shell_arg.is_empty() {
        cmd.arg(&settings.shell_arg);
    }
    cmd.arg(fragment);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    apply_process_group(&mut cmd);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {} {} {fragment}", settings.shell, settings.shell_arg))?;

    let pid = child.id();
    let capture = Capture::shared(settings.max_output_bytes);
    let stdout = child.stdout.take().context("missing stdout")?;
    let stderr = child.stderr.take().context("missing stderr")?;
    let mut stdout_task = tokio::spawn(read_stream_capture(stdout, Arc::clone(&capture)));
    let mut stderr_task = tokio::spawn(read_stream_capture(stderr, Arc::clone(&capture)));

    let (kill_tx, mut kill_rx) = mpsc::channel::<KillReply>(4);
    registration.attach(ProcessHandle::new(pid, kill_tx));
    tracing::debug!(
        event = "fragment.started",
        command_id = registration.id(),
        pid = ?pid,
        fragment,
    );

    // The handle stays attached until the shell has exited and both pipes
    // are closed: background jobs left by the fragment keep the pipes open
    // and must still be reachable by a stop.
    let cancel = registration.cancel_token();
    let mut stop_requested = false;
    let mut waited = None;
    let mut stdout_open = true;
    let mut stderr_open = true;
    while waited.is_none() || stdout_open || stderr_open {
        tokio::select! {
            status = child.wait(), if waited.is_none() => waited = Some(status),
            joined = &mut stdout_task, if stdout_open => {
                stdout_open = false;
                log_capture_result(registration.id(), "stdout", joined);
            }
            joined = &mut stderr_task, if stderr_open => {
                stderr_open = false;
                log_capture_result(registration.id(), "stderr", joined);
            }
            Some(reply) = kill_rx.recv() => {
                let result = kill_process_group(&mut child, pid);
                stop_requested |= result.is_ok();
                let _ = reply.send(result);
            }
            _ = cancel.cancelled(), if !stop_requested => {
                stop_requested = true;
                if let Err(err) = kill_process_group(&mut child, pid) {
                    tracing::warn!(
                        command_id = registration.id(),
                        pid = ?pid,
                        error = %err,
                        "failed to kill fragment after cancellation"
                    );
                }
            }
        }
    }
    registration.detach();
    let status = waited
        .context("child never reported exit")?
        .context("wait on child")?;
    let output = capture.lock().render();

    let result = if stop_requested || killed_by_signal(&status) {
        FragmentResult::Stopped
    } else if status.success() {
        FragmentResult::Succeeded
    } else {
        FragmentResult::Failed(describe_exit(&status))
    };
    Ok(FragmentOutcome { output, result })
}

fn log_capture_result(
    command_id: CommandId,
    stream: &str,
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(command_id, stream, error = %err, "output read failed");
        }
        Err(err) => {
            tracing::warn!(command_id, stream, error = %err, "output task join failed");
        }
    }
}
