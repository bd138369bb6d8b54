//! Live executors, keyed by command id.
//!
//! Executors are the only writers: an entry is inserted before the executor
//! task is spawned and removed when its [`Registration`] drops, after the
//! final store update. The stop path only clones handles out under the lock
//! and acts on them after releasing it.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use protocol::CommandId;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub(super) type KillReply = oneshot::Sender<io::Result<()>>;

/// Handle to the child process currently running for a command.
///
/// Kill requests are delivered to the executor that owns the `Child`, so a
/// signal is never sent to a pid that has already been reaped.
#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::Sender<KillReply>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillOutcome {
    Killed,
    /// The process exited before the request reached its executor.
    AlreadyExited,
}

impl ProcessHandle {
    pub(super) fn new(pid: Option<u32>, kill_tx: mpsc::Sender<KillReply>) -> Self {
        Self { pid, kill_tx }
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) async fn kill(&self) -> io::Result<KillOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).await.is_err() {
            return Ok(KillOutcome::AlreadyExited);
        }
        match reply_rx.await {
            Ok(Ok(())) => Ok(KillOutcome::Killed),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(KillOutcome::AlreadyExited),
        }
    }
}

#[derive(Debug)]
struct RegistryEntry {
    generation: u64,
    cancel: CancellationToken,
    active: Option<ProcessHandle>,
}

/// What the stop path needs from a live entry.
#[derive(Debug)]
pub(crate) struct StopHandles {
    pub(crate) cancel: CancellationToken,
    pub(crate) active: Option<ProcessHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct ProcessRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_generation: u64,
    entries: HashMap<CommandId, RegistryEntry>,
}

impl ProcessRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(self: &Arc<Self>, id: CommandId) -> Registration {
        let cancel = CancellationToken::new();
        let generation = {
            let mut inner = self.inner.lock();
            inner.next_generation += 1;
            let generation = inner.next_generation;
            let previous = inner.entries.insert(
                id,
                RegistryEntry {
                    generation,
                    cancel: cancel.clone(),
                    active: None,
                },
            );
            if previous.is_some() {
                tracing::warn!(command_id = id, "replaced stale registry entry");
            }
            generation
        };
        Registration {
            id,
            generation,
            registry: Arc::clone(self),
            cancel,
        }
    }

    pub(crate) fn stop_handles(&self, id: CommandId) -> Option<StopHandles> {
        self.inner.lock().entries.get(&id).map(|entry| StopHandles {
            cancel: entry.cancel.clone(),
            active: entry.active.clone(),
        })
    }

    pub(crate) fn contains(&self, id: CommandId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn set_active(&self, id: CommandId, generation: u64, handle: Option<ProcessHandle>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&id) {
            if entry.generation == generation {
                entry.active = handle;
            }
        }
    }

    /// Only the registration that created an entry may remove it.
    fn remove(&self, id: CommandId, generation: u64) {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .get(&id)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.entries.remove(&id);
        }
    }
}

/// An executor's claim on its registry entry; dropping it removes the entry.
#[derive(Debug)]
pub(crate) struct Registration {
    id: CommandId,
    generation: u64,
    registry: Arc<ProcessRegistry>,
    cancel: CancellationToken,
}

impl Registration {
    pub(crate) fn id(&self) -> CommandId {
        self.id
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(super) fn attach(&self, handle: ProcessHandle) {
        self.registry.set_active(self.id, self.generation, Some(handle));
    }

    pub(super) fn detach(&self) {
        self.registry.set_active(self.id, self.generation, None);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_drop_removes_entry() {
        let registry = ProcessRegistry::new();
        let registration = registry.register(1);
        assert!(registry.contains(1));
        drop(registration);
        assert!(!registry.contains(1));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn stale_registration_cannot_remove_newer_entry() {
        let registry = ProcessRegistry::new();
        let stale = registry.register(2);
        let current = registry.register(2);
        drop(stale);
        assert!(registry.contains(2));
        drop(current);
        assert!(!registry.contains(2));
    }

    #[test]
    fn stop_handles_share_the_cancel_token() {
        let registry = ProcessRegistry::new();
        let registration = registry.register(3);
        let handles = registry.stop_handles(3).expect("entry");
        assert!(handles.active.is_none());
        handles.cancel.cancel();
        assert!(registration.cancel_token().is_cancelled());
        assert!(registry.stop_handles(4).is_none());
    }

    #[test]
    fn attach_and_detach_track_the_active_process() {
        let registry = ProcessRegistry::new();
        let registration = registry.register(5);
        let (kill_tx, _kill_rx) = mpsc::channel(1);
        registration.attach(ProcessHandle::new(Some(4242), kill_tx));
        let active = registry
            .stop_handles(5)
            .and_then(|handles| handles.active)
            .expect("active handle");
        assert_eq!(active.pid(), Some(4242));

        registration.detach();
        assert!(registry.stop_handles(5).expect("entry").active.is_none());
    }

    #[tokio::test]
    async fn kill_reports_already_exited_when_executor_is_gone() {
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let handle = ProcessHandle::new(None, kill_tx);
        drop(kill_rx);
        assert_eq!(handle.kill().await.expect("kill"), KillOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn kill_surfaces_executor_errors() {
        let (kill_tx, mut kill_rx) = mpsc::channel::<KillReply>(1);
        tokio::spawn(async move {
            if let Some(reply) = kill_rx.recv().await {
                let _ = reply.send(Err(io::Error::from_raw_os_error(libc::EPERM)));
            }
        });
        let handle = ProcessHandle::new(Some(1), kill_tx);
        assert!(handle.kill().await.is_err());
    }
}
