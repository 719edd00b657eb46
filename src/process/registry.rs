// src/process/registry.rs
use crate::error::RegistryError;
use crate::logging;
use crate::process::types::{KillReason, ProcessHandle, ProcessInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Process-wide table of live probes, keyed by opaque id.
///
/// Every operation takes the one mutex and releases it before returning, so
/// the lock is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<Mutex<HashMap<String, ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ProcessHandle) -> Result<(), RegistryError> {
        let mut processes = self.processes.lock();
        if processes.contains_key(&handle.id) {
            return Err(RegistryError::DuplicateId(handle.id));
        }
        log::debug!("Registered probe {} ({})", handle.id, handle.kind);
        processes.insert(handle.id.clone(), handle);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<ProcessInfo> {
        self.processes.lock().get(id).map(ProcessHandle::info)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processes.lock().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<ProcessHandle> {
        self.processes.lock().remove(id)
    }

    /// Remove the entry and signal its process in one critical section.
    /// Unknown, already-finished and already-cancelled ids all come back as
    /// `NotFound` without signalling anything.
    pub fn kill_and_remove(&self, id: &str, reason: KillReason) -> Result<ProcessInfo, RegistryError> {
        let mut processes = self.processes.lock();
        let handle = processes
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let info = handle.info();
        if handle.terminate(reason) {
            log::info!("Sent {} termination to probe {}", reason, id);
            Ok(info)
        } else {
            log::debug!("Probe {} had already exited when {} arrived", id, reason);
            Err(RegistryError::NotFound(id.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self
            .processes
            .lock()
            .values()
            .map(ProcessHandle::info)
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// Kill and drop every probe older than `max_age`.
    pub fn sweep_expired(&self, max_age: Duration) -> Vec<ProcessInfo> {
        let expired: Vec<ProcessHandle> = {
            let mut processes = self.processes.lock();
            let ids: Vec<String> = processes
                .iter()
                .filter(|(_, handle)| handle.age() >= max_age)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| processes.remove(id)).collect()
        };

        expired
            .into_iter()
            .map(|handle| {
                let info = handle.info();
                logging::log_probe_expired(&info);
                handle.terminate(KillReason::Expired);
                info
            })
            .collect()
    }

    /// Drain the table and signal every entry in it. Used on shutdown so
    /// open response streams reach their end instead of holding the server.
    pub fn kill_all(&self, reason: KillReason) -> Vec<ProcessInfo> {
        let drained: Vec<ProcessHandle> = {
            let mut processes = self.processes.lock();
            processes.drain().map(|(_, handle)| handle).collect()
        };

        drained
            .into_iter()
            .filter_map(|handle| {
                let info = handle.info();
                if handle.terminate(reason) {
                    logging::log_probe_cancelled(&info, reason);
                    Some(info)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Start the periodic lifetime sweep. Must be called inside a Tokio runtime.
    pub fn start_sweeper(&self, every: Duration, max_age: Duration) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);

            loop {
                ticker.tick().await;

                let expired = registry.sweep_expired(max_age);
                if !expired.is_empty() {
                    log::info!("Lifetime sweep stopped {} probe(s)", expired.len());
                }
            }
        })
    }
}
