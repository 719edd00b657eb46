use crate::config::ServerConfig;
use crate::probe::command::CommandBuilder;
use crate::process::registry::ProcessRegistry;
use crate::process::runner::{ProcessRunner, RunnerSettings};
use std::sync::Arc;

// Shared by every request handler; cloning is cheap.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: ProcessRegistry,
    pub runner: ProcessRunner,
    pub builder: Arc<CommandBuilder>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = ProcessRegistry::new();
        let runner = ProcessRunner::new(registry.clone(), RunnerSettings::from_config(&config));
        let builder = CommandBuilder::from_config(&config);

        Self {
            config: Arc::new(config),
            registry,
            runner,
            builder: Arc::new(builder),
        }
    }

    /// Advisory: concurrent admissions can overshoot by their own count.
    pub fn at_capacity(&self) -> bool {
        self.registry.len() >= self.config.max_active_probes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::ProbeKind;
    use crate::process::types::ProcessHandle;
    use tokio::sync::oneshot;

    #[test]
    fn test_runner_and_state_share_one_registry() {
        let state = AppState::new(ServerConfig::default());
        let (tx, _rx) = oneshot::channel();
        state
            .registry
            .insert(ProcessHandle::new("x".to_string(), ProbeKind::Ping, None, tx))
            .unwrap();

        assert!(state.runner.registry().contains("x"));
    }

    #[test]
    fn test_capacity_check_counts_registry_entries() {
        let state = AppState::new(ServerConfig {
            max_active_probes: 1,
            ..ServerConfig::default()
        });
        assert!(!state.at_capacity());

        let (tx, _rx) = oneshot::channel();
        state
            .registry
            .insert(ProcessHandle::new("x".to_string(), ProbeKind::Scan, None, tx))
            .unwrap();
        assert!(state.at_capacity());
    }
}
