// src/config/mod.rs
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "NETPROBE_CONFIG";

/// Runtime settings for the probe service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub ping_program: String,
    pub traceroute_program: String,
    pub scan_program: String,
    pub traceroute_deadline_secs: u64,
    /// 0 disables the lifetime sweep.
    pub max_probe_lifetime_secs: u64,
    pub sweep_interval_secs: u64,
    pub kill_grace_millis: u64,
    pub max_active_probes: usize,
    /// Output chunks buffered per probe before readers stop pulling from the pipes.
    pub channel_capacity: usize,
    pub read_buffer_size: usize,
    pub scan_stats_every: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            ping_program: "ping".to_string(),
            traceroute_program: "traceroute".to_string(),
            scan_program: "nmap".to_string(),
            traceroute_deadline_secs: 60,
            max_probe_lifetime_secs: 15 * 60,
            sweep_interval_secs: 30,
            kill_grace_millis: 2000,
            max_active_probes: 32,
            channel_capacity: 32,
            read_buffer_size: 8192,
            scan_stats_every: "0.5s".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then the YAML file named by `NETPROBE_CONFIG` (if set),
    /// then `NETPROBE_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NETPROBE_BIND_ADDR") {
            self.bind_addr = parse_env("NETPROBE_BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_PING_PROGRAM") {
            self.ping_program = v;
        }
        if let Some(v) = lookup("NETPROBE_TRACEROUTE_PROGRAM") {
            self.traceroute_program = v;
        }
        if let Some(v) = lookup("NETPROBE_SCAN_PROGRAM") {
            self.scan_program = v;
        }
        if let Some(v) = lookup("NETPROBE_TRACEROUTE_DEADLINE_SECS") {
            self.traceroute_deadline_secs = parse_env("NETPROBE_TRACEROUTE_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_MAX_PROBE_LIFETIME_SECS") {
            self.max_probe_lifetime_secs = parse_env("NETPROBE_MAX_PROBE_LIFETIME_SECS", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_env("NETPROBE_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_KILL_GRACE_MILLIS") {
            self.kill_grace_millis = parse_env("NETPROBE_KILL_GRACE_MILLIS", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_MAX_ACTIVE_PROBES") {
            self.max_active_probes = parse_env("NETPROBE_MAX_ACTIVE_PROBES", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_CHANNEL_CAPACITY") {
            self.channel_capacity = parse_env("NETPROBE_CHANNEL_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_READ_BUFFER_SIZE") {
            self.read_buffer_size = parse_env("NETPROBE_READ_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("NETPROBE_SCAN_STATS_EVERY") {
            self.scan_stats_every = v;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be greater than 0".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be greater than 0".into()));
        }
        if self.max_active_probes == 0 {
            return Err(ConfigError::Invalid("max_active_probes must be greater than 0".into()));
        }
        if self.traceroute_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "traceroute_deadline_secs must be greater than 0".into(),
            ));
        }
        if self.sweep_interval_secs == 0 && self.max_probe_lifetime_secs > 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than 0 when a lifetime is set".into(),
            ));
        }
        if !crate::probe::validation::is_time_spec(&self.scan_stats_every) {
            return Err(ConfigError::Invalid(format!(
                "scan_stats_every is not a time spec: {}",
                self.scan_stats_every
            )));
        }
        for program in [&self.ping_program, &self.traceroute_program, &self.scan_program] {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid("program names cannot be empty".into()));
            }
        }
        Ok(())
    }

    pub fn traceroute_deadline(&self) -> Duration {
        Duration::from_secs(self.traceroute_deadline_secs)
    }

    pub fn max_probe_lifetime(&self) -> Option<Duration> {
        match self.max_probe_lifetime_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.traceroute_deadline(), Duration::from_secs(60));
        assert_eq!(config.max_probe_lifetime(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("NETPROBE_BIND_ADDR", "0.0.0.0:8080"),
            ("NETPROBE_SCAN_PROGRAM", "/opt/nmap/bin/nmap"),
            ("NETPROBE_MAX_PROBE_LIFETIME_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.scan_program, "/opt/nmap/bin/nmap");
        assert_eq!(config.max_probe_lifetime(), None);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ServerConfig::default();
        let result = config.apply_env(|key| {
            (key == "NETPROBE_MAX_ACTIVE_PROBES").then(|| "lots".to_string())
        });

        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_yaml_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ping_program: /bin/ping").unwrap();
        writeln!(file, "traceroute_deadline_secs: 30").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ping_program, "/bin/ping");
        assert_eq!(config.traceroute_deadline_secs, 30);
        assert_eq!(config.scan_program, "nmap");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = ServerConfig {
            channel_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
