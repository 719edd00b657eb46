// src/error.rs
use thiserror::Error;

/// Caller-correctable input problems. The display text is what the HTTP
/// layer returns as `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required parameters")]
    MissingParameters,

    #[error("Missing IP address")]
    MissingIp,

    #[error("Missing endpoint for traceroute")]
    MissingEndpoint,

    #[error("Invalid IP address format")]
    InvalidIp,

    #[error("Invalid domain format")]
    InvalidDomain,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Command is required")]
    EmptyScanCommand,

    #[error("Only nmap commands are allowed")]
    NotAScanCommand,

    #[error("Command contains forbidden characters")]
    ForbiddenCharacters,

    #[error("The command contains privileged option \"{0}\" which is not allowed")]
    PrivilegedOption(String),

    #[error("The command contains option \"{0}\" which is not allowed")]
    DisallowedOption(String),

    #[error("Failed to parse command: {0}")]
    Unparseable(String),

    #[error("Invalid value for option \"{option}\": {value}")]
    InvalidOptionValue { option: String, value: String },
}

/// The OS could not create the probe process.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Executable '{0}' not found")]
    NotFound(String),

    #[error("Permission denied while starting '{0}'")]
    PermissionDenied(String),

    #[error("Failed to start '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SpawnError::PermissionDenied(program.to_string())
            }
            _ => SpawnError::Io {
                program: program.to_string(),
                source: err,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Process already registered: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error the HTTP handlers map onto status codes.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Invalid process ID")]
    CancellationNotFound(String),

    #[error("Too many active probes")]
    TooManyProbes,
}
