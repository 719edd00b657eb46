use crate::config::ServerConfig;
use crate::probe::types::{ProbeKind, ProbeRequest, ScanCommand};
use crate::probe::validation::{
    is_decimal, is_port_spec, is_privileged_token, is_script_args, is_script_list, is_switch,
    is_time_spec,
};
use serde::Serialize;

pub const CUSTOM_COMMAND_KEY: &str = "customCommand";

pub const PRIVILEGED_NOTICE: &str =
    "Note: Some privileged options were removed from your command.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagShape {
    /// Emitted when the option is `"true"`.
    Switch,
    /// Emitted on every structured scan.
    Always,
    /// Emitted as `<flag> -`, output to stdout only.
    StdoutOutput,
    /// Emitted as `<flag> <value>`.
    Value,
}

/// One entry of the structured scan allow-list.
#[derive(Debug)]
pub struct ScanOption {
    pub key: &'static str,
    pub flag: &'static str,
    pub shape: FlagShape,
    pub accepts: fn(&str) -> bool,
}

// Emission order is table order.
pub const SCAN_OPTIONS: &[ScanOption] = &[
    ScanOption { key: "pn", flag: "-Pn", shape: FlagShape::Switch, accepts: is_switch },
    ScanOption { key: "sT", flag: "-sT", shape: FlagShape::Switch, accepts: is_switch },
    ScanOption { key: "sV", flag: "-sV", shape: FlagShape::Switch, accepts: is_switch },
    ScanOption { key: "sC", flag: "-sC", shape: FlagShape::Switch, accepts: is_switch },
    ScanOption { key: "T4", flag: "-T4", shape: FlagShape::Switch, accepts: is_switch },
    ScanOption { key: "v", flag: "-v", shape: FlagShape::Always, accepts: is_switch },
    ScanOption { key: "oN", flag: "-oN", shape: FlagShape::StdoutOutput, accepts: is_switch },
    ScanOption { key: "oX", flag: "-oX", shape: FlagShape::StdoutOutput, accepts: is_switch },
    ScanOption { key: "script", flag: "--script", shape: FlagShape::Value, accepts: is_script_list },
    ScanOption { key: "scriptArgs", flag: "--script-args", shape: FlagShape::Value, accepts: is_script_args },
    ScanOption { key: "topPorts", flag: "--top-ports", shape: FlagShape::Value, accepts: is_decimal },
    ScanOption { key: "maxRetries", flag: "--max-retries", shape: FlagShape::Value, accepts: is_decimal },
    ScanOption { key: "maxScanDelay", flag: "--max-scan-delay", shape: FlagShape::Value, accepts: is_time_spec },
];

pub fn scan_option(key: &str) -> Option<&'static ScanOption> {
    SCAN_OPTIONS.iter().find(|option| option.key == key)
}

/// Flags a free-text custom scan may keep. `None` means a bare switch.
const CUSTOM_FLAGS: &[(&str, Option<fn(&str) -> bool>)] = &[
    ("-Pn", None),
    ("-sT", None),
    ("-sV", None),
    ("-sC", None),
    ("-T0", None),
    ("-T1", None),
    ("-T2", None),
    ("-T3", None),
    ("-T4", None),
    ("-T5", None),
    ("-v", None),
    ("-vv", None),
    ("-F", None),
    ("-n", None),
    ("--open", None),
    ("--reason", None),
    ("--version-light", None),
    ("--version-all", None),
    ("-p", Some(is_port_spec)),
    ("-oN", Some(is_stdout)),
    ("-oX", Some(is_stdout)),
    ("--script", Some(is_script_list)),
    ("--script-args", Some(is_script_args)),
    ("--top-ports", Some(is_decimal)),
    ("--max-retries", Some(is_decimal)),
    ("--max-scan-delay", Some(is_time_spec)),
    ("--host-timeout", Some(is_time_spec)),
    ("--stats-every", Some(is_time_spec)),
];

fn is_stdout(value: &str) -> bool {
    value == "-"
}

fn is_enabled(value: &str) -> bool {
    matches!(value, "true" | "1")
}

/// A concrete invocation: program plus discrete arguments, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    /// Custom-command tokens that were stripped instead of passed on.
    pub removed: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            removed: Vec::new(),
        }
    }

    /// Leading line for the stream when privileged options were stripped.
    pub fn notice(&self) -> Option<&'static str> {
        if self.removed.iter().any(|token| is_privileged_token(token)) {
            Some(PRIVILEGED_NOTICE)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizedArgs {
    pub args: Vec<String>,
    pub removed: Vec<String>,
}

/// Filter a custom scan string through the custom allow-list. Privileged
/// flags, unknown flags, positional words and values that fail their
/// check are all dropped and reported in `removed`.
pub fn sanitize_custom_args(tokens: &[String]) -> SanitizedArgs {
    let mut out = SanitizedArgs::default();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        if is_privileged_token(token) {
            out.removed.push(token.clone());
            continue;
        }

        if let Some((_, accepts)) = CUSTOM_FLAGS.iter().find(|(flag, _)| token == flag) {
            match accepts {
                None => out.args.push(token.clone()),
                Some(accepts) => match iter.next() {
                    Some(value) if accepts(value) && !is_privileged_token(value) => {
                        out.args.push(token.clone());
                        out.args.push(value.clone());
                    }
                    Some(value) => {
                        out.removed.push(token.clone());
                        out.removed.push(value.clone());
                    }
                    None => out.removed.push(token.clone()),
                },
            }
            continue;
        }

        // Attached values: `--top-ports=100`, `-p22,80`, `-p-`.
        let attached = CUSTOM_FLAGS.iter().find_map(|(flag, accepts)| {
            let accepts = (*accepts)?;
            let rest = token.strip_prefix(flag)?;
            let value = if flag.starts_with("--") {
                rest.strip_prefix('=')?
            } else if *flag == "-p" {
                rest
            } else {
                return None;
            };
            Some(!value.is_empty() && accepts(value))
        });

        match attached {
            Some(true) => out.args.push(token.clone()),
            _ => {
                log::debug!("Dropping custom scan token not on the allow-list: {}", token);
                out.removed.push(token.clone());
            }
        }
    }

    out
}

/// Maps validated probes onto concrete program invocations.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    ping_program: String,
    traceroute_program: String,
    scan_program: String,
    stats_every: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl CommandBuilder {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            ping_program: config.ping_program.clone(),
            traceroute_program: config.traceroute_program.clone(),
            scan_program: config.scan_program.clone(),
            stats_every: config.scan_stats_every.clone(),
        }
    }

    /// The target is always the final argument.
    pub fn build(&self, request: &ProbeRequest) -> CommandLine {
        let target = request.target().to_string();

        match request.kind() {
            // Continuous: runs until cancelled.
            ProbeKind::Ping => CommandLine::new(&self.ping_program, vec![target]),
            ProbeKind::Traceroute => CommandLine::new(
                &self.traceroute_program,
                vec!["-q".to_string(), "1".to_string(), target],
            ),
            ProbeKind::Scan => self.build_scan(request),
        }
    }

    fn build_scan(&self, request: &ProbeRequest) -> CommandLine {
        let custom = request
            .option(CUSTOM_COMMAND_KEY)
            .map(str::trim)
            .filter(|custom| !custom.is_empty());

        let mut command = match custom {
            Some(custom) => self.build_custom_scan(custom),
            None => self.build_form_scan(request),
        };

        command.args.push(request.target().to_string());
        command
    }

    fn build_form_scan(&self, request: &ProbeRequest) -> CommandLine {
        let mut args = vec![self.stats_flag()];

        for key in request.options().keys() {
            if key != CUSTOM_COMMAND_KEY && scan_option(key).is_none() {
                log::debug!("Ignoring scan option not on the allow-list: {}", key);
            }
        }

        for option in SCAN_OPTIONS {
            let value = request.option(option.key).unwrap_or("");
            match option.shape {
                FlagShape::Always => args.push(option.flag.to_string()),
                FlagShape::Switch if is_enabled(value) => args.push(option.flag.to_string()),
                FlagShape::StdoutOutput if is_enabled(value) => {
                    args.push(option.flag.to_string());
                    args.push("-".to_string());
                }
                FlagShape::Value if !value.is_empty() && (option.accepts)(value) => {
                    args.push(option.flag.to_string());
                    args.push(value.to_string());
                }
                _ => {}
            }
        }

        CommandLine::new(&self.scan_program, args)
    }

    fn build_custom_scan(&self, custom: &str) -> CommandLine {
        // Validation already proved the string splits.
        let tokens = shell_words::split(custom).unwrap_or_default();
        let sanitized = sanitize_custom_args(&tokens);

        let mut args = Vec::with_capacity(sanitized.args.len() + 2);
        if !sanitized.args.iter().any(|arg| arg.starts_with("--stats-every")) {
            args.push(self.stats_flag());
        }
        args.extend(sanitized.args);

        CommandLine {
            program: self.scan_program.clone(),
            args,
            removed: sanitized.removed,
        }
    }

    /// Raw scan commands keep their argument vector; only the program is
    /// swapped for the configured scanner path.
    pub fn build_scan_command(&self, command: &ScanCommand) -> CommandLine {
        CommandLine::new(&self.scan_program, command.args().to_vec())
    }

    fn stats_flag(&self) -> String {
        format!("--stats-every={}", self.stats_every)
    }
}
