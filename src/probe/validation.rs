use crate::error::ValidationError;
use crate::probe::command::{scan_option, CUSTOM_COMMAND_KEY};
use crate::probe::types::{ProbeKind, ProbeRequest, ScanCommand};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Characters a scan command may never contain, even though nothing is run through a shell.
pub const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '<', '>', '$', '`', '(', ')', '{', '}', '[', ']', '\n', '\r',
];

/// Scan types that need raw sockets, plus explicit privilege escalation.
pub const PRIVILEGED_FLAGS: &[&str] = &[
    "-sS", "-sU", "-sA", "-sW", "-sM", "-sN", "-sF", "-sX", "-sO", "-sY", "-sZ",
    "--privileged", "sudo",
];

/// Options that make the scanner read or write files on the server.
const FILE_OPTIONS: &[&str] = &[
    "-iL",
    "--excludefile",
    "--resume",
    "--datadir",
    "--servicedb",
    "--versiondb",
    "--script-args-file",
    "--stylesheet",
];

const OUTPUT_OPTIONS: &[&str] = &["-oN", "-oX", "-oG", "-oA", "-oS", "-oM", "-oH"];

const SCAN_PROGRAM: &str = "nmap";

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap());
static TLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2,63}$").unwrap());
static TIME_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,6}(?:\.[0-9]{1,3})?(?:ms|s|m|h)?$").unwrap());
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.,*-]+$").unwrap());

// Four dot-separated decimal groups, each 0..=255, nothing else.
pub fn is_valid_ipv4(candidate: &str) -> bool {
    let groups: Vec<&str> = candidate.split('.').collect();
    if groups.len() != 4 {
        return false;
    }

    groups.iter().all(|group| {
        !group.is_empty()
            && group.len() <= 3
            && group.bytes().all(|b| b.is_ascii_digit())
            && group.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
    })
}

pub fn is_valid_domain(candidate: &str) -> bool {
    if candidate.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = candidate.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let (tld, rest) = match labels.split_last() {
        Some(parts) => parts,
        None => return false,
    };

    TLD_RE.is_match(tld) && rest.iter().all(|label| LABEL_RE.is_match(label))
}

pub fn validate_target(target: &str) -> Result<String, ValidationError> {
    let target = target.trim();
    if is_valid_ipv4(target) || is_valid_domain(target) {
        Ok(target.to_string())
    } else {
        Err(ValidationError::InvalidTarget(target.to_string()))
    }
}

pub fn contains_forbidden_chars(text: &str) -> bool {
    text.contains(FORBIDDEN_CHARS)
}

/// Scan-type letters after `-s` that need raw sockets. nmap accepts them
/// combined (`-sSU`, `-sUV`), so any of them anywhere in the token counts.
const RAW_SOCKET_SCAN_TYPES: &[char] = &['S', 'U', 'A', 'W', 'M', 'N', 'F', 'X', 'O', 'Y', 'Z', 'I'];

/// Token match, so `-sS` never matches inside an unrelated option such as
/// `--script=http-sSomething`, and `-ss` is not `-sS`. Combined scan types,
/// a detached `-s`, single-dash `-privileged` and `--privileged=...`
/// spellings are all caught.
pub fn is_privileged_token(token: &str) -> bool {
    let listed = PRIVILEGED_FLAGS.iter().any(|flag| {
        token == *flag
            || token
                .strip_prefix(flag)
                .map(|rest| rest.starts_with('='))
                .unwrap_or(false)
    });
    if listed {
        return true;
    }

    if token == "-privileged" || token.starts_with("-privileged=") {
        return true;
    }

    // `-s` alone takes its scan type from the next token.
    if token == "-s" {
        return true;
    }

    match token.strip_prefix("-s") {
        Some(types) => types.contains(RAW_SOCKET_SCAN_TYPES),
        None => false,
    }
}

/// The first privileged token, reported together with its detached scan
/// type when it is a bare `-s`.
pub fn find_privileged_token(tokens: &[String]) -> Option<String> {
    let position = tokens.iter().position(|token| is_privileged_token(token))?;
    let token = &tokens[position];

    match (token.as_str(), tokens.get(position + 1)) {
        ("-s", Some(scan_type)) => Some(format!("-s {}", scan_type)),
        _ => Some(token.clone()),
    }
}

/// Rejects options that touch the filesystem: input lists, resume files,
/// data directories, file output and scripts loaded by path.
fn check_file_options(args: &[String]) -> Result<(), ValidationError> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let arg = arg.as_str();

        if arg.starts_with("-iL")
            || FILE_OPTIONS
                .iter()
                .any(|opt| arg == *opt || arg.starts_with(&format!("{}=", opt)))
        {
            return Err(ValidationError::DisallowedOption(arg.to_string()));
        }

        if let Some(opt) = OUTPUT_OPTIONS.iter().find(|opt| arg.starts_with(**opt)) {
            let attached = &arg[opt.len()..];
            let destination = if attached.is_empty() {
                iter.next().map(String::as_str).unwrap_or("")
            } else {
                attached
            };
            if destination != "-" {
                return Err(ValidationError::DisallowedOption(arg.to_string()));
            }
            continue;
        }

        if arg == "--script" {
            if let Some(value) = iter.peek() {
                if value.contains('/') || value.contains('\\') {
                    return Err(ValidationError::DisallowedOption(arg.to_string()));
                }
            }
        } else if let Some(value) = arg.strip_prefix("--script=") {
            if value.contains('/') || value.contains('\\') {
                return Err(ValidationError::DisallowedOption(arg.to_string()));
            }
        }
    }

    Ok(())
}

/// Validate a pre-formed scan invocation such as `nmap -sT -Pn 10.0.0.1`
/// and split it into an argument vector. Quotes are honoured so quoted
/// arguments keep their boundaries.
pub fn validate_scan_command(raw: &str) -> Result<ScanCommand, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyScanCommand);
    }

    if !raw.starts_with(&format!("{} ", SCAN_PROGRAM)) {
        return Err(ValidationError::NotAScanCommand);
    }

    if contains_forbidden_chars(raw) {
        return Err(ValidationError::ForbiddenCharacters);
    }

    let parts =
        shell_words::split(raw).map_err(|e| ValidationError::Unparseable(e.to_string()))?;

    if let Some(flag) = find_privileged_token(&parts) {
        return Err(ValidationError::PrivilegedOption(flag));
    }

    let (program, args) = match parts.split_first() {
        Some((program, args)) if program == SCAN_PROGRAM && !args.is_empty() => {
            (program.clone(), args.to_vec())
        }
        _ => return Err(ValidationError::InvalidCommand),
    };

    check_file_options(&args)?;

    Ok(ScanCommand::new(program, args))
}

pub fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.len() <= 6 && value.bytes().all(|b| b.is_ascii_digit())
}

/// nmap time specification: `500ms`, `0.5s`, `2m`, or bare seconds.
pub fn is_time_spec(value: &str) -> bool {
    TIME_SPEC_RE.is_match(value)
}

pub fn is_port_spec(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | '-' | ':' | 'T' | 'U' | 'S'))
}

pub fn is_script_list(value: &str) -> bool {
    SCRIPT_RE.is_match(value)
}

pub fn is_script_args(value: &str) -> bool {
    !value.is_empty()
        && !contains_forbidden_chars(value)
        && !value.chars().any(char::is_whitespace)
}

pub fn is_switch(value: &str) -> bool {
    matches!(value, "true" | "false" | "1" | "0" | "")
}

/// Validate a structured probe. Scan option values are checked against the
/// builder's allow-list; unknown option keys are left for the builder to drop.
pub fn validate_probe(
    kind: ProbeKind,
    target: &str,
    options: BTreeMap<String, String>,
) -> Result<ProbeRequest, ValidationError> {
    let target = validate_target(target)?;

    if kind == ProbeKind::Scan {
        for (key, value) in &options {
            if key == CUSTOM_COMMAND_KEY {
                if contains_forbidden_chars(value) {
                    return Err(ValidationError::ForbiddenCharacters);
                }
                shell_words::split(value)
                    .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
                continue;
            }

            if let Some(option) = scan_option(key) {
                if !(option.accepts)(value) {
                    return Err(ValidationError::InvalidOptionValue {
                        option: key.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
    }

    Ok(ProbeRequest::new(kind, target, options))
}

/// Validate the ping/traceroute request body, reporting problems in the
/// same order and wording the dashboard expects.
pub fn validate_network_request(
    command: Option<&str>,
    ip: Option<&str>,
    custom_endpoint: Option<&str>,
) -> Result<ProbeRequest, ValidationError> {
    let command = command.filter(|c| !c.is_empty());
    let ip = ip.map(str::trim).filter(|s| !s.is_empty());
    let custom_endpoint = custom_endpoint.map(str::trim).filter(|s| !s.is_empty());

    let command = command.ok_or(ValidationError::MissingParameters)?;

    if command == "ping" && ip.is_none() {
        return Err(ValidationError::MissingIp);
    }

    if command == "traceroute" && ip.is_none() && custom_endpoint.is_none() {
        return Err(ValidationError::MissingEndpoint);
    }

    if let Some(ip) = ip {
        if !is_valid_ipv4(ip) {
            return Err(ValidationError::InvalidIp);
        }
    }

    if let Some(endpoint) = custom_endpoint {
        if !is_valid_domain(endpoint) {
            return Err(ValidationError::InvalidDomain);
        }
    }

    let (kind, target) = match (command, ip, custom_endpoint) {
        ("ping", Some(ip), _) => (ProbeKind::Ping, ip),
        ("traceroute", _, Some(endpoint)) => (ProbeKind::Traceroute, endpoint),
        ("traceroute", Some(ip), None) => (ProbeKind::Traceroute, ip),
        _ => return Err(ValidationError::InvalidCommand),
    };

    Ok(ProbeRequest::new(kind, target.to_string(), BTreeMap::new()))
}
