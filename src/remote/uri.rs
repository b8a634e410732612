use crate::error::{Result, StbtError};
use crate::protocol::{lirc, vr};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Parsed `--control` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlUri {
    /// `none`
    None,
    /// `test`
    Test,
    /// `vr:<host>[:<port>]`
    VirtualRemote { host: String, port: u16 },
    /// `lirc:<socket_path>:<remote_name>`
    Lirc { socket: PathBuf, remote: String },
}

/// Parsed `--control-recorder` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderUri {
    /// `vr:<address>[:<port>]`; an empty address listens on every interface
    VirtualRemote { host: String, port: u16 },
    /// `lirc:<socket_path>:<remote_name>`
    Lirc { socket: PathBuf, remote: String },
    /// `file://<path>`
    File(PathBuf),
}

impl FromStr for ControlUri {
    type Err = StbtError;

    fn from_str(uri: &str) -> Result<Self> {
        let invalid = || StbtError::configuration(format!("Invalid remote control URI: \"{}\"", uri));

        if uri.eq_ignore_ascii_case("none") {
            return Ok(ControlUri::None);
        }
        if uri.eq_ignore_ascii_case("test") {
            return Ok(ControlUri::Test);
        }
        if let Some(rest) = strip_scheme(uri, "vr:") {
            let (host, port) = parse_vr(rest).ok_or_else(invalid)?;
            return Ok(ControlUri::VirtualRemote { host, port });
        }
        if let Some(rest) = strip_scheme(uri, "lirc:") {
            let (socket, remote) = parse_lirc(rest).ok_or_else(invalid)?;
            return Ok(ControlUri::Lirc { socket, remote });
        }
        Err(invalid())
    }
}

impl FromStr for RecorderUri {
    type Err = StbtError;

    fn from_str(uri: &str) -> Result<Self> {
        let invalid = || {
            StbtError::configuration(format!(
                "Invalid remote control recorder URI: \"{}\"",
                uri
            ))
        };

        if let Some(rest) = strip_scheme(uri, "vr:") {
            let (host, port) = parse_vr(rest).ok_or_else(invalid)?;
            return Ok(RecorderUri::VirtualRemote { host, port });
        }
        if let Some(rest) = strip_scheme(uri, "lirc:") {
            let (socket, remote) = parse_lirc(rest).ok_or_else(invalid)?;
            return Ok(RecorderUri::Lirc { socket, remote });
        }
        if let Some(path) = strip_scheme(uri, "file://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(RecorderUri::File(PathBuf::from(path)));
        }
        Err(invalid())
    }
}

impl fmt::Display for ControlUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlUri::None => write!(f, "none"),
            ControlUri::Test => write!(f, "test"),
            ControlUri::VirtualRemote { host, port } => write!(f, "vr:{}:{}", host, port),
            ControlUri::Lirc { socket, remote } => write!(f, "lirc:{}:{}", socket.display(), remote),
        }
    }
}

/// Case-insensitive scheme prefix match; returns what follows the scheme
fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix = uri.get(..scheme.len())?;
    prefix
        .eq_ignore_ascii_case(scheme)
        .then(|| &uri[scheme.len()..])
}

fn parse_vr(rest: &str) -> Option<(String, u16)> {
    match rest.split_once(':') {
        None => Some((rest.to_string(), vr::DEFAULT_PORT)),
        Some((host, port)) => {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some((host.to_string(), port.parse().ok()?))
        }
    }
}

fn parse_lirc(rest: &str) -> Option<(PathBuf, String)> {
    let (socket, remote) = rest.split_once(':')?;
    if remote.is_empty() {
        return None;
    }
    let socket = if socket.is_empty() {
        PathBuf::from(lirc::DEFAULT_SOCKET)
    } else {
        PathBuf::from(socket)
    };
    Some((socket, remote.to_string()))
}
