use tracing::trace;

/// Default lircd socket path
pub const DEFAULT_SOCKET: &str = "/var/run/lirc/lircd";

/// Longest line accepted from lircd; its broadcasts are far shorter
pub const LIRC_MAX_LINE: usize = 4096;

/// Command line asking lircd to transmit one key press
pub fn encode_press(remote: &str, key: &str) -> String {
    format!("SEND_ONCE {} {}\n", remote, key)
}

/// Decode one line broadcast by lircd: `<code> <repeat> <key> <remote>`.
///
/// Returns the key only for the named remote and only for the initial
/// press; a held button is re-sent with an increasing repeat count and those
/// echoes are dropped. Anything else (`BEGIN`, `SIGHUP`, `END`, replies to
/// commands) is ignored.
pub fn decode_line(line: &str, remote: &str) -> Option<String> {
    let line = line.trim_end();
    trace!("lirc received: {}", line);

    let mut fields = line.split_whitespace();
    let code = fields.next()?;
    let repeat = fields.next()?;
    let key = fields.next()?;
    let name = fields.next()?;
    if fields.next().is_some() {
        return None;
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if repeat.is_empty() || !repeat.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if name != remote {
        return None;
    }

    // All digits, so only overflow can fail; a huge count is still a repeat
    let initial_press = repeat.parse::<u64>().map(|n| n == 0).unwrap_or(false);
    initial_press.then(|| key.to_string())
}
