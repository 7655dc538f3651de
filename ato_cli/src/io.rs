//! Stdout telemetry sink and stdin operator command reader.

use std::io::{BufRead, Write};

use ato_core::Command;
use ato_traits::{BoxError, TelemetrySink};
use crossbeam_channel as xch;

/// Publishes each message as one JSON line on stdout:
/// `{"ts":"…","topic":"aquarium/pump/state","payload":"…"}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutTelemetry;

impl TelemetrySink for StdoutTelemetry {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BoxError> {
        let line = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "topic": topic,
            "payload": payload,
        });
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// Split `topic payload` at the first whitespace; the payload may be empty.
pub fn split_command_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((topic, payload)) => (topic, payload.trim()),
        None => (line, ""),
    })
}

/// Read operator commands from stdin on a detached thread.
///
/// Lines are `topic payload`, e.g. `aquarium/cmd/refill 4.5`. Unparseable
/// lines are logged and skipped. The thread ends at EOF or when the control
/// loop drops the receiver.
pub fn spawn_stdin_commands(prefix: String) -> xch::Receiver<Command> {
    let (tx, rx) = xch::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed; command input closed");
                    break;
                }
            };
            let Some((topic, payload)) = split_command_line(&line) else {
                continue;
            };
            match Command::parse(&prefix, topic, payload) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => tracing::debug!(topic, "ignoring non-command topic"),
                Err(e) => tracing::warn!(topic, error = %e, "bad command"),
            }
        }
        tracing::debug!("command input closed");
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_topic_and_payload() {
        assert_eq!(
            split_command_line("  aquarium/cmd/refill   4.5 \n"),
            Some(("aquarium/cmd/refill", "4.5"))
        );
        assert_eq!(
            split_command_line("aquarium/cmd/disable"),
            Some(("aquarium/cmd/disable", ""))
        );
        assert_eq!(split_command_line("   "), None);
        assert_eq!(split_command_line("# comment"), None);
    }
}
