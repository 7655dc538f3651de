//! Human-readable error descriptions and structured JSON error formatting.

use ato_core::error::{AtoError, BuildError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingFloatSwitch => {
                "What happened: No float switch was provided to the controller.\nLikely causes: GPIO setup failed or the switch was not wired into the builder.\nHow to fix: Check pins.float_switch and that the process may access GPIO.".to_string()
            }
            BuildError::MissingRelay => {
                "What happened: No pump relay was provided to the controller.\nLikely causes: GPIO setup failed or the relay was not wired into the builder.\nHow to fix: Check pins.pump_relay and that the process may access GPIO.".to_string()
            }
            BuildError::MissingSensorBus => {
                "What happened: No temperature sensor bus was provided.\nLikely causes: The one-wire adapter was not created.\nHow to fix: Enable the w1-gpio overlay, or run the simulated build.".to_string()
            }
            BuildError::MissingTelemetry => {
                "What happened: No telemetry sink was provided.\nLikely causes: Internal wiring error.\nHow to fix: Report a bug with --log-level=debug output.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AtoError>() {
        return match ae {
            AtoError::InvalidCalibrationInput(msg) => format!(
                "What happened: Calibration input rejected ({msg}).\nLikely causes: Zero or negative volume, or no pump activations since the last refill.\nHow to fix: Enter the liters actually poured, after the pump has run at least once."
            ),
            AtoError::SensorUnavailable(msg) => format!(
                "What happened: Temperature probe unavailable ({msg}).\nLikely causes: Probe unplugged, wrong device id, or the w1 kernel module is not loaded.\nHow to fix: Check wiring and ls /sys/bus/w1/devices; fix temperature.*.id in the config."
            ),
            AtoError::Hardware(msg) | AtoError::HardwareFault(msg) => format!(
                "What happened: Hardware error ({msg}).\nLikely causes: Wrong pin numbers, missing GPIO permissions, or a wiring fault.\nHow to fix: Fix [pins] in the config and make sure the process may access GPIO."
            ),
            AtoError::State(msg) => format!(
                "What happened: Saved state could not be used ({msg}).\nLikely causes: The state file is corrupt or was written by another version.\nHow to fix: Move the state file aside; the controller restarts from seed calibration."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config parsing/validation
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nHow to fix: Pass --config FILE pointing at a TOML config. Original: {msg}"
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let mut cause = String::new();
        if let Some(src) = err.chain().nth(1) {
            cause = format!(" ({src})");
        }
        return format!(
            "What happened: Configuration is invalid or incomplete{cause}.\nLikely causes: Missing [pins] (float_switch, pump_relay) or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("refill csv must have headers") {
        return "Invalid headers in refill CSV. Expected 'timestamp,liters,activations'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.chain().nth(1) {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error family; anything unrecognized returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    if let Some(ae) = err.downcast_ref::<AtoError>() {
        return match ae {
            AtoError::Config(_) => 3,
            AtoError::Hardware(_) | AtoError::HardwareFault(_) | AtoError::SensorUnavailable(_) => 4,
            AtoError::InvalidCalibrationInput(_) => 5,
            AtoError::State(_) | AtoError::Io(_) => 6,
            _ => 1,
        };
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(_) => "InvalidConfig",
            _ => "MissingComponent",
        };
    }
    match err.downcast_ref::<AtoError>() {
        Some(AtoError::SensorUnavailable(_)) => "SensorUnavailable",
        Some(AtoError::InvalidCalibrationInput(_)) => "InvalidCalibrationInput",
        Some(AtoError::StuckPump { .. }) => "StuckPump",
        Some(AtoError::TelemetryUnreachable(_)) => "TelemetryUnreachable",
        Some(AtoError::Hardware(_) | AtoError::HardwareFault(_)) => "Hardware",
        Some(AtoError::Config(_)) => "Config",
        Some(AtoError::State(_)) => "State",
        Some(AtoError::Io(_)) => "Io",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn typed_errors_survive_context() {
        let r: eyre::Result<()> = Err(AtoError::InvalidCalibrationInput("refill volume must be > 0".into()))
            .wrap_err("apply refill");
        let err = r.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 5);
        assert!(humanize(&err).contains("Calibration input rejected"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "InvalidCalibrationInput");
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("something odd");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).starts_with("Something went wrong."));
    }
}
