//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_LIMITS;
use crate::run::abort_reason_name;
use tracer_core::error::{AbortReason, BuildError, TracerError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingLineSensors => {
                "What happened: No line sensors were provided to the navigator.\nLikely causes: The ADC failed to initialize or was not wired into the builder.\nHow to fix: Ensure the line sensor backend is created and passed via with_line_sensors(...).".to_string()
            }
            BuildError::MissingMarkerSensors => {
                "What happened: No marker sensors were provided to the navigator.\nLikely causes: The marker channels were not wired into the builder.\nHow to fix: Pass the marker backend via with_marker_sensors(...).".to_string()
            }
            BuildError::MissingMotors => {
                "What happened: No motors were provided to the navigator.\nLikely causes: The motor driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the PWM motors are created and passed via with_motors(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range or inconsistent values in the TOML or the active profile.\nHow to fix: Edit the config file or pick another --profile, then rerun."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TracerError>() {
        match te {
            TracerError::Timeout => {
                return "What happened: Line sensor read timed out.\nLikely causes: ADC not powered, wrong SPI bus or slave select, or a stalled sampler thread.\nHow to fix: Check [pins] spi_* values and wiring, then try `tracer self-check`.".to_string();
            }
            TracerError::Abort(AbortReason::MaxRuntime) => {
                return "What happened: max run time was exceeded before the vehicle stopped.\nLikely causes: Vehicle lost the line, the finish marker was not seen, or lap_target is too high for the cap.\nHow to fix: Check markers.threshold and the finish tape; raise runner.max_run_ms or pass --max-run-ms.".to_string();
            }
            TracerError::Abort(AbortReason::Shutdown) => {
                return "What happened: Run interrupted by the operator.\nLikely causes: Ctrl-C or a termination signal.\nHow to fix: Start a new run when ready.".to_string();
            }
            TracerError::Hardware(msg) | TracerError::HardwareFault(msg) => {
                return format!(
                    "What happened: Hardware error ({msg}).\nLikely causes: Loose wiring, missing GPIO/SPI permissions, or a disconnected driver.\nHow to fix: Check wiring and permissions, then run `tracer self-check`."
                );
            }
            TracerError::Config(_) => {}
        }
        return format!(
            "What happened: {te}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = chain_text(err).to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'sensor,min,max'.".to_string();
    }

    if lower.contains("open mcp3008") || lower.contains("open motor pins") {
        return "What happened: Failed to initialize hardware.\nLikely causes: Incorrect pin or SPI numbers, SPI/PWM not enabled, or insufficient permissions.\nHow to fix: Fix [pins] in the config and make sure the process may access GPIO, SPI and PWM.".to_string();
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: A typo, a missing table, or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("unknown profile") {
        return format!(
            "What happened: {msg}.\nLikely causes: The name does not match any [[profiles]] entry.\nHow to fix: Use one of the configured profile names or drop --profile."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn chain_text(err: &eyre::Report) -> String {
    err.chain().map(ToString::to_string).collect::<Vec<_>>().join(": ")
}

fn abort_reason(err: &eyre::Report) -> Option<AbortReason> {
    match err.downcast_ref::<TracerError>() {
        Some(TracerError::Abort(reason)) => Some(*reason),
        _ => None,
    }
}

/// Stable exit codes: 2 for an operator shutdown, 4 for the run time cap,
/// 1 for anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match abort_reason(err) {
        Some(AbortReason::Shutdown) => 2,
        Some(AbortReason::MaxRuntime) => 4,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(reason) = abort_reason(err) {
        let msg = humanize(err);
        let reason_name = abort_reason_name(&reason);
        let details = match reason {
            AbortReason::MaxRuntime => LAST_LIMITS
                .get()
                .map(|l| json!({ "max_run_ms": l.max_run_ms, "lap_target": l.lap_target })),
            AbortReason::Shutdown => None,
        };
        let obj = if let Some(d) = details {
            json!({ "reason": reason_name, "details": d, "message": msg })
        } else {
            json!({ "reason": reason_name, "message": msg })
        };
        return obj.to_string();
    }

    if matches!(err.downcast_ref::<TracerError>(), Some(TracerError::Timeout)) {
        return json!({ "reason": "Timeout", "message": humanize(err) }).to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
