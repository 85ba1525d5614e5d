mod backend;
mod cli;
mod error_fmt;
mod rt;
mod run;
mod telemetry;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use eyre::WrapErr;
use serde_json::json;
use tracer_config::{Config, PersistedCalibration};
use tracer_core::hw_error::map_hw_error;
use tracer_core::runner::RunSummary;

use crate::backend::make_backend;
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::{RunOptions, abort_reason_name, mode_name, resolve_mode, run_navigation};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(err) = real_main(cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging);
    cfg.validate().wrap_err("invalid configuration")?;

    let csv = cli
        .calibration
        .as_deref()
        .map(|p| {
            tracer_config::load_calibration_csv(p)
                .wrap_err_with(|| format!("load calibration {}", p.display()))
        })
        .transpose()?;

    match cli.cmd {
        Commands::Run {
            max_run_ms,
            direct,
            sampler,
            profile,
            telemetry,
            calibrate,
            rt,
            stats,
        } => {
            let opts = RunOptions {
                max_run_ms,
                direct,
                sampler,
                profile,
                telemetry,
                calibrate,
                rt,
                stats,
            };
            run_cmd(&cfg, csv.as_ref(), &opts, cli.json)
        }
        Commands::Calibrate { out, spin } => calibrate_cmd(&cfg, &out, spin, cli.json),
        Commands::SelfCheck => self_check_cmd(&cfg, cli.json),
        Commands::Health => {
            let calibration = if csv.is_some() {
                "csv"
            } else if cfg.calibration.is_some() {
                "config"
            } else {
                "default"
            };
            let backend = if cfg!(feature = "hardware") { "hardware" } else { "sim" };
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "status": "ok",
                        "config": "valid",
                        "calibration": calibration,
                        "backend": backend,
                        "active_profile": cfg.active_profile,
                    })
                );
            } else {
                println!("ok: config valid, calibration {calibration}, backend {backend}");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    tracer_config::load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))
}

/// Console to stderr (pretty or JSON) plus an optional JSON file.
///
/// Level precedence: RUST_LOG, then --log-level, then [logging].level, then info.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &tracer_config::Logging) {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let console = fmt::layer().with_writer(std::io::stderr);
    layers.push(if json {
        console.json().with_filter(filter()).boxed()
    } else {
        console.with_target(false).with_filter(filter()).boxed()
    });

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path.file_name().unwrap_or(path.as_os_str());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter())
                .boxed(),
        );
    }

    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(layers).try_init();
}

fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let f = flag.clone();
    if let Err(e) = ctrlc::set_handler(move || f.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }
    flag
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn run_cmd(
    cfg: &Config,
    csv: Option<&PersistedCalibration>,
    opts: &RunOptions,
    json: bool,
) -> eyre::Result<()> {
    let backend = make_backend(cfg)?;
    let backend_name = backend.name;
    let mode = mode_name(resolve_mode(cfg, opts));
    let profile = opts.profile.clone().or_else(|| cfg.active_profile.clone());

    let result = run_navigation(cfg, csv, opts, backend, shutdown_flag());
    match result {
        Ok(s) => {
            if json {
                println!(
                    "{}",
                    result_line(Some(&s), profile.as_deref(), mode, backend_name, None)
                );
            } else {
                println!(
                    "Run complete: {} laps, {} intersections in {} ms ({} ticks)",
                    s.laps, s.intersections, s.elapsed_ms, s.ticks
                );
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let reason = match err.downcast_ref::<tracer_core::TracerError>() {
                    Some(tracer_core::TracerError::Abort(r)) => Some(abort_reason_name(r)),
                    _ => None,
                };
                println!(
                    "{}",
                    result_line(None, profile.as_deref(), mode, backend_name, reason)
                );
            }
            Err(err)
        }
    }
}

/// One JSON object on stdout describing the run.
fn result_line(
    summary: Option<&RunSummary>,
    profile: Option<&str>,
    mode: &str,
    backend: &str,
    abort_reason: Option<&str>,
) -> serde_json::Value {
    json!({
        "timestamp": unix_ms(),
        "laps": summary.map(|s| s.laps),
        "intersections": summary.map(|s| s.intersections),
        "ticks": summary.map(|s| s.ticks),
        "duration_ms": summary.map(|s| s.elapsed_ms),
        "calibration": summary.map(|s| json!({ "min": s.calibration.min, "max": s.calibration.max })),
        "profile": profile,
        "mode": mode,
        "backend": backend,
        "abort_reason": abort_reason,
    })
}

fn hw(e: &(dyn std::error::Error + Send + Sync + 'static)) -> eyre::Report {
    eyre::Report::new(map_hw_error(e))
}

/// Spin in place while the core samples the extremes, then persist them.
fn calibrate_cmd(cfg: &Config, out: &Path, spin: i32, json: bool) -> eyre::Result<()> {
    let mut backend = make_backend(cfg)?;
    let spin = tracer_core::util::clamp_power(spin);
    let e = &cfg.estimator;
    tracing::info!(samples = e.calibration_samples, delay_ms = e.calibration_delay_ms, spin, "calibration start");

    backend
        .motors
        .set_power(spin, -spin)
        .map_err(|err| hw(&*err))
        .wrap_err("start calibration spin")?;
    let sweep = tracer_core::estimator::calibrate(
        &mut backend.line,
        &*backend.clock,
        e.calibration_samples,
        Duration::from_millis(e.calibration_delay_ms),
    );
    let stopped = backend.motors.set_power(0, 0).map_err(|err| hw(&*err));
    let table = sweep?;
    stopped.wrap_err("stop calibration spin")?;

    let flat: Vec<usize> = (0..table.min.len())
        .filter(|&i| table.min[i] == table.max[i])
        .collect();
    if !flat.is_empty() {
        tracing::warn!(sensors = ?flat, "no contrast seen on some sensors; check the spin covers the line");
    }
    let persisted = PersistedCalibration::from(&table);
    tracer_config::save_calibration_csv(out, &persisted)?;

    if json {
        println!(
            "{}",
            json!({ "status": "ok", "out": out.display().to_string(), "min": table.min, "max": table.max })
        );
    } else {
        println!("Calibration saved to {}", out.display());
        for i in 0..table.min.len() {
            println!("  sensor {i}: min {} max {}", table.min[i], table.max[i]);
        }
    }
    Ok(())
}

fn self_check_cmd(cfg: &Config, json: bool) -> eyre::Result<()> {
    let mut backend = make_backend(cfg)?;
    let line = backend
        .line
        .read()
        .map_err(|err| hw(&*err))
        .wrap_err("self-check: line sensors")?;
    let markers = backend
        .markers
        .read()
        .map_err(|err| hw(&*err))
        .wrap_err("self-check: marker sensors")?;
    backend
        .motors
        .set_power(0, 0)
        .map_err(|err| hw(&*err))
        .wrap_err("self-check: motors")?;
    if json {
        println!(
            "{}",
            json!({
                "status": "ok",
                "backend": backend.name,
                "line": line,
                "markers": [markers.left, markers.right],
            })
        );
    } else {
        println!(
            "ok ({}): line {:?}, markers {}/{}",
            backend.name, line, markers.left, markers.right
        );
    }
    Ok(())
}
