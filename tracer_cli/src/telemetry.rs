//! Telemetry sinks owned by the CLI: a JSON-lines file writer and a wrapper
//! that records per-tick wall intervals for `--stats`.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use eyre::WrapErr;
use serde_json::json;
use tracer_traits::{PerformanceSample, Telemetry};

/// Writes every `every_n`th sample as one JSON object per line.
///
/// Lines are buffered; `process()` flushes whatever was written since the
/// previous tick. A write error disables the sink instead of failing the run.
pub struct JsonlTelemetry {
    out: BufWriter<File>,
    every_n: u32,
    seen: u32,
    tick: u64,
    pending: bool,
    failed: bool,
}

impl JsonlTelemetry {
    pub fn create(path: &Path, every_n: u32) -> eyre::Result<Self> {
        let file = File::create(path)
            .wrap_err_with(|| format!("create telemetry file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            every_n: every_n.max(1),
            seen: 0,
            tick: 0,
            pending: false,
            failed: false,
        })
    }

    fn disable(&mut self, e: &std::io::Error) {
        tracing::warn!(error = %e, "telemetry write failed; disabling telemetry");
        self.failed = true;
    }
}

impl Telemetry for JsonlTelemetry {
    fn is_logging(&self) -> bool {
        !self.failed
    }

    fn log_performance(&mut self, s: &PerformanceSample) {
        self.tick += 1;
        self.seen += 1;
        if self.failed || self.seen < self.every_n {
            return;
        }
        self.seen = 0;
        let line = json!({
            "tick": self.tick,
            "position": s.position,
            "error": s.error,
            "correction": s.correction,
            "left": s.left_power,
            "right": s.right_power,
            "flags": s.state_flags,
        });
        match writeln!(self.out, "{line}") {
            Ok(()) => self.pending = true,
            Err(e) => self.disable(&e),
        }
    }

    fn process(&mut self) {
        if !self.pending || self.failed {
            return;
        }
        self.pending = false;
        if let Err(e) = self.out.flush() {
            self.disable(&e);
        }
    }
}

impl Drop for JsonlTelemetry {
    fn drop(&mut self) {
        if !self.failed {
            let _ = self.out.flush();
        }
    }
}

/// Wall-clock intervals between consecutive ticks.
#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub intervals_us: Vec<u64>,
    pub overruns: usize,
}

/// Forwards to `inner` and records the interval between `process()` calls.
/// An interval longer than one and a half periods counts as an overrun.
pub struct StatsTelemetry<T> {
    inner: T,
    stats: Rc<RefCell<TickStats>>,
    period_us: u64,
    last: Option<Instant>,
}

impl<T: Telemetry> StatsTelemetry<T> {
    pub fn new(inner: T, period_us: u64, stats: Rc<RefCell<TickStats>>) -> Self {
        Self {
            inner,
            stats,
            period_us,
            last: None,
        }
    }
}

impl<T: Telemetry> Telemetry for StatsTelemetry<T> {
    fn is_logging(&self) -> bool {
        self.inner.is_logging()
    }

    fn log_performance(&mut self, sample: &PerformanceSample) {
        self.inner.log_performance(sample);
    }

    fn process(&mut self) {
        self.inner.process();
        let now = Instant::now();
        if let Some(prev) = self.last {
            let us = u64::try_from(now.duration_since(prev).as_micros()).unwrap_or(u64::MAX);
            let mut st = self.stats.borrow_mut();
            st.intervals_us.push(us);
            if us > self.period_us.saturating_mul(3) / 2 {
                st.overruns = st.overruns.saturating_add(1);
            }
        }
        self.last = Some(now);
    }
}
