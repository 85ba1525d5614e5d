//! Background line-sensor sampling.
//!
//! Spawns a thread that owns the `LineSensors`, pushes whole snapshots through
//! a bounded channel, and tracks the last-ok timestamp for watchdog logic.
//! A snapshot is produced by one `read()` and moved as a value, so the control
//! loop never sees channels from two different reads.
//!
//! Safety: Each `Sampler` spawns exactly one thread that is automatically
//! shut down when the `Sampler` is dropped, preventing thread leaks.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracer_traits::{Clock, LineSensors, SensorSnapshot};

pub struct Sampler {
    rx: xch::Receiver<SensorSnapshot>,
    last_ok: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    epoch: Instant,
    clock: Arc<dyn Clock + Send + Sync>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl core::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sampler")
            .field("last_ok_ms", &self.last_ok.load(Ordering::Relaxed))
            .field("errors", &self.errors.load(Ordering::Relaxed))
            .finish()
    }
}

impl Sampler {
    /// Sample at `hz` on `clock`. The newest snapshot replaces any unread one.
    pub fn spawn<S: LineSensors + Send + 'static>(
        mut sensors: S,
        hz: u32,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let evict = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let errors = Arc::new(AtomicU64::new(0));
        let errors_clone = errors.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));
        let epoch = clock.now();
        let thread_clock = clock.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                // Immediate shutdown check (lock-free atomic)
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("Sampler thread received shutdown signal");
                    break;
                }

                match sensors.read() {
                    Ok(snapshot) => {
                        // Replace a stale unread snapshot; the consumer wants the newest.
                        // `evict` keeps the channel connected, so only Drop ends the loop.
                        if let Err(xch::TrySendError::Full(s)) = tx.try_send(snapshot) {
                            let _ = evict.try_recv();
                            let _ = tx.try_send(s);
                        }
                        let now = thread_clock.ms_since(epoch);
                        last_ok_clone.store(now, Ordering::Relaxed);
                    }
                    Err(e) => {
                        errors_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(error = %e, "line sensor read failed");
                    }
                }

                // Check shutdown before sleep to avoid unnecessary delay
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                thread_clock.sleep(period);
            }
            tracing::trace!("Sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            errors,
            epoch,
            clock,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Newest snapshot not yet consumed, if any.
    pub fn latest(&self) -> Option<SensorSnapshot> {
        self.rx.try_iter().last()
    }

    /// Block up to `timeout` for the next snapshot.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SensorSnapshot> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Milliseconds since the last successful read, measured on `now_ms`.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// Stall measured on the sampler's own clock and epoch.
    pub fn stalled_for_now(&self) -> u64 {
        self.stalled_for(self.clock.ms_since(self.epoch))
    }

    /// Failed reads since spawn.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between reads, or right after an in-flight read.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("Sampler thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "Sampler thread panicked during shutdown");
                }
            }
        }
    }
}
