//! Real-time setup for the control loop thread.
//!
//! Linux: memory locking, SCHED_FIFO and CPU pinning. macOS: memory locking
//! only. Elsewhere `--rt` is accepted and ignored. Every step is best effort:
//! a failure is logged and the run continues without it.

use crate::cli::RtLock;

/// Apply the requested real-time settings once per process.
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, cpu: Option<usize>) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| apply(prio, lock, cpu));
}

#[cfg(target_os = "linux")]
fn apply(prio: Option<i32>, lock: RtLock, cpu: Option<usize>) {
    match linux::mem_lock(lock) {
        Ok(()) => tracing::info!(lock = ?lock, "rt: memory lock applied"),
        Err(err) => tracing::warn!(error = %err, "rt: mlockall failed"),
    }
    match linux::fifo_priority(prio) {
        Ok(p) => tracing::info!(prio = p, "rt: SCHED_FIFO applied"),
        Err(err) => tracing::warn!(error = %err, requested = ?prio, "rt: SCHED_FIFO not applied"),
    }
    match linux::pin_cpu(cpu.unwrap_or(0)) {
        Ok(c) => tracing::info!(cpu = c, "rt: pinned to cpu"),
        Err(err) => tracing::warn!(error = %err, "rt: affinity not applied"),
    }
}

#[cfg(target_os = "macos")]
fn apply(_prio: Option<i32>, lock: RtLock, _cpu: Option<usize>) {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};
    let flags = match lock {
        RtLock::None => None,
        RtLock::Current => Some(MCL_CURRENT),
        RtLock::All => Some(MCL_CURRENT | MCL_FUTURE),
    };
    if let Some(flags) = flags {
        // SAFETY: mlockall has no memory-safety preconditions.
        if unsafe { mlockall(flags) } != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(error = %err, lock = ?lock, "rt: mlockall failed");
        } else {
            tracing::info!(lock = ?lock, "rt: memory lock applied");
        }
    }
    tracing::warn!("rt: SCHED_FIFO and affinity are unavailable on macOS");
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn apply(_prio: Option<i32>, _lock: RtLock, _cpu: Option<usize>) {
    tracing::warn!("rt: real-time mode is not supported on this OS");
}

#[cfg(target_os = "linux")]
mod linux {
    use crate::cli::RtLock;

    /// Capacity of cpu_set_t in CPU indices (bits).
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;
    /// CAP_SYS_NICE bit in the capability masks of /proc/self/status.
    const CAP_SYS_NICE: u64 = 1 << 23;

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: getrlimit writes a full rlimit on success.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: rc == 0 above.
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        Some(if cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", cur / 1024)
        })
    }

    fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall has no memory-safety preconditions.
        if unsafe { libc::mlockall(flags) } != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Lock memory; `All` falls back to `Current` on EPERM/ENOMEM.
    pub fn mem_lock(lock: RtLock) -> eyre::Result<()> {
        let err = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => match mlockall(libc::MCL_CURRENT) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            },
            RtLock::All => match mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) {
                Ok(()) => return Ok(()),
                Err(e) if is_retryable(&e) => match mlockall(libc::MCL_CURRENT) {
                    Ok(()) => {
                        tracing::warn!(error = %e, "rt: mlockall(current|future) failed; locked current pages only");
                        return Ok(());
                    }
                    Err(e2) => e2,
                },
                Err(e) => e,
            },
        };
        let mut msg = format!("mlockall failed: {err}");
        if is_retryable(&err) {
            if let Some(limit) = memlock_limit() {
                msg.push_str(&format!("; {limit}"));
            }
            msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
        }
        Err(eyre::eyre!(msg))
    }

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            // Unknown: let sched_setscheduler decide.
            return true;
        };
        status
            .lines()
            .filter(|l| l.starts_with("CapEff:"))
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .any(|caps| caps & CAP_SYS_NICE != 0)
    }

    /// Switch to SCHED_FIFO, clamping the priority to the system range.
    pub fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: geteuid cannot fail.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 && !has_sys_nice() {
            eyre::bail!(
                "needs CAP_SYS_NICE or root (euid {euid}); hint: 'sudo setcap cap_sys_nice=ep /path/to/tracer'"
            );
        }
        // SAFETY: plain queries.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let p = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param { sched_priority: p };
        // SAFETY: param outlives the call.
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(p)
    }

    /// Pin the process to `cpu` if the current affinity mask allows it.
    pub fn pin_cpu(cpu: usize) -> eyre::Result<usize> {
        // SAFETY: sysconf is a plain query.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu as libc::c_long >= online {
            eyre::bail!("requested CPU {cpu} >= online {online}");
        }
        if cpu >= MAX_CPUSET_BITS {
            eyre::bail!("requested CPU {cpu} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
        }
        let size = std::mem::size_of::<libc::cpu_set_t>();
        // SAFETY: cpu_set_t is plain data; all-zero is the empty set.
        let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        // SAFETY: `allowed` is a valid cpu_set_t of `size` bytes.
        if unsafe { libc::sched_getaffinity(0, size, &mut allowed) } != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        // SAFETY: cpu < MAX_CPUSET_BITS.
        if !unsafe { libc::CPU_ISSET(cpu, &allowed) } {
            eyre::bail!("CPU {cpu} not permitted by current affinity mask");
        }
        // SAFETY: as above.
        let mut desired: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        // SAFETY: cpu < MAX_CPUSET_BITS.
        unsafe { libc::CPU_SET(cpu, &mut desired) };
        // SAFETY: `desired` is a valid cpu_set_t of `size` bytes.
        if unsafe { libc::sched_setaffinity(0, size, &desired) } != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(cpu)
    }

}
