//! Real-time priority and CPU pinning for the scheduler thread.
//!
//! Applied from inside the worker thread right after it starts, so only that
//! thread is affected. Missing privileges degrade to normal scheduling with a
//! warning instead of failing construction.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use relay_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use relay_common::error::{RelayError, RelayResult};
use tracing::{debug, info, warn};

/// What real-time setup actually applied to the calling thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeStatus {
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Apply `config` to the calling thread.
///
/// # Errors
///
/// Returns [`RelayError::Realtime`] for failures other than missing
/// privileges or nonexistent CPUs.
pub fn apply_thread_realtime(config: &RealtimeConfig) -> RelayResult<RealtimeStatus> {
    if !config.enabled {
        debug!("Real-time scheduling disabled for scheduler thread");
        return Ok(RealtimeStatus::default());
    }

    let (scheduler_policy, scheduler_priority) = set_scheduler(config.policy, config.priority)?;
    let cpu_affinity = set_cpu_affinity(&config.cpu_affinity)?;

    let status = RealtimeStatus {
        scheduler_policy,
        scheduler_priority,
        cpu_affinity,
    };
    info!(?status, "Scheduler thread real-time setup complete");
    Ok(status)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RelayResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => return Ok((Some(SchedPolicy::Other), None)),
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            requested = priority,
            clamped, "Scheduler priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!("sched_setscheduler failed with EPERM - scheduler thread runs without RT priority");
            return Ok((None, None));
        }
        return Err(RelayError::Realtime(format!(
            "sched_setscheduler failed: {err}"
        )));
    }

    Ok((Some(policy), Some(clamped)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RelayResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(
        ?policy,
        priority, "Real-time scheduling not available on this platform"
    );
    Ok((None, None))
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RelayResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| RelayError::Realtime(format!("invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => Ok(Some(cpus)),
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set - some CPUs may not exist");
            Ok(None)
        }
        Err(e) => Err(RelayError::Realtime(format!(
            "sched_setaffinity failed: {e}"
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RelayResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}
