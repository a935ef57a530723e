use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CpuBaseline {
    cpu_time_ms: u64,
    observed_at: Instant,
}

/// Last observed cumulative CPU time per pid.
///
/// A pid seen for the first time reports 0% and is seeded for the next
/// observation. Entries are never removed: the table is bounded by the number
/// of pids the host has handed out since start, and a stale entry only costs a
/// single clamped sample if the pid is reused.
#[derive(Debug, Default)]
pub struct CpuBaselines {
    entries: HashMap<u32, CpuBaseline>,
}

impl CpuBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, pid: u32, cpu_time_ms: u64, now: Instant) -> f64 {
        let current = CpuBaseline {
            cpu_time_ms,
            observed_at: now,
        };
        let Some(prev) = self.entries.insert(pid, current) else {
            return 0.0;
        };

        let wall_ms = now.saturating_duration_since(prev.observed_at).as_secs_f64() * 1000.0;
        if wall_ms <= 0.0 {
            return 0.0;
        }
        let cpu_ms = cpu_time_ms.saturating_sub(prev.cpu_time_ms) as f64;
        let pct = cpu_ms / wall_ms * 100.0;
        if pct.is_finite() {
            pct.max(0.0)
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
