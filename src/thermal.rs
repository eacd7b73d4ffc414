// CRUCIBLE THERMAL GUARD
// THROTTLING INVALIDATES LATENCY MEASUREMENTS. CHECK FOR IT BEFORE AND
// AFTER EVERY RUN, WAIT FOR IT TO CLEAR INSIDE A BOUNDED RETRY BUDGET,
// AND SKIP THE RUN (NEVER FAIL IT) WHEN THE DEVICE STAYS HOT.

use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::governor::possible_range;
use crate::shell::{CmdOutput, DeviceShell, Executor};

fn scaling_max_path(cpu: u32) -> String {
    format!("/sys/devices/system/cpu/cpu{cpu}/cpufreq/scaling_max_freq")
}

fn cpuinfo_max_path(cpu: u32) -> String {
    format!("/sys/devices/system/cpu/cpu{cpu}/cpufreq/cpuinfo_max_freq")
}

// CALLER-SUPPLIED RETRY BOUNDS. THE DELAY AND THE CEILING ARE KNOBS, NOT
// CONSTANTS -- DIFFERENT DEVICES COOL AT DIFFERENT RATES.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub delay:       Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

pub struct ThermalGuard {
    policy: RetryPolicy,
}

impl ThermalGuard {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    // (LOW, HIGH) POSSIBLE CPU INDICES. CALLERS SIZE PAIR AND ITERATION
    // COUNTS FROM THIS.
    pub fn min_max_cpu_index<S: DeviceShell>(
        &self,
        exec: &mut Executor<S>,
    ) -> Result<(u32, u32)> {
        possible_range(exec)
    }

    // A CPU IS THROTTLED WHEN THE KERNEL HAS PULLED ITS FREQUENCY CEILING
    // BELOW THE HARDWARE MAXIMUM. BOTH READS PER CPU GO OUT IN ONE BATCH.
    pub fn is_throttling<S: DeviceShell>(&self, exec: &mut Executor<S>) -> Result<bool> {
        let (low, high) = self.min_max_cpu_index(exec)?;
        let mut commands = Vec::with_capacity(((high - low + 1) * 2) as usize);
        for cpu in low..=high {
            commands.push(format!("cat {}", scaling_max_path(cpu)));
            commands.push(format!("cat {}", cpuinfo_max_path(cpu)));
        }
        let results = exec.execute_batch(&commands)?;
        for (i, cpu) in (low..=high).enumerate() {
            let scaling = parse_freq(&results[2 * i], &scaling_max_path(cpu))?;
            let hardware = parse_freq(&results[2 * i + 1], &cpuinfo_max_path(cpu))?;
            if scaling < hardware {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // PRE/POST RUN GATE. RETURNS THE NUMBER OF RE-CHECKS IT TOOK FOR THE
    // DEVICE TO COOL. STILL HOT AFTER THE CEILING -> ThrottlingPersists,
    // WHICH THE PIPELINE MAPS TO A SKIP.
    pub fn check_and_wait<S: DeviceShell>(&self, exec: &mut Executor<S>) -> Result<u32> {
        if !self.is_throttling(exec)? {
            return Ok(0);
        }
        for attempt in 1..=self.policy.max_retries {
            std::thread::sleep(self.policy.delay);
            if !self.is_throttling(exec)? {
                println!("  THERMAL: CLEARED AFTER {attempt} RE-CHECK(S)");
                return Ok(attempt);
            }
        }
        Err(BenchError::ThrottlingPersists {
            retries: self.policy.max_retries,
        })
    }
}

fn parse_freq(out: &CmdOutput, path: &str) -> Result<u64> {
    let line = out
        .stdout
        .first()
        .ok_or_else(|| BenchError::DeviceQuery(format!("no output from {path}")))?;
    line.trim()
        .parse()
        .map_err(|_| BenchError::DeviceQuery(format!("unparsable frequency `{line}` from {path}")))
}
