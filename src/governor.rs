// CRUCIBLE CPU GOVERNOR CONTROL
// LATENCY NUMBERS ARE ONLY COMPARABLE WITH FREQUENCY SCALING OUT OF THE
// PICTURE. PIN EVERY CPU TO THE PERFORMANCE GOVERNOR FOR THE RUN, RECORD
// WHAT WAS THERE BEFORE, AND PUT IT BACK ON EVERY EXIT PATH.

use regex::Regex;

use crate::error::{BenchError, Result};
use crate::shell::{DeviceShell, Executor};

pub const POSSIBLE_CPUS: &str = "/sys/devices/system/cpu/possible";
pub const PERFORMANCE_GOVERNOR: &str = "performance";

pub fn governor_path(cpu: u32) -> String {
    format!("/sys/devices/system/cpu/cpu{cpu}/cpufreq/scaling_governor")
}

// PARSE THE KERNEL'S `low-high` POSSIBLE-CPU RANGE. INCLUSIVE ON BOTH ENDS.
pub fn parse_cpu_range(line: &str) -> Result<(u32, u32)> {
    let re = Regex::new(r"^(\d+)-(\d+)$").expect("cpu range regex");
    let trimmed = line.trim();
    let caps = re.captures(trimmed).ok_or_else(|| {
        BenchError::DeviceQuery(format!("unparsable cpu range `{trimmed}`"))
    })?;
    let low: u32 = caps[1]
        .parse()
        .map_err(|_| BenchError::DeviceQuery(format!("cpu index out of range in `{trimmed}`")))?;
    let high: u32 = caps[2]
        .parse()
        .map_err(|_| BenchError::DeviceQuery(format!("cpu index out of range in `{trimmed}`")))?;
    if low > high {
        return Err(BenchError::DeviceQuery(format!(
            "inverted cpu range `{trimmed}`"
        )));
    }
    Ok((low, high))
}

// QUERY THE POSSIBLE RANGE OVER THE SHELL. EXACTLY ONE STDOUT LINE IS
// EXPECTED -- ANYTHING ELSE MEANS THE QUERY ITSELF IS BROKEN.
pub fn possible_range<S: DeviceShell>(exec: &mut Executor<S>) -> Result<(u32, u32)> {
    let results = exec.execute_batch(&[format!("cat {POSSIBLE_CPUS}")])?;
    let out = &results[0];
    if out.stdout.len() != 1 {
        return Err(BenchError::DeviceQuery(format!(
            "expected one line from {POSSIBLE_CPUS}, got {}",
            out.stdout.len()
        )));
    }
    parse_cpu_range(&out.stdout[0])
}

// RECORDED (CPU, PRIOR MODE) PAIRS. EMPTY MEANS NOTHING TO RESTORE.
#[derive(Default)]
pub struct GovernorController {
    saved: Vec<(u32, String)>,
}

impl GovernorController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recorded(&self) -> bool {
        !self.saved.is_empty()
    }

    // PIN EVERY CPU IN THE POSSIBLE RANGE TO PERFORMANCE. PRIOR MODES ARE
    // RECORDED ONCE -- A SECOND CALL MUST NOT OVERWRITE THE RECORD WITH
    // THE ALREADY-FORCED GOVERNOR.
    pub fn disable_scaling<S: DeviceShell>(&mut self, exec: &mut Executor<S>) -> Result<()> {
        let (low, high) = possible_range(exec)?;

        if self.saved.is_empty() {
            let reads: Vec<String> = (low..=high)
                .map(|cpu| format!("cat {}", governor_path(cpu)))
                .collect();
            let results = exec.execute_batch(&reads)?;
            for (cpu, out) in (low..=high).zip(&results) {
                // A CPU WITHOUT A READABLE GOVERNOR FILE CANNOT BE MUTATED
                // EITHER -- NOTHING TO RECORD FOR IT
                if let Some(mode) = out.stdout.first() {
                    let mode = mode.trim();
                    if !mode.is_empty() {
                        self.saved.push((cpu, mode.to_string()));
                    }
                }
            }
        }

        let writes: Vec<String> = (low..=high)
            .map(|cpu| format!("echo {PERFORMANCE_GOVERNOR} > {}", governor_path(cpu)))
            .collect();
        exec.execute_batch(&writes)?;
        Ok(())
    }

    // WRITE THE RECORDED MODES BACK. NO-OP WHEN NOTHING IS RECORDED, SO A
    // SECOND CALL IN A ROW IS HARMLESS.
    pub fn restore_scaling<S: DeviceShell>(&mut self, exec: &mut Executor<S>) -> Result<()> {
        if self.saved.is_empty() {
            return Ok(());
        }
        let writes: Vec<String> = self
            .saved
            .iter()
            .map(|(cpu, mode)| format!("echo {mode} > {}", governor_path(*cpu)))
            .collect();
        exec.execute_batch(&writes)?;
        self.saved.clear();
        Ok(())
    }
}

// SCOPED ACQUISITION: CONSTRUCTION PINS THE GOVERNOR, restore() RELEASES
// IT WITH ERROR PROPAGATION, AND DROP IS THE BACKSTOP FOR EARLY EXITS.
// A RESTORE FAILURE INSIDE DROP IS PRINTED, NOT PANICKED.
pub struct ScalingGuard<'a, S: DeviceShell> {
    exec: &'a mut Executor<S>,
    ctrl: GovernorController,
}

impl<'a, S: DeviceShell> ScalingGuard<'a, S> {
    pub fn acquire(exec: &'a mut Executor<S>) -> Result<Self> {
        let mut ctrl = GovernorController::new();
        if let Err(e) = ctrl.disable_scaling(exec) {
            // BEST-EFFORT ROLLBACK OF ANY CPU ALREADY MUTATED
            if let Err(r) = ctrl.restore_scaling(exec) {
                eprintln!("GOVERNOR ROLLBACK FAILED: {r}");
            }
            return Err(e);
        }
        Ok(Self { exec, ctrl })
    }

    pub fn exec(&mut self) -> &mut Executor<S> {
        self.exec
    }

    pub fn restore(mut self) -> Result<()> {
        self.ctrl.restore_scaling(&mut *self.exec)
    }
}

impl<S: DeviceShell> Drop for ScalingGuard<'_, S> {
    fn drop(&mut self) {
        if self.ctrl.is_recorded() {
            if let Err(e) = self.ctrl.restore_scaling(&mut *self.exec) {
                eprintln!("GOVERNOR RESTORE FAILED IN TEARDOWN: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_range_parses() {
        assert_eq!(parse_cpu_range("0-7").unwrap(), (0, 7));
        assert_eq!(parse_cpu_range(" 0-3 ").unwrap(), (0, 3));
    }

    #[test]
    fn cpu_range_rejects_single_index() {
        // A LONE `0` IS NOT A low-high RANGE
        assert!(parse_cpu_range("0").is_err());
    }

    #[test]
    fn cpu_range_rejects_garbage() {
        assert!(parse_cpu_range("").is_err());
        assert!(parse_cpu_range("0-7,9-11").is_err());
        assert!(parse_cpu_range("a-b").is_err());
    }

    #[test]
    fn cpu_range_rejects_inverted() {
        assert!(parse_cpu_range("7-0").is_err());
    }

    #[test]
    fn cpu_range_rejects_overflow() {
        assert!(parse_cpu_range("0-99999999999999999999").is_err());
    }
}
