// CRUCIBLE BENCHMARK SUITES
// THE THREE DRIVERS (BINDER ROUNDTRIP, HWBINDER ROUNDTRIP, HWBINDER
// LATENCY) ARE ONE PIPELINE WITH A STRATEGY CONFIG: OUTPUT ENCODING,
// LABEL PREFIX, THRESHOLD TABLE, INVOCATION TEMPLATE.
//
// PER-RUN ORDER: PIN GOVERNOR -> PRE-GUARD -> EXECUTE -> PARSE -> UPLOAD
// -> POST-GUARD -> GATE -> RESTORE GOVERNOR. THE UPLOAD HAPPENS BEFORE
// THE GATE SO REGRESSIONS STAY VISIBLE IN HISTORICAL DATA, AND THE
// POST-GUARD RUNS BEFORE THE GATE SO HEAT-INDUCED NUMBERS SKIP INSTEAD
// OF RAISING FALSE REGRESSIONS.

use crate::error::{BenchError, Result};
use crate::governor::ScalingGuard;
use crate::parser::{parse_latency_report, parse_prefixed_lines};
use crate::report::{now_ns, Reporter};
use crate::shell::{DeviceShell, Executor};
use crate::thermal::ThermalGuard;
use crate::threshold::{
    binder_thresholds, hwbinder_thresholds, validate, Bitness, ThresholdTable,
};

// TOTAL FIFO ITERATIONS SPLIT ACROSS CPU PAIRS FOR THE LATENCY FAMILY
const ITERATION_BUDGET: u32 = 1000;

// TRANSPORT MODE FOR THE HWBINDER FAMILIES (-m FLAG), RUNNER-SUPPLIED
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalMode {
    Binderize,
    Passthrough,
}

impl HalMode {
    pub fn flag(self) -> &'static str {
        match self {
            HalMode::Binderize => "BINDERIZE",
            HalMode::Passthrough => "PASSTHROUGH",
        }
    }
}

// OUTPUT SHAPE THE BENCHMARK BINARY EMITS
#[derive(Clone, Debug)]
pub enum Encoding {
    // GOOGLE-BENCHMARK LINES CARRYING THIS FAMILY PREFIX
    PrefixedLines { prefix: String },
    // SINGLE JSON BLOB; PAIR/ITERATION COUNTS SIZED FROM THE CPU RANGE
    StructuredJson,
}

pub struct BenchmarkSuite {
    pub name:        &'static str,
    pub binary_stem: &'static str,
    pub series_stem: &'static str,
    pub x_axis:      &'static str,
    pub y_axis:      &'static str,
    pub encoding:    Encoding,
    pub thresholds:  ThresholdTable,
    pub hal_mode:    Option<HalMode>,
    pub system_libs: bool,
}

impl BenchmarkSuite {
    pub fn binder_roundtrip() -> Self {
        Self {
            name: "binder",
            binary_stem: "libbinder_benchmark",
            series_stem: "binder_vector_roundtrip_latency_benchmark",
            x_axis: "Message Size (Bytes)",
            y_axis: "Roundtrip Binder RPC Latency (nanoseconds)",
            encoding: Encoding::PrefixedLines {
                prefix: "BM_sendVec_binder/".to_string(),
            },
            thresholds: binder_thresholds(),
            hal_mode: None,
            system_libs: false,
        }
    }

    pub fn hwbinder_roundtrip(mode: HalMode) -> Self {
        let prefix = match mode {
            HalMode::Binderize => "BM_sendVec_binderize/",
            HalMode::Passthrough => "BM_sendVec_passthrough/",
        };
        Self {
            name: "hwbinder",
            binary_stem: "libhwbinder_benchmark",
            series_stem: "hwbinder_vector_roundtrip_latency_benchmark",
            x_axis: "Message Size (Bytes)",
            y_axis: "Roundtrip HwBinder RPC Latency (nanoseconds)",
            encoding: Encoding::PrefixedLines {
                prefix: prefix.to_string(),
            },
            thresholds: hwbinder_thresholds(),
            hal_mode: Some(mode),
            system_libs: true,
        }
    }

    // NO THRESHOLD TABLE: THE LATENCY FAMILY IS UPLOAD-ONLY, GATED SOLELY
    // BY THE INHERITANCE SENTINEL
    pub fn hwbinder_latency(mode: HalMode) -> Self {
        Self {
            name: "hwbinder-latency",
            binary_stem: "libhwbinder_latency",
            series_stem: "hwbinder_latency",
            x_axis: "hwbinder latency",
            y_axis: "Frequency",
            encoding: Encoding::StructuredJson,
            thresholds: ThresholdTable::empty(),
            hal_mode: Some(mode),
            system_libs: true,
        }
    }

    pub fn binary_path(&self, bits: Bitness) -> String {
        format!("/data/local/tmp/{0}/{1}{0}", bits.word(), self.binary_stem)
    }

    pub fn series_name(&self, bits: Bitness) -> String {
        format!("{}_{}bits", self.series_stem, bits.word())
    }

    pub fn options(&self) -> Vec<String> {
        self.hal_mode
            .map(|m| format!("hidl_hal_mode={}", m.flag()))
            .into_iter()
            .collect()
    }

    fn library_path(&self, bits: Bitness) -> String {
        let b = bits.word();
        if self.system_libs {
            format!("/system/lib{b}:/data/local/tmp/{b}/hw:/data/local/tmp/{b}:$LD_LIBRARY_PATH")
        } else {
            format!("/data/local/tmp/{b}/hw:/data/local/tmp/{b}:$LD_LIBRARY_PATH")
        }
    }

    // THE TWO-COMMAND BATCH: MARK EXECUTABLE, THEN RUN WITH THE SEARCH
    // PATHS AND FLAGS THIS FAMILY NEEDS
    pub fn commands(&self, bits: Bitness, sizing: Option<(u32, u32)>) -> Vec<String> {
        let binary = self.binary_path(bits);
        let mut run = format!("LD_LIBRARY_PATH={} {binary}", self.library_path(bits));
        if let Some((pairs, iterations)) = sizing {
            run.push_str(&format!(" -raw_data -pair {pairs} -i {iterations}"));
        }
        if let Some(mode) = self.hal_mode {
            run.push_str(&format!(" -m {}", mode.flag()));
        }
        vec![format!("chmod 755 {binary}"), run]
    }
}

// TERMINAL OUTCOME OF ONE RUN. SKIP IS DISTINCT FROM FAIL: A HOT DEVICE
// IS AN ENVIRONMENT CONDITION, NOT A REGRESSION.
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed(BenchError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "PASS",
            Outcome::Skipped(_) => "SKIP",
            Outcome::Failed(_) => "FAIL",
        }
    }
}

pub fn run_suite<S: DeviceShell>(
    exec: &mut Executor<S>,
    suite: &BenchmarkSuite,
    bits: Bitness,
    thermal: &ThermalGuard,
    reporter: &mut Reporter,
) -> Outcome {
    // GOVERNOR PINNED FOR THE WHOLE RUN, RESTORED ON EVERY EXIT PATH
    let mut guard = match ScalingGuard::acquire(exec) {
        Ok(guard) => guard,
        Err(e) => return Outcome::Failed(e),
    };
    let body = run_body(guard.exec(), suite, bits, thermal, reporter);
    let restored = guard.restore();

    match body {
        Err(e) if e.is_skip() => {
            if let Err(r) = restored {
                eprintln!("GOVERNOR RESTORE FAILED: {r}");
            }
            Outcome::Skipped(e.to_string())
        }
        Err(e) => {
            if let Err(r) = restored {
                eprintln!("GOVERNOR RESTORE FAILED: {r}");
            }
            Outcome::Failed(e)
        }
        Ok(()) => match restored {
            Ok(()) => Outcome::Passed,
            Err(e) => Outcome::Failed(e),
        },
    }
}

fn run_body<S: DeviceShell>(
    exec: &mut Executor<S>,
    suite: &BenchmarkSuite,
    bits: Bitness,
    thermal: &ThermalGuard,
    reporter: &mut Reporter,
) -> Result<()> {
    // PRE-GUARD: NEVER START A RUN ON A HOT DEVICE
    thermal.check_and_wait(exec)?;

    let sizing = match suite.encoding {
        Encoding::StructuredJson => Some(pair_sizing(exec, thermal)?),
        Encoding::PrefixedLines { .. } => None,
    };

    let commands = suite.commands(bits, sizing);
    let results = exec.execute_batch(&commands)?;
    for (cmd, out) in commands.iter().zip(&results) {
        if out.exit_code != 0 {
            return Err(BenchError::CommandFailed {
                cmd: cmd.clone(),
                code: out.exit_code,
            });
        }
    }
    let run_out = &results[1];
    if !run_out.stderr.is_empty() {
        println!("  stderr: {}", run_out.stderr.join(" / "));
    }

    match &suite.encoding {
        Encoding::PrefixedLines { prefix } => {
            let series = parse_prefixed_lines(&run_out.stdout, prefix)?;
            reporter.upload_labeled(
                &suite.series_name(bits),
                &series,
                suite.x_axis,
                suite.y_axis,
                &suite.options(),
            );

            // POST-GUARD BEFORE THE GATE: NUMBERS PRODUCED WHILE THE
            // DEVICE HEATED UP MUST SKIP, NOT FAIL
            thermal.check_and_wait(exec)?;

            let violations = validate(&series, bits, &suite.thresholds);
            if !violations.is_empty() {
                return Err(BenchError::RegressionDetected(violations));
            }
        }
        Encoding::StructuredJson => {
            let report = parse_latency_report(&run_out.stdout.join("\n"))?;
            for pair in &report.pairs {
                reporter.upload_unlabeled(
                    &suite.series_name(bits),
                    &pair.samples,
                    suite.x_axis,
                    suite.y_axis,
                    &suite.options(),
                );
            }
            thermal.check_and_wait(exec)?;
        }
    }
    Ok(())
}

// PAIRS = POSSIBLE RANGE WIDTH, ITERATIONS = BUDGET SPLIT ACROSS PAIRS
fn pair_sizing<S: DeviceShell>(
    exec: &mut Executor<S>,
    thermal: &ThermalGuard,
) -> Result<(u32, u32)> {
    let (low, high) = thermal.min_max_cpu_index(exec)?;
    let pairs = high - low;
    if pairs == 0 {
        return Err(BenchError::DeviceQuery(
            "cpu range too small to form a pair".to_string(),
        ));
    }
    Ok((pairs, ITERATION_BUDGET / pairs))
}

// PER-RUN OUTCOME JOURNAL. DUMPED AS A TABLE AT END OF SESSION.
pub struct RunEntry {
    pub suite:      &'static str,
    pub bits:       Bitness,
    pub outcome:    Outcome,
    pub elapsed_ns: u64,
}

pub struct RunLog {
    entries:  Vec<RunEntry>,
    start_ns: u64,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            start_ns: now_ns(),
        }
    }

    pub fn record(&mut self, suite: &'static str, bits: Bitness, outcome: Outcome, elapsed_ns: u64) {
        self.entries.push(RunEntry {
            suite,
            bits,
            outcome,
            elapsed_ns,
        });
    }

    // (PASSED, SKIPPED, FAILED)
    pub fn counts(&self) -> (usize, usize, usize) {
        let passed = self
            .entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Passed))
            .count();
        let skipped = self
            .entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Skipped(_)))
            .count();
        let failed = self
            .entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed(_)))
            .count();
        (passed, skipped, failed)
    }

    // SKIPS DO NOT FAIL THE PROCESS -- ONLY FAILURES DO
    pub fn exit_code(&self) -> i32 {
        let (_, _, failed) = self.counts();
        if failed > 0 { 1 } else { 0 }
    }

    pub fn dump(&self) {
        if self.entries.is_empty() {
            return;
        }
        println!(
            "\n{:<20} {:<6} {:<8} {:<10} DETAIL",
            "SUITE", "BITS", "OUTCOME", "ELAPSED_S"
        );
        println!("{}", "-".repeat(72));
        for e in &self.entries {
            let detail = match &e.outcome {
                Outcome::Passed => String::new(),
                Outcome::Skipped(reason) => reason.clone(),
                Outcome::Failed(err) => err.to_string(),
            };
            println!(
                "{:<20} {:<6} {:<8} {:<10.1} {}",
                e.suite,
                e.bits.word(),
                e.outcome.label(),
                e.elapsed_ns as f64 / 1_000_000_000.0,
                detail
            );
        }
    }

    pub fn summary(&self) {
        let (passed, skipped, failed) = self.counts();
        let elapsed_s = (now_ns() - self.start_ns) as f64 / 1_000_000_000.0;
        println!("\n{}", "=".repeat(50));
        println!("CRUCIBLE SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  PASSED:   {passed}");
        println!("  SKIPPED:  {skipped}");
        println!("  FAILED:   {failed}");
        println!("  ELAPSED:  {elapsed_s:.1}s");
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binder_commands_compose_library_paths() {
        let suite = BenchmarkSuite::binder_roundtrip();
        let cmds = suite.commands(Bitness::Bits32, None);
        assert_eq!(cmds[0], "chmod 755 /data/local/tmp/32/libbinder_benchmark32");
        assert_eq!(
            cmds[1],
            "LD_LIBRARY_PATH=/data/local/tmp/32/hw:/data/local/tmp/32:$LD_LIBRARY_PATH \
             /data/local/tmp/32/libbinder_benchmark32"
        );
    }

    #[test]
    fn hwbinder_commands_carry_system_libs_and_mode() {
        let suite = BenchmarkSuite::hwbinder_roundtrip(HalMode::Binderize);
        let cmds = suite.commands(Bitness::Bits64, None);
        assert_eq!(
            cmds[1],
            "LD_LIBRARY_PATH=/system/lib64:/data/local/tmp/64/hw:/data/local/tmp/64:\
             $LD_LIBRARY_PATH /data/local/tmp/64/libhwbinder_benchmark64 -m BINDERIZE"
        );
    }

    #[test]
    fn latency_commands_carry_pair_sizing() {
        let suite = BenchmarkSuite::hwbinder_latency(HalMode::Passthrough);
        let cmds = suite.commands(Bitness::Bits64, Some((7, 142)));
        assert!(cmds[1].ends_with(
            "/data/local/tmp/64/libhwbinder_latency64 -raw_data -pair 7 -i 142 -m PASSTHROUGH"
        ));
    }

    #[test]
    fn series_names_carry_bitness() {
        let suite = BenchmarkSuite::binder_roundtrip();
        assert_eq!(
            suite.series_name(Bitness::Bits32),
            "binder_vector_roundtrip_latency_benchmark_32bits"
        );
        assert_eq!(
            suite.series_name(Bitness::Bits64),
            "binder_vector_roundtrip_latency_benchmark_64bits"
        );
    }

    #[test]
    fn hwbinder_prefix_follows_mode() {
        let binderize = BenchmarkSuite::hwbinder_roundtrip(HalMode::Binderize);
        let passthrough = BenchmarkSuite::hwbinder_roundtrip(HalMode::Passthrough);
        match (&binderize.encoding, &passthrough.encoding) {
            (
                Encoding::PrefixedLines { prefix: b },
                Encoding::PrefixedLines { prefix: p },
            ) => {
                assert_eq!(b, "BM_sendVec_binderize/");
                assert_eq!(p, "BM_sendVec_passthrough/");
            }
            _ => panic!("roundtrip suites must use the prefixed-line encoding"),
        }
    }

    #[test]
    fn run_log_exit_code_ignores_skips() {
        let mut log = RunLog::new();
        log.record("binder", Bitness::Bits32, Outcome::Passed, 0);
        log.record(
            "hwbinder",
            Bitness::Bits64,
            Outcome::Skipped("hot".to_string()),
            0,
        );
        assert_eq!(log.counts(), (1, 1, 0));
        assert_eq!(log.exit_code(), 0);

        log.record(
            "binder",
            Bitness::Bits64,
            Outcome::Failed(BenchError::Shell("gone".to_string())),
            0,
        );
        assert_eq!(log.exit_code(), 1);
    }
}
