// CRUCIBLE v1.2.0 -- REMOTE LATENCY BENCHMARK DRIVER
// PINS THE DEVICE'S CPU GOVERNOR, RUNS THE NATIVE IPC BENCHMARKS OVER THE
// DEVICE SHELL, PARSES THE LATENCY OUTPUT, GATES IT AGAINST THE THRESHOLD
// TABLES, AND SHIPS EVERY SERIES TO THE PROFILING SINK.
//
// THE DEVICE IS SHARED MUTABLE STATE: GOVERNOR RESTORATION AND FRAMEWORK
// RESTART RUN ON EVERY EXIT PATH, CTRL+C INCLUDED.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use crucible::governor::{self, governor_path};
use crucible::report::{now_ns, JsonlSink, NullSink, ProfilingSink, Reporter};
use crucible::shell::{AdbShell, Executor};
use crucible::suite::{run_suite, BenchmarkSuite, HalMode, Outcome, RunLog};
use crucible::thermal::{RetryPolicy, ThermalGuard};
use crucible::threshold::{Bitness, ThresholdTable};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "CRUCIBLE -- REMOTE LATENCY BENCHMARK DRIVER")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    // RUN THE BENCHMARK SUITES AGAINST THE CONNECTED DEVICE
    Run(RunArgs),
    // VERIFY HOST TOOLS AND DEVICE STATE BEFORE A RUN
    Check(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    // DEVICE SERIAL (adb -s). DEFAULT: THE ONLY CONNECTED DEVICE
    #[arg(long)]
    serial: Option<String>,

    // COMMA-SEPARATED SUITES: binder, hwbinder, hwbinder-latency
    #[arg(long, value_delimiter = ',', default_value = "binder,hwbinder,hwbinder-latency")]
    suites: Vec<String>,

    // COMMA-SEPARATED WORD SIZES TO RUN
    #[arg(long, value_delimiter = ',', default_value = "32,64")]
    bits: Vec<u32>,

    // HWBINDER TRANSPORT MODE: binderize OR passthrough
    #[arg(long, default_value = "binderize")]
    hal_mode: String,

    // SECONDS TO WAIT BEFORE RE-CHECKING A THROTTLED DEVICE
    #[arg(long, default_value_t = 30)]
    retry_delay_secs: u64,

    // RE-CHECKS BEFORE A THROTTLED RUN IS SKIPPED
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    // PER-COMMAND SHELL TIMEOUT IN SECONDS
    #[arg(long, default_value_t = 300)]
    command_timeout_secs: u64,

    // THRESHOLD TABLE OVERRIDE (JSON: {"32": {"4": 150000, ...}, "64": {...}})
    #[arg(long)]
    thresholds: Option<PathBuf>,

    // LOCAL PROFILING SINK FILE (JSONL). OMIT TO DISCARD SERIES.
    #[arg(long)]
    sink: Option<PathBuf>,

    // DUMP THE FULL PER-RUN TABLE ON EXIT
    #[arg(long)]
    dump_log: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    serial: Option<String>,

    #[arg(long, default_value_t = 30)]
    command_timeout_secs: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    match cli.command {
        Cmd::Run(args) => cmd_run(args),
        Cmd::Check(args) => cmd_check(args),
    }
}

fn parse_hal_mode(raw: &str) -> Result<HalMode> {
    match raw.to_ascii_lowercase().as_str() {
        "binderize" => Ok(HalMode::Binderize),
        "passthrough" => Ok(HalMode::Passthrough),
        other => bail!("unknown hal mode `{other}` (binderize|passthrough)"),
    }
}

fn build_suites(names: &[String], mode: HalMode) -> Result<Vec<BenchmarkSuite>> {
    let mut suites = Vec::new();
    for name in names {
        match name.as_str() {
            "binder" => suites.push(BenchmarkSuite::binder_roundtrip()),
            "hwbinder" => suites.push(BenchmarkSuite::hwbinder_roundtrip(mode)),
            "hwbinder-latency" => suites.push(BenchmarkSuite::hwbinder_latency(mode)),
            other => bail!("unknown suite `{other}` (binder|hwbinder|hwbinder-latency)"),
        }
    }
    Ok(suites)
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mode = parse_hal_mode(&args.hal_mode)?;
    let mut suites = build_suites(&args.suites, mode)?;

    // EXTERNAL TABLE REPLACES THE SHIPPED ONE ON EVERY GATED SUITE
    if let Some(path) = &args.thresholds {
        let table = ThresholdTable::from_json_file(path)?;
        for suite in &mut suites {
            if !suite.thresholds.is_empty() {
                suite.thresholds = table.clone();
            }
        }
    }

    let mut bits_list = Vec::new();
    for word in &args.bits {
        match Bitness::from_word(*word) {
            Some(bits) => bits_list.push(bits),
            None => bail!("unsupported bitness {word} (32|64)"),
        }
    }

    let shell = AdbShell::new(args.serial.clone())
        .with_timeout(Duration::from_secs(args.command_timeout_secs));
    let mut exec = Executor::new(shell);

    let thermal = ThermalGuard::new(RetryPolicy {
        delay: Duration::from_secs(args.retry_delay_secs),
        max_retries: args.max_retries,
    });
    let sink: Box<dyn ProfilingSink> = match &args.sink {
        Some(path) => Box::new(JsonlSink::new(path.clone())),
        None => Box::new(NullSink),
    };
    let mut reporter = Reporter::new(sink);

    println!("CRUCIBLE v1.2.0");
    let (low, high) = governor::possible_range(&mut exec)?;
    println!("POSSIBLE CPUS:   {low}-{high}");
    println!("SUITES:          {}", args.suites.join(","));
    println!("HAL MODE:        {}", mode.flag());
    println!(
        "THERMAL RETRY:   {}s x {}",
        args.retry_delay_secs, args.max_retries
    );
    println!();

    // FRAMEWORK DOWN FOR THE WHOLE SESSION -- LESS SCHEDULING NOISE
    exec.stop()?;

    let mut log = RunLog::new();
    'session: for suite in &suites {
        for &bits in &bits_list {
            if SHUTDOWN.load(Ordering::Relaxed) {
                println!("INTERRUPTED -- RUNNING TEARDOWN");
                break 'session;
            }
            println!("RUNNING {} ({bits} bit)", suite.name);
            let t0 = now_ns();
            let outcome = run_suite(&mut exec, suite, bits, &thermal, &mut reporter);
            let elapsed = now_ns() - t0;

            match &outcome {
                Outcome::Passed => println!("  PASS"),
                Outcome::Skipped(reason) => println!("  SKIP: {reason}"),
                Outcome::Failed(crucible::BenchError::RegressionDetected(violations)) => {
                    println!("  FAIL: {} violation(s)", violations.len());
                    for v in violations {
                        println!("    {v}");
                    }
                }
                Outcome::Failed(e) => println!("  FAIL: {e}"),
            }
            log.record(suite.name, bits, outcome, elapsed);
        }
    }

    // FRAMEWORK BACK UP REGARDLESS OF OUTCOMES
    exec.start()?;
    exec.wait_for_boot_completion()?;

    if args.dump_log {
        log.dump();
    }
    log.summary();

    std::process::exit(log.exit_code());
}

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn cmd_check(args: CheckArgs) -> Result<()> {
    println!("CRUCIBLE PRECONDITION CHECK");
    println!();

    let mut ok = true;

    if check_tool("adb") {
        println!("  {:<28}OK", "adb");
    } else {
        println!("  {:<28}MISSING", "adb");
        println!("  Install platform-tools and put adb on PATH");
        std::process::exit(1);
    }

    let shell = AdbShell::new(args.serial.clone())
        .with_timeout(Duration::from_secs(args.command_timeout_secs));
    let mut exec = Executor::new(shell);

    match exec.execute_batch(&["echo ping".to_string()]) {
        Ok(results) if results[0].stdout.first().map(String::as_str) == Some("ping") => {
            println!("  {:<28}OK", "device shell");
        }
        _ => {
            println!("  {:<28}UNREACHABLE", "device shell");
            std::process::exit(1);
        }
    }

    match governor::possible_range(&mut exec) {
        Ok((low, high)) => {
            println!("  {:<28}OK ({low}-{high})", "possible cpus");
            let probe = format!("cat {}", governor_path(low));
            match exec.execute_batch(&[probe]) {
                Ok(results) if results[0].exit_code == 0 && !results[0].stdout.is_empty() => {
                    println!("  {:<28}OK ({})", "governor file", results[0].stdout[0].trim());
                }
                _ => {
                    println!("  {:<28}UNREADABLE", "governor file");
                    ok = false;
                }
            }
        }
        Err(e) => {
            println!("  {:<28}FAILED ({e})", "possible cpus");
            ok = false;
        }
    }

    // EVERY SUITE BINARY, BOTH WORD SIZES
    let mode = HalMode::Binderize;
    let suites = [
        BenchmarkSuite::binder_roundtrip(),
        BenchmarkSuite::hwbinder_roundtrip(mode),
        BenchmarkSuite::hwbinder_latency(mode),
    ];
    for suite in &suites {
        for bits in [Bitness::Bits32, Bitness::Bits64] {
            let binary = suite.binary_path(bits);
            let probe = format!("test -f {binary}");
            match exec.execute_batch(&[probe]) {
                Ok(results) if results[0].exit_code == 0 => {
                    println!("  {:<28}OK", binary);
                }
                _ => {
                    println!("  {:<28}MISSING", binary);
                    ok = false;
                }
            }
        }
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
        Ok(())
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }
}
