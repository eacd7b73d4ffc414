// CRUCIBLE DEVICE SHELL
// THE NARROW SEAM TO THE REMOTE DEVICE: ORDERED BATCH EXECUTION PLUS THE
// FRAMEWORK LIFECYCLE (STOP BEFORE A RUN, START + BOOT-WAIT AFTER).
// EVERYTHING ABOVE THIS MODULE RUNS AGAINST THE TRAIT, SO THE WHOLE
// PIPELINE IS TESTABLE WITH A SCRIPTED IN-MEMORY SHELL.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{BenchError, Result};

// ONE (STDOUT LINES, STDERR LINES, EXIT CODE) TRIPLE PER COMMAND
#[derive(Clone, Debug)]
pub struct CmdOutput {
    pub stdout:    Vec<String>,
    pub stderr:    Vec<String>,
    pub exit_code: i32,
}

pub trait DeviceShell {
    // RUN ALL COMMANDS IN ORDER WITHIN ONE LOGICAL SESSION
    fn execute(&mut self, commands: &[String]) -> Result<Vec<CmdOutput>>;

    // DEVICE FRAMEWORK LIFECYCLE
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn wait_for_boot_completion(&mut self) -> Result<()>;
}

// BATCH WRAPPER: N COMMANDS IN, EXACTLY N RESULTS OUT, OR THE SESSION IS
// IN AN UNKNOWN STATE AND THE RUN IS DEAD. NO RETRY LOGIC LIVES HERE --
// RETRY IS THE THERMAL GUARD'S JOB.
pub struct Executor<S> {
    shell: S,
}

impl<S: DeviceShell> Executor<S> {
    pub fn new(shell: S) -> Self {
        Self { shell }
    }

    pub fn shell_mut(&mut self) -> &mut S {
        &mut self.shell
    }

    pub fn execute_batch(&mut self, commands: &[String]) -> Result<Vec<CmdOutput>> {
        let results = self.shell.execute(commands)?;
        if results.len() != commands.len() {
            return Err(BenchError::Protocol {
                sent: commands.len(),
                got: results.len(),
            });
        }
        Ok(results)
    }

    pub fn start(&mut self) -> Result<()> {
        self.shell.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.shell.stop()
    }

    pub fn wait_for_boot_completion(&mut self) -> Result<()> {
        self.shell.wait_for_boot_completion()
    }
}

// ADB-BACKED SHELL FOR REAL DEVICES. ONE `adb shell` INVOCATION PER
// COMMAND, EACH POLLED AGAINST A DEADLINE -- A STUCK DEVICE MUST NOT HANG
// THE HARNESS.

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const BOOT_TIMEOUT: Duration = Duration::from_secs(180);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct AdbShell {
    serial:  Option<String>,
    timeout: Duration,
}

impl AdbShell {
    pub fn new(serial: Option<String>) -> Self {
        Self {
            serial,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn adb(&self) -> Command {
        let mut cmd = Command::new("adb");
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd
    }

    fn run_one(&self, command: &str) -> Result<CmdOutput> {
        let mut child = self
            .adb()
            .arg("shell")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BenchError::Shell(format!("failed to spawn adb: {e}")))?;

        // POLL INSTEAD OF BLOCKING -- std HAS NO wait_timeout
        let deadline = Instant::now() + self.timeout;
        loop {
            match child
                .try_wait()
                .map_err(|e| BenchError::Shell(format!("wait on adb failed: {e}")))?
            {
                Some(_) => break,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BenchError::DeviceQuery(format!(
                        "command `{command}` timed out after {:?}",
                        self.timeout
                    )));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BenchError::Shell(format!("collecting adb output failed: {e}")))?;
        Ok(CmdOutput {
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

impl DeviceShell for AdbShell {
    fn execute(&mut self, commands: &[String]) -> Result<Vec<CmdOutput>> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            results.push(self.run_one(command)?);
        }
        Ok(results)
    }

    fn start(&mut self) -> Result<()> {
        self.run_one("start")?;
        Ok(())
    }

    // CLEAR THE BOOT FLAG SO A LATER BOOT-WAIT SEES THE FRESH START
    fn stop(&mut self) -> Result<()> {
        self.run_one("stop")?;
        self.run_one("setprop sys.boot_completed 0")?;
        Ok(())
    }

    fn wait_for_boot_completion(&mut self) -> Result<()> {
        let deadline = Instant::now() + BOOT_TIMEOUT;
        loop {
            let out = self.run_one("getprop sys.boot_completed")?;
            if out.stdout.first().map(|l| l.trim()) == Some("1") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BenchError::DeviceQuery(format!(
                    "device did not finish booting within {BOOT_TIMEOUT:?}"
                )));
            }
            std::thread::sleep(BOOT_POLL_INTERVAL);
        }
    }
}

fn split_lines(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end_matches('\n');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_strips_trailing_newline() {
        assert_eq!(split_lines(b"0-7\n"), vec!["0-7"]);
    }

    #[test]
    fn split_lines_empty_output() {
        assert!(split_lines(b"").is_empty());
        assert!(split_lines(b"\n").is_empty());
    }

    #[test]
    fn split_lines_crlf() {
        assert_eq!(split_lines(b"a\r\nb\r\n"), vec!["a", "b"]);
    }

    struct CountedShell {
        produce: usize,
    }

    impl DeviceShell for CountedShell {
        fn execute(&mut self, _commands: &[String]) -> Result<Vec<CmdOutput>> {
            Ok((0..self.produce)
                .map(|_| CmdOutput {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    exit_code: 0,
                })
                .collect())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn wait_for_boot_completion(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn batch_result_count_mismatch_is_protocol_error() {
        let mut exec = Executor::new(CountedShell { produce: 1 });
        let cmds = vec!["a".to_string(), "b".to_string()];
        match exec.execute_batch(&cmds) {
            Err(BenchError::Protocol { sent: 2, got: 1 }) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn batch_matching_count_passes_through() {
        let mut exec = Executor::new(CountedShell { produce: 2 });
        let cmds = vec!["a".to_string(), "b".to_string()];
        assert_eq!(exec.execute_batch(&cmds).unwrap().len(), 2);
    }
}
