// CRUCIBLE ERROR TAXONOMY
// ONE ENUM FOR EVERY WAY A RUN GOES WRONG. ThrottlingPersists IS THE ONLY
// VARIANT THAT MAPS TO A SKIP -- HEAT IS AN ENVIRONMENT CONDITION, NOT A
// CODE DEFECT. EVERYTHING ELSE FAILS THE RUN (OR THE WHOLE SETUP).

use thiserror::Error;

use crate::threshold::Violation;

#[derive(Debug, Error)]
pub enum BenchError {
    // DEVICE-STATE QUERY CAME BACK UNPARSABLE (CPU RANGE, FREQ FILES,
    // COMMAND TIMEOUT). FATAL TO SETUP.
    #[error("device query failed: {0}")]
    DeviceQuery(String),

    // BATCH RETURNED THE WRONG RESULT COUNT -- SESSION STATE UNKNOWN
    #[error("protocol error: sent {sent} commands, got {got} results")]
    Protocol { sent: usize, got: usize },

    // THERMAL STATE NEVER CLEARED WITHIN THE RETRY BUDGET
    #[error("thermal throttling persisted after {retries} re-checks")]
    ThrottlingPersists { retries: u32 },

    // BENCHMARK RAN BUT THE PLATFORM GUARANTEE IT DEPENDS ON DID NOT HOLD,
    // SO THE NUMBERS ARE MEANINGLESS
    #[error("platform invariant violated: {0}")]
    InvariantViolation(String),

    // UNPARSABLE BENCHMARK OUTPUT. ALWAYS NAMES THE OFFENDING FRAGMENT.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    // ONE OR MORE MEASUREMENTS AT OR OVER THEIR THRESHOLD.
    // CARRIES EVERY VIOLATION, NEVER JUST THE FIRST.
    #[error("{} latency threshold violation(s)", .0.len())]
    RegressionDetected(Vec<Violation>),

    // A COMMAND IN THE BENCHMARK BATCH EXITED NONZERO
    #[error("command `{cmd}` exited with code {code}")]
    CommandFailed { cmd: String, code: i32 },

    // TRANSPORT-LEVEL FAILURE REACHING THE DEVICE
    #[error("shell error: {0}")]
    Shell(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    pub fn is_skip(&self) -> bool {
        matches!(self, BenchError::ThrottlingPersists { .. })
    }
}
