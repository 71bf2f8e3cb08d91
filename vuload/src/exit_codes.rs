use vuload_core::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed (including an early `abort_on_fail` stop).
    ThresholdsFailed = 11,

    /// The run was cancelled (Ctrl-C or `--max-duration`) before it could be judged.
    Cancelled = 13,

    /// Invalid CLI/plan input (bad flags, malformed stages or thresholds, unknown metrics).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected task failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Passed => Self::Success,
            Verdict::Failed => Self::ThresholdsFailed,
            Verdict::Cancelled => Self::Cancelled,
            // A finished run always carries a terminal verdict.
            Verdict::Pending => Self::RuntimeError,
        }
    }
}
