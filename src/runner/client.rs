//! Subprocess runner configuration

/// Exit code conventionally used for "temporary failure, try again"
pub const EX_TEMPFAIL: i32 = 75;

/// Configuration for the subprocess task runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Executable to run for every step
    pub command: String,

    /// Extra arguments passed before anything step-specific
    pub args: Vec<String>,

    /// Per-call timeout in seconds (a step's own timeout takes precedence)
    pub timeout_secs: u64,

    /// Exit codes treated as transient failures
    pub transient_exit_codes: Vec<i32>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: "medpipe-task".to_string(),
            args: Vec::new(),
            timeout_secs: 300,
            transient_exit_codes: vec![EX_TEMPFAIL],
        }
    }
}

impl RunnerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_transient_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.transient_exit_codes = codes;
        self
    }

    /// Split a shell-like command line on whitespace into command and args
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let command = parts.next()?;
        Some(Self::new(command).with_args(parts))
    }
}
