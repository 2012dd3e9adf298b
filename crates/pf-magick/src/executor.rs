//! Runs the engine for an [`EncodingPlan`] and classifies the outcome.

use std::path::PathBuf;
use std::time::Duration;

use crate::command::ToolCommand;
use crate::plan::EncodingPlan;
use crate::tools::ENGINE;

/// Raw facts about one engine run. Consumed immediately.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub output_exists: bool,
    /// The deadline that applied to the run.
    pub timeout: Duration,
}

/// Classification of an [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Success,
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },
    MissingOutput,
    TimedOut,
}

impl ExecutionResult {
    /// Success needs a zero exit status *and* the output file.
    pub fn outcome(&self) -> ConversionOutcome {
        if self.timed_out {
            return ConversionOutcome::TimedOut;
        }
        if self.exit_code != Some(0) {
            return ConversionOutcome::Failed {
                code: self.exit_code,
                diagnostics: self.diagnostics(),
            };
        }
        if !self.output_exists {
            return ConversionOutcome::MissingOutput;
        }
        ConversionOutcome::Success
    }

    /// Captured stderr, or stdout when stderr is empty.
    pub fn diagnostics(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Convert into `Ok(())` or the error the caller should see.
    pub fn into_result(self) -> pf_core::Result<()> {
        match self.outcome() {
            ConversionOutcome::Success => Ok(()),
            ConversionOutcome::Failed { code, diagnostics } => {
                tracing::error!("{ENGINE} exited with {code:?}: {diagnostics}");
                let message = if diagnostics.is_empty() {
                    format!("exited with status {code:?}")
                } else {
                    diagnostics
                };
                Err(pf_core::Error::tool(ENGINE, message))
            }
            ConversionOutcome::MissingOutput => {
                tracing::error!("{ENGINE} exited successfully but wrote no output");
                Err(pf_core::Error::tool(ENGINE, "produced no output file"))
            }
            ConversionOutcome::TimedOut => Err(pf_core::Error::Timeout {
                tool: ENGINE.to_string(),
                after: self.timeout,
            }),
        }
    }
}

/// Spawns `<engine> <input> [flags...] <output>` under a deadline.
#[derive(Debug, Clone)]
pub struct ConversionExecutor {
    program: PathBuf,
    timeout: Duration,
    diagnostic_bytes: usize,
}

impl ConversionExecutor {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, diagnostic_bytes: usize) -> Self {
        Self {
            program: program.into(),
            timeout,
            diagnostic_bytes,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Run the plan once. No retries.
    ///
    /// # Errors
    ///
    /// Only a failure to spawn or wait for the process is an error here; exit
    /// status and timeouts are reported in the [`ExecutionResult`].
    pub async fn run(&self, plan: &EncodingPlan) -> pf_core::Result<ExecutionResult> {
        tracing::info!("Running {}", plan.command_line(&self.program));

        let run = ToolCommand::new(self.program.clone())
            .args(plan.args())
            .timeout(self.timeout)
            .capture_limit(self.diagnostic_bytes)
            .run()
            .await?;

        let output_exists = tokio::fs::try_exists(plan.output()).await.unwrap_or(false);

        Ok(ExecutionResult {
            exit_code: run.exit_code,
            stdout: run.stdout,
            stderr: run.stderr,
            timed_out: run.timed_out,
            output_exists,
            timeout: self.timeout,
        })
    }
}
