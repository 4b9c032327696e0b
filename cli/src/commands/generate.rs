//! Single-shot and batch generation

use std::process::ExitCode;

use zimg_core::{PromptBatch, Resolution};
use zimg_runtime_api::{CancelFlag, GenerationSession};

use crate::batch::{error_chain, run_plan};
use crate::plan::plan_requests;

/// How a non-interactive run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    NothingToDo,
    /// Ctrl-C is a normal way to stop a batch.
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            RunStatus::Completed | RunStatus::NothingToDo | RunStatus::Interrupted => 0,
            RunStatus::Failed => 1,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// Ends the run early when the batch has no prompts.
pub fn preflight(batch: &PromptBatch) -> Option<RunStatus> {
    if batch.is_empty() {
        println!("No prompts to generate.");
        return Some(RunStatus::NothingToDo);
    }
    None
}

/// One pass over every prompt x count, then exit.
pub fn execute(
    mut session: GenerationSession,
    cancel: &CancelFlag,
    resolution: Resolution,
    batch: &PromptBatch,
    count: u32,
    seed: Option<u64>,
) -> RunStatus {
    if let Some(status) = preflight(batch) {
        return status;
    }

    let plan = plan_requests(&batch.prompts, count as usize, seed);
    println!(
        "\nGenerating {} image(s) at {} on {}",
        plan.len(),
        resolution,
        session.device()
    );

    match run_plan(&mut session, &plan, resolution, cancel) {
        Ok(outcome) if outcome.interrupted => {
            println!("\nInterrupted: completed {}", outcome.tally());
            RunStatus::Interrupted
        }
        Ok(outcome) => {
            if outcome.skipped > 0 {
                println!("\nSkipped {} unusable request(s)", outcome.skipped);
            }
            println!("\nDone! Completed {}", outcome.tally());
            RunStatus::Completed
        }
        Err(failure) => {
            eprintln!("\nError: {}", failure);
            eprintln!("  {}", error_chain(&failure.source));
            RunStatus::Failed
        }
    }
}
