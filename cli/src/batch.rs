//! Running a request plan against a loaded session.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use zimg_core::{Error, PromptBatch, PromptSource, Resolution};
use zimg_runtime_api::{CancelFlag, GenerationSession};

use crate::plan::Plan;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub completed: usize,
    pub skipped: usize,
    pub total: usize,
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn tally(&self) -> String {
        format!("{}/{}", self.completed, self.total)
    }
}

/// A request failed; everything after it was abandoned.
#[derive(Debug, thiserror::Error)]
#[error("image {failed_index}/{total} failed ({completed} completed before it)")]
pub struct BatchFailure {
    pub failed_index: usize,
    pub prompt: String,
    pub total: usize,
    pub completed: usize,
    #[source]
    pub source: Error,
}

/// An error with its causes, on one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut cause = err.source();
    while let Some(c) = cause {
        message.push_str(": ");
        message.push_str(&c.to_string());
        cause = c.source();
    }
    message
}

/// Load prompts and tell the user about anything left out.
pub fn load_batch(source: &PromptSource) -> zimg_core::Result<PromptBatch> {
    let batch = source.load()?;
    if let PromptSource::File(path) = source {
        println!("Loaded {} prompt(s) from {}", batch.len(), path.display());
        if !batch.skipped.is_empty() {
            let items: Vec<String> = batch.skipped.iter().map(|i| format!("#{}", i)).collect();
            println!(
                "Skipped {} item(s) without a description: {}",
                batch.skipped.len(),
                items.join(", ")
            );
        }
    }
    Ok(batch)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run every request in order. Stops at the first failure (no retries) or
/// when `cancel` is set.
pub fn run_plan(
    session: &mut GenerationSession,
    plan: &Plan,
    resolution: Resolution,
    cancel: &CancelFlag,
) -> Result<BatchOutcome, BatchFailure> {
    let mut outcome = BatchOutcome {
        total: plan.len(),
        ..Default::default()
    };

    for request in plan.requests() {
        if cancel.is_cancelled() {
            outcome.interrupted = true;
            break;
        }

        if request.problematic {
            if request.repeat_index == 1 {
                println!(
                    "Skipping prompt {}/{}: unusable after sanitizing",
                    request.prompt_index, request.prompt_total
                );
            }
            outcome.skipped += 1;
            continue;
        }

        println!(
            "\n[prompt {}/{}] [image {}/{}] (overall {}/{})",
            request.prompt_index,
            request.prompt_total,
            request.repeat_index,
            request.count,
            request.overall_index,
            request.overall_total
        );
        if request.repeat_index == 1 {
            println!("Prompt: {}", request.prompt);
        }

        let pb = spinner(format!("Generating {} on {}...", resolution, session.device()));
        let start = Instant::now();
        let result = session.generate(
            &request.prompt,
            resolution.width,
            resolution.height,
            request.seed,
            cancel,
        );
        pb.finish_and_clear();

        match result {
            Ok(result) => {
                outcome.completed += 1;
                println!("Saved: {}", result.path.display());
                println!(
                    "Seed: {} ({:.1}s)",
                    result.seed,
                    start.elapsed().as_secs_f64()
                );
            }
            Err(Error::Interrupted) => {
                outcome.interrupted = true;
                break;
            }
            Err(source) => {
                return Err(BatchFailure {
                    failed_index: request.overall_index,
                    prompt: request.prompt,
                    total: plan.len(),
                    completed: outcome.completed,
                    source,
                });
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_requests;
    use zimg_core::{ImageFormat, ResolvedDevice};
    use zimg_runtime_api::stub::{StubBehavior, StubLog, StubPipeline};

    const SMALL: Resolution = Resolution {
        width: 32,
        height: 32,
    };

    fn prompts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn session(dir: &std::path::Path, behavior: StubBehavior) -> (GenerationSession, StubLog) {
        let stub = StubPipeline::new(behavior);
        let log = stub.log();
        let session =
            GenerationSession::new(Box::new(stub), ResolvedDevice::Cpu, dir, ImageFormat::Png);
        (session, log)
    }

    fn files_under(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .map(|path| if path.is_dir() { files_under(&path) } else { 1 })
            .sum()
    }

    #[test]
    fn test_run_plan_uses_planned_seeds_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(dir.path(), StubBehavior::default());
        let plan =
            plan_requests(&prompts(&["a red fox", "a blue whale", "a green frog"]), 2, Some(100));

        let outcome = run_plan(&mut session, &plan, SMALL, &CancelFlag::new()).unwrap();

        assert_eq!(outcome.completed, 6);
        assert!(!outcome.interrupted);
        assert_eq!(log.seeds(), vec![100, 101, 102, 103, 104, 105]);
        let prompts_seen: Vec<_> = log.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts_seen[0], "a red fox");
        assert_eq!(prompts_seen[5], "a green frog");
        assert_eq!(files_under(dir.path()), 6);
    }

    #[test]
    fn test_interrupt_mid_batch_reports_partial_tally() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(
            dir.path(),
            StubBehavior {
                cancel_on_call: Some(4),
                ..Default::default()
            },
        );
        let plan = plan_requests(&prompts(&["a red fox"]), 10, Some(42));
        let cancel = CancelFlag::new();

        let outcome = run_plan(&mut session, &plan, SMALL, &cancel).unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.tally(), "3/10");
        assert_eq!(log.requests().len(), 4);
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(dir.path(), StubBehavior::default());
        let plan = plan_requests(&prompts(&["a red fox"]), 3, None);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = run_plan(&mut session, &plan, SMALL, &cancel).unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.tally(), "0/3");
        assert!(log.requests().is_empty());
    }

    #[test]
    fn test_failure_aborts_remaining_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(
            dir.path(),
            StubBehavior {
                fail_on_call: Some(3),
                ..Default::default()
            },
        );
        let plan = plan_requests(&prompts(&["a red fox", "a blue whale"]), 3, Some(7));

        let failure = run_plan(&mut session, &plan, SMALL, &CancelFlag::new()).unwrap_err();

        assert_eq!(failure.failed_index, 3);
        assert_eq!(failure.prompt, "a red fox");
        assert_eq!(failure.completed, 2);
        assert_eq!(failure.total, 6);
        assert!(matches!(failure.source, Error::GenerationFailed { seed: 9, .. }));
        assert_eq!(log.requests().len(), 3);
    }

    #[test]
    fn test_problematic_prompts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(dir.path(), StubBehavior::default());
        let plan = plan_requests(&prompts(&["{{subject}}", "a red fox"]), 2, Some(10));

        let outcome = run_plan(&mut session, &plan, SMALL, &CancelFlag::new()).unwrap();

        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(log.seeds(), vec![12, 13]);
    }
}
