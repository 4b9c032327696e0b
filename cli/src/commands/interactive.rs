//! Interactive session

use anyhow::Result;
use zimg_core::{PromptBatch, Resolution};
use zimg_runtime_api::{CancelFlag, GenerationSession};

use crate::args::PromptArgs;
use crate::repl::{Repl, SessionState, TerminalInput};

/// Run the startup batch once if one was given, then hand over to the prompt
/// loop. The batch was loaded before the model, so a bad file never costs a
/// model load.
pub fn execute(
    session: GenerationSession,
    cancel: CancelFlag,
    resolution: Resolution,
    initial: Option<&PromptBatch>,
    args: &PromptArgs,
) -> Result<()> {
    let mut state = SessionState::new(session.device(), resolution);
    let mut repl = Repl::new(session, cancel);

    if let Some(batch) = initial {
        let (next, reply) = repl.run_batch(state, batch, resolution, args.count, args.seed);
        repl.render(&next, &reply);
        state = next;
    }

    let mut input = TerminalInput::new()?;
    repl.run(state, &mut input)?;
    Ok(())
}
