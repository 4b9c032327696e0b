//! Interactive mode: one loaded pipeline, many commands.

use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use zimg_core::device::check_mps_resolution;
use zimg_core::resolution::{self, ratio_labels};
use zimg_core::{PromptBatch, Resolution, ResolvedDevice};
use zimg_runtime_api::{CancelFlag, GenerationSession};

use crate::args::PromptArgs;
use crate::batch::{error_chain, load_batch, run_plan, BatchFailure, BatchOutcome};
use crate::plan::plan_requests;

const PROMPT: &str = "zimg> ";

#[derive(Parser, Debug)]
#[command(
    name = "zimg",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct ReplLine {
    #[command(flatten)]
    args: PromptArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Status,
    Quit,
    Generate(PromptArgs),
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }

        match line.to_ascii_lowercase().as_str() {
            "help" => return Command::Help,
            "status" => return Command::Status,
            "quit" | "exit" => return Command::Quit,
            _ => {}
        }

        if !line.starts_with('-') {
            return Command::Generate(PromptArgs::literal(strip_quotes(line)));
        }

        let Some(tokens) = shlex::split(line) else {
            return Command::Invalid("unbalanced quotes".to_string());
        };
        match ReplLine::try_parse_from(tokens) {
            Ok(parsed) if parsed.args.source().is_none() => {
                Command::Invalid("missing prompt: give -p <text> or -f <file>".to_string())
            }
            Ok(parsed) => Command::Generate(parsed.args),
            Err(e) => Command::Invalid(clap_message(&e)),
        }
    }
}

/// Drop one layer of surrounding quotes, unless the quote also appears inside
/// (`"a" and "b"` is two quoted words, not one quoted prompt).
fn strip_quotes(line: &str) -> &str {
    for quote in ['"', '\''] {
        let inner = line.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote));
        if let Some(inner) = inner {
            if !inner.contains(quote) {
                return inner;
            }
        }
    }
    line
}

fn clap_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

/// The interactive defaults, threaded through every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub loaded: bool,
    pub device: ResolvedDevice,
    pub default_width: u32,
    pub default_height: u32,
    pub total_generated: usize,
}

impl SessionState {
    pub fn new(device: ResolvedDevice, resolution: Resolution) -> Self {
        Self {
            loaded: true,
            device,
            default_width: resolution.width,
            default_height: resolution.height,
            total_generated: 0,
        }
    }

    pub fn default_resolution(&self) -> Resolution {
        Resolution {
            width: self.default_width,
            height: self.default_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    Line(String),
    Interrupted,
    Eof,
}

pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<ReadLine>;
}

/// Line editing and history on a terminal.
pub struct TerminalInput {
    editor: DefaultEditor,
}

impl TerminalInput {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for TerminalInput {
    fn read_line(&mut self, prompt: &str) -> Result<ReadLine> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(ReadLine::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(ReadLine::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadLine::Eof),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug)]
pub enum Reply {
    Nothing,
    Help,
    Status,
    Generated(BatchOutcome),
    Interrupted(BatchOutcome),
    Failed(BatchFailure),
    /// The command was not run.
    Rejected(String),
    IdleInterrupt,
    Quit,
    EndOfInput,
}

impl Reply {
    pub fn ends_session(&self) -> bool {
        matches!(self, Reply::Quit | Reply::EndOfInput)
    }
}

pub struct Repl {
    session: GenerationSession,
    cancel: CancelFlag,
}

impl Repl {
    pub fn new(session: GenerationSession, cancel: CancelFlag) -> Self {
        Self { session, cancel }
    }

    pub fn step(&mut self, state: SessionState, input: ReadLine) -> (SessionState, Reply) {
        match input {
            ReadLine::Line(line) => self.handle(state, Command::parse(&line)),
            ReadLine::Interrupted => (state, Reply::IdleInterrupt),
            ReadLine::Eof => (state, Reply::EndOfInput),
        }
    }

    pub fn handle(&mut self, state: SessionState, command: Command) -> (SessionState, Reply) {
        match command {
            Command::Empty => (state, Reply::Nothing),
            Command::Help => (state, Reply::Help),
            Command::Status => (state, Reply::Status),
            Command::Quit => (state, Reply::Quit),
            Command::Invalid(message) => (state, Reply::Rejected(message)),
            Command::Generate(args) => self.generate(state, &args),
        }
    }

    fn generate(&mut self, state: SessionState, args: &PromptArgs) -> (SessionState, Reply) {
        let resolution = if args.ratio.is_some() || args.resolution.is_some() {
            match resolution::resolve(args.ratio.as_deref(), args.resolution.as_deref()) {
                Ok(resolved) => {
                    if let Some((w, h)) = resolved.aligned_from {
                        println!("Resolution {}x{} aligned to {}", w, h, resolved.resolution);
                    }
                    let r = resolved.resolution;
                    if state.device == ResolvedDevice::Mps {
                        let checked = check_mps_resolution(r.width, r.height, args.force_mps);
                        if let Err(e) = checked {
                            return (state, Reply::Rejected(e.to_string()));
                        }
                    }
                    r
                }
                Err(e) => return (state, Reply::Rejected(error_chain(&e))),
            }
        } else {
            state.default_resolution()
        };

        let Some(source) = args.source() else {
            return (state, Reply::Rejected("missing prompt".to_string()));
        };
        let batch = match load_batch(&source) {
            Ok(batch) => batch,
            Err(e) => return (state, Reply::Rejected(error_chain(&e))),
        };
        self.run_batch(state, &batch, resolution, args.count, args.seed)
    }

    /// Run an already loaded batch. An empty batch is a no-op, not an error.
    pub fn run_batch(
        &mut self,
        mut state: SessionState,
        batch: &PromptBatch,
        resolution: Resolution,
        count: u32,
        seed: Option<u64>,
    ) -> (SessionState, Reply) {
        let plan = plan_requests(&batch.prompts, count as usize, seed);
        if plan.is_empty() {
            return (state, Reply::Generated(BatchOutcome::default()));
        }

        self.cancel.reset();
        let result = run_plan(&mut self.session, &plan, resolution, &self.cancel);
        self.cancel.reset();

        match result {
            Ok(outcome) => {
                state.total_generated += outcome.completed;
                if outcome.interrupted {
                    (state, Reply::Interrupted(outcome))
                } else {
                    (state, Reply::Generated(outcome))
                }
            }
            Err(failure) => {
                state.total_generated += failure.completed;
                (state, Reply::Failed(failure))
            }
        }
    }

    pub fn render(&self, state: &SessionState, reply: &Reply) {
        match reply {
            Reply::Nothing | Reply::Quit => {}
            Reply::Help => println!("{}", help_text()),
            Reply::Status => {
                println!("Model:      {}", self.session.pipeline_name());
                println!("Device:     {}", state.device);
                println!("Resolution: {}x{}", state.default_width, state.default_height);
                println!("Output:     {}", self.session.output_dir().display());
                println!("Generated:  {}", state.total_generated);
            }
            Reply::Generated(outcome) if outcome.total == 0 => println!("Nothing to generate."),
            Reply::Generated(outcome) => {
                if outcome.total > 1 {
                    println!("\nCompleted {}", outcome.tally());
                }
            }
            Reply::Interrupted(outcome) => {
                println!("\nInterrupted: completed {}", outcome.tally());
            }
            Reply::Failed(failure) => {
                eprintln!("\nError: {}", failure);
                eprintln!("  {}", error_chain(&failure.source));
            }
            Reply::Rejected(message) => eprintln!("Error: {}", message),
            Reply::IdleInterrupt => println!("(Use 'quit' or 'exit' to leave)"),
            Reply::EndOfInput => println!("\nEnd of input, goodbye."),
        }
    }

    /// Read, run and report until `quit` or end of input.
    pub fn run(
        &mut self,
        mut state: SessionState,
        input: &mut dyn LineSource,
    ) -> Result<SessionState> {
        println!("\nInteractive mode. Type 'help' for commands, 'quit' to exit.");
        loop {
            let line = input.read_line(PROMPT)?;
            let (next, reply) = self.step(state, line);
            state = next;
            self.render(&state, &reply);
            if reply.ends_session() {
                break;
            }
        }
        if state.total_generated > 0 {
            println!("Generated {} image(s) this session.", state.total_generated);
        }
        Ok(state)
    }
}

pub fn help_text() -> String {
    let ratios: Vec<&str> = ratio_labels().collect();
    format!(
        "Commands:
  <prompt>                 generate one image with the session defaults
  -p <text> [options]      generate with options
  -f <file> [options]      generate from a .json or .txt batch file
  status                   show device, defaults and images generated
  help                     show this message
  quit | exit              leave

Options:
  -r, --ratio <RATIO>      {}
  --resolution <WxH>       explicit size, rounded down to a multiple of 16
  -n, --count <N>          images per prompt (default 1)
  -s, --seed <SEED>        base seed; the k-th image uses seed + k
  --force-mps              allow sizes above the MPS safe limit

Examples:
  a cat floating in space
  -p \"a misty mountain lake\" -r 16:9 -n 2 -s 123
  -f prompts.json --resolution 1024x768

Ctrl-C stops the current generation and returns here.",
        ratios.join(", ")
    )
}
