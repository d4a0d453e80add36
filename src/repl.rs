use std::borrow::Cow;
use std::io;
use std::process::ExitCode;

use reedline::{Reedline, Signal};

use kozi::{Chunk, Vm};

/// Runs the interactive loop. The `Vm` and `Chunk` persist across lines, so
/// globals and interned strings carry over; only the instruction stream is
/// reset per line.
pub fn run() -> ExitCode {
    let mut editor = Reedline::create();
    let mut vm = Vm::new();
    let mut function = Chunk::new();

    loop {
        match editor.read_line(&Prompt) {
            Ok(Signal::Success(line)) => {
                function.reset();
                let stdout = &mut io::stdout().lock();
                let stderr = &mut io::stderr().lock();
                let _ = vm.interpret(line.as_bytes(), &mut function, stdout, stderr);
            }
            Ok(Signal::CtrlC) => continue,
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("error: {err}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

struct Prompt;

impl reedline::Prompt for Prompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _: reedline::PromptEditMode) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _: reedline::PromptHistorySearch,
    ) -> Cow<str> {
        Cow::Borrowed("")
    }
}
