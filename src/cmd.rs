use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use kozi::{Chunk, InterpretResult, Vm};

/// Exit code for command line usage errors.
pub const EX_USAGE: u8 = 64;
/// Exit code when the source fails to compile.
const EX_DATAERR: u8 = 65;
/// Exit code when the program fails at runtime.
const EX_SOFTWARE: u8 = 70;
/// Exit code when the script file cannot be read.
const EX_IOERR: u8 = 74;

#[derive(Debug, Parser)]
#[command(about, version, disable_help_subcommand = true)]
pub struct Cmd {
    /// Script to run; starts a REPL when omitted.
    pub path: Option<PathBuf>,
}

impl Cmd {
    pub fn run(&self) -> ExitCode {
        match &self.path {
            Some(path) => run_file(path),
            None => crate::repl::run(),
        }
    }
}

fn run_file(path: &Path) -> ExitCode {
    let source = fs::read(path).with_context(|| format!("could not read file: {}", path.display()));
    let source = match source {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(EX_IOERR);
        }
    };

    let mut vm = Vm::new();
    let mut function = Chunk::new();
    let stdout = &mut io::stdout().lock();
    let stderr = &mut io::stderr().lock();
    match vm.interpret(&source, &mut function, stdout, stderr) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(EX_DATAERR),
        InterpretResult::RuntimeError => ExitCode::from(EX_SOFTWARE),
    }
}
