mod cmd;
mod repl;

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use mimalloc::MiMalloc;

use crate::cmd::Cmd;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    match Cmd::try_parse() {
        Ok(cmd) => cmd.run(),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            ExitCode::SUCCESS
        }
        Err(_) => {
            eprintln!("Usage: kozi <path>");
            ExitCode::from(cmd::EX_USAGE)
        }
    }
}
