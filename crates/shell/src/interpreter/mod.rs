//! Command interpreter
//!
//! Turns text lines into session operations. Every diagnostic meant for the
//! operator is written to the interpreter's output sink; a failing command
//! aborts on its own and the session carries on.

pub mod commands;
pub mod tokenizer;

pub use commands::{Command, HELP_TEXT};
pub use tokenizer::{DEFAULT_MAX_ARGS, TokenizeError, tokenize};

use crate::export::{list_matches, save_matches};
use crate::filter::{Filter, FilterError};
use crate::payload::{ArgumentError, expand_path, hex_arg, int_arg};
use crate::session::Session;
use crate::transfer_log::TransferEntry;
use crate::usb::{ControlSetup, IssueError, Transport};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Why a command was aborted
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unrecognised command \"{0}\"")]
    Unknown(String),

    #[error(
        "The {name} command requires at least {required} parameter(s).\n\
         For more information, check out the help command."
    )]
    TooFewArgs { name: &'static str, required: usize },

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Could not open script file {path}: {source}")]
    Script { path: String, source: io::Error },

    #[error("Could not read script file {path}: {source}")]
    ScriptRead { path: String, source: io::Error },

    #[error("Scripts cannot run other scripts (exec {0})")]
    NestedScript(String),

    #[error("Could not write \"{path}\": {source}")]
    Export { path: String, source: io::Error },

    #[error("Output error: {0}")]
    Output(#[from] io::Error),
}

/// What the session should do after a line has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterSettings {
    /// Lines must tokenize to fewer than this many arguments
    pub max_args: usize,
    pub prompt: String,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            max_args: DEFAULT_MAX_ARGS,
            prompt: "> ".to_string(),
        }
    }
}

/// Drives a [`Session`] from text commands, writing replies to `W`
pub struct Interpreter<T: Transport, W: Write> {
    session: Session<T>,
    out: W,
    settings: InterpreterSettings,
    in_script: bool,
}

impl<T: Transport, W: Write> Interpreter<T, W> {
    pub fn new(session: Session<T>, out: W, settings: InterpreterSettings) -> Self {
        Self {
            session,
            out,
            settings,
            in_script: false,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_parts(self) -> (Session<T>, W) {
        (self.session, self.out)
    }

    /// Tokenize and run one line, reporting any failure to the output sink
    ///
    /// Only a failure to write to the sink itself is returned.
    pub fn execute_line(&mut self, line: &str) -> io::Result<Flow> {
        let args = match tokenize(line, self.settings.max_args) {
            Ok(args) => args,
            Err(e) => {
                writeln!(self.out, "{}", e)?;
                return Ok(Flow::Continue);
            }
        };

        match self.dispatch(&args) {
            Ok(flow) => Ok(flow),
            Err(CommandError::Output(e)) => Err(e),
            Err(e) => {
                debug!("Command {:?} aborted: {}", args.first(), e);
                writeln!(self.out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Run an already tokenized command
    pub fn dispatch<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Flow, CommandError> {
        let Some(name) = args.first().map(|a| a.as_ref()) else {
            return Ok(Flow::Continue);
        };
        if commands::is_exit(name) {
            return Ok(Flow::Exit);
        }

        let command =
            Command::lookup(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        if args.len() < command.min_args() {
            return Err(CommandError::TooFewArgs {
                name: command.name(),
                required: command.min_args() - 1,
            });
        }

        match command {
            Command::Help => self.out.write_all(HELP_TEXT.as_bytes())?,
            Command::Select => self.select(args)?,
            Command::Ctrl => self.ctrl(args)?,
            Command::Int => {
                let endpoint = hex_arg("endpoint", args[1].as_ref())?;
                let entry = self.session.interrupt_transfer(endpoint, &args[2..])?;
                report(&mut self.out, entry)?;
            }
            Command::Bulk => {
                let endpoint = hex_arg("endpoint", args[1].as_ref())?;
                let entry = self.session.bulk_transfer(endpoint, &args[2..])?;
                report(&mut self.out, entry)?;
            }
            Command::Isoc => self.isoc(args)?,
            Command::List => {
                let filter = Filter::parse(&args[1..])?;
                list_matches(
                    &mut self.out,
                    self.session.log(),
                    self.session.arena(),
                    &filter,
                )?;
            }
            Command::Save => self.save(args)?,
            Command::Exec => {
                let path = args[1].as_ref();
                if self.in_script {
                    return Err(CommandError::NestedScript(path.to_string()));
                }
                return self.run_script(&expand_path(path));
            }
        }
        Ok(Flow::Continue)
    }

    fn select<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), CommandError> {
        let interface = int_arg("interface", args[1].as_ref())?;
        let alt = int_arg("alt setting", args[2].as_ref())?;
        self.session.select_interface(interface, alt)?;
        Ok(())
    }

    fn ctrl<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), CommandError> {
        let setup = ControlSetup {
            request_type: hex_arg("request type", args[1].as_ref())?,
            request: int_arg("request", args[2].as_ref())?,
            value: int_arg("value", args[3].as_ref())?,
            index: int_arg("index", args[4].as_ref())?,
        };
        let entry = self.session.control_transfer(setup, &args[5..])?;
        report(&mut self.out, entry)?;
        Ok(())
    }

    fn isoc<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), CommandError> {
        let endpoint = hex_arg("endpoint", args[1].as_ref())?;
        let packets = int_arg("packet count", args[2].as_ref())?;
        let packet_size = int_arg("packet size", args[3].as_ref())?;
        let entry = self
            .session
            .isochronous_transfer(endpoint, packets, packet_size, &args[4..])?;
        report(&mut self.out, entry)?;
        Ok(())
    }

    fn save<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), CommandError> {
        let path = expand_path(args[1].as_ref());
        let filter = Filter::parse(&args[2..])?;
        let count = save_matches(&path, self.session.log(), self.session.arena(), &filter)
            .map_err(|source| CommandError::Export {
                path: path.display().to_string(),
                source,
            })?;
        if count > 0 {
            writeln!(self.out, "Saved {} transfer(s) to {}", count, path.display())?;
        }
        Ok(())
    }

    /// Run every line of the script at `path`
    ///
    /// Stops early, returning [`Flow::Exit`], when a line asks to end the
    /// session.
    pub fn run_script(&mut self, path: &Path) -> Result<Flow, CommandError> {
        let script_error = |source| CommandError::Script {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(script_error)?;
        info!("Running script {}", path.display());

        self.in_script = true;
        let result = self.run_lines(BufReader::new(file), path);
        self.in_script = false;
        result
    }

    fn run_lines<R: BufRead>(&mut self, reader: R, path: &Path) -> Result<Flow, CommandError> {
        for line in reader.split(b'\n') {
            let line = line.map_err(|source| CommandError::ScriptRead {
                path: path.display().to_string(),
                source,
            })?;
            if self.execute_line(&String::from_utf8_lossy(&line))? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Prompt for and run lines from `input` until `exit`, `quit` or end of
    /// input
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than ending the
    /// session.
    pub fn run_interactive<R: BufRead>(&mut self, mut input: R) -> io::Result<()> {
        let mut line = Vec::new();
        loop {
            write!(self.out, "{}", self.settings.prompt)?;
            self.out.flush()?;

            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                writeln!(self.out)?;
                return Ok(());
            }
            if self.execute_line(&String::from_utf8_lossy(&line))? == Flow::Exit {
                return Ok(());
            }
            self.out.flush()?;
        }
    }
}

/// Tell the operator about a transfer the device refused
fn report<W: Write>(out: &mut W, entry: &TransferEntry) -> io::Result<()> {
    if let Err(e) = &entry.result {
        writeln!(out, "Transfer {} failed: {} ({})", entry.id, e, e.code())?;
    }
    Ok(())
}
