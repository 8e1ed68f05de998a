/*!
  The command-line driver. With a source file argument, the file is
  assembled and the resulting image written to the conventional block path;
  with no arguments, the block is loaded and executed against a raw stdio
  console. The process exit code is the machine's final status: zero for a
  clean exit, negative for an error.

  Executing machines signal "waiting for input" with a positive status; the
  driver sleeps briefly and re-enters, holding the machine (and therefore
  all of its state) across invocations.
*/

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prettytable;

mod bytecode;
mod compiler;
mod errors;
mod fvm;
mod symboltable;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;

use crate::bytecode::{Word, FORTH_BLOCK};
use crate::errors::Result;
use crate::fvm::{Console, Input, FVM, START_ADDR};

/// How long to idle between re-entries while the machine waits for input.
const POLL_SLEEP: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(version, about = "Assembler and simulator for a 16-bit dual-stack Forth CPU")]
struct Args {
  /// Forth-like assembly source to compile into the memory block. When
  /// omitted, the block is loaded and executed instead.
  source: Option<PathBuf>,
}

struct StdioConsole {
  stdin  : io::Stdin,
  stdout : io::Stdout,
}

impl Console for StdioConsole {
  fn get(&mut self) -> Input {
    let mut byte = [0u8; 1];
    match self.stdin.read(&mut byte) {
      Ok(0) => Input::Eof,
      Ok(_) => Input::Byte(byte[0]),
      Err(e) if e.kind() == io::ErrorKind::WouldBlock    => Input::NoData,
      Err(e) if e.kind() == io::ErrorKind::Interrupted   => Input::NoData,
      Err(_) => Input::Eof,
    }
  }

  fn put(&mut self, byte: u8) -> io::Result<()> {
    self.stdout.write_all(&[byte])?;
    self.stdout.flush()
  }

  fn save(&mut self, core: &[Word]) -> io::Result<()> {
    bytecode::save(Path::new(FORTH_BLOCK), core)
  }
}

fn assemble(source: &Path) -> Result<i32> {
  let text = fs::read_to_string(source)?;
  let vm = compiler::compile(&text)?;
  bytecode::save(Path::new(FORTH_BLOCK), &vm.core()[..vm.pc() as usize])?;
  Ok(0)
}

fn execute() -> Result<i32> {
  let mut vm = FVM::new(START_ADDR);
  bytecode::load(Path::new(FORTH_BLOCK), vm.core_mut())?;

  let mut console = StdioConsole {
    stdin  : io::stdin(),
    stdout : io::stdout(),
  };

  loop {
    let status = vm.run(&mut console);
    if status > 0 {
      // Waiting on input or cooperatively yielding; give the terminal a
      // moment and re-enter with all machine state intact.
      sleep(POLL_SLEEP);
      continue;
    }
    return Ok(status);
  }
}

fn main() {
  let args = Args::parse();

  let result = match &args.source {
    Some(source) => assemble(source),
    None         => execute(),
  };

  match result {
    Ok(status) => exit(status),
    Err(e) => {
      eprintln!("{}", e);
      exit(-1);
    }
  }
}
