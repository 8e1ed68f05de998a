/*!
  Error types shared by the lexer, parser, assembler, and driver. Every stage
  of the pipeline threads one of these back to the compilation entry point
  rather than aborting, so a failed compilation tears down cleanly and the
  caller decides what to print.
*/

use std::io;

use string_cache::DefaultAtom;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FvmError>;

#[derive(Error, Debug)]
pub enum FvmError {
  /// The lexer could not form a token: bad character, unterminated string
  /// or comment, oversize identifier, misplaced `:` or `;`.
  #[error("syntax error on line {line}: {message}")]
  Lexical { line: usize, message: String },

  /// The parser saw a token it has no rule for.
  #[error("syntax error on line {line}: {message}")]
  Syntax { line: usize, message: String },

  #[error("redefinition of symbol: {0}")]
  DuplicateSymbol(DefaultAtom),

  #[error("undefined symbol: {0}")]
  UndefinedSymbol(DefaultAtom),

  /// Only `call` may target a call symbol; branching into the middle of a
  /// word would skip its return discipline.
  #[error("cannot branch/0branch to call: {0}")]
  BranchToCall(DefaultAtom),

  /// Catch-all for assembly-time rule violations that carry no more
  /// structure than their message.
  #[error("{0}")]
  Semantic(String),

  #[error("PC/dictionary overflow: {0}")]
  DictionaryOverflow(u16),

  #[error("invalid jump address: {0}")]
  JumpOutOfRange(u16),

  #[error("string \"{0}\" is too large ({1} > 255)")]
  StringTooLong(String, usize),

  #[error(transparent)]
  Io(#[from] io::Error),
}

impl FvmError {
  pub fn semantic(message: impl Into<String>) -> FvmError {
    FvmError::Semantic(message.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_carries_line_numbers() {
    let e = FvmError::Lexical { line: 12, message: "string terminated by EOF".to_string() };
    assert_eq!(e.to_string(), "syntax error on line 12: string terminated by EOF");
  }

  #[test]
  fn duplicate_symbol_names_the_offender() {
    let e = FvmError::DuplicateSymbol(DefaultAtom::from("doVar"));
    assert_eq!(e.to_string(), "redefinition of symbol: doVar");
  }
}
