/*!
  The lexer turns a stream of source characters into typed tokens. It is a
  single forward pass with one character of push-back, tracking the line
  number for diagnostics.

  Two comment forms exist: `\` to end of line, and `( ... )` — where the
  opening parenthesis only starts a comment when followed by whitespace;
  otherwise it begins an identifier, as Forth programmers expect of words
  like `(foo)`. Strings are `"`-delimited and may not run off the end of the
  input.

  Bare words are classified in a fixed order: numeric literal first (base 10
  or `$`-prefixed base 16, with an optional leading `-`), then reserved
  keyword, then instruction mnemonic, then trailing-`:` label, and finally
  identifier.

  The lexer also polices word definition brackets: `:` inside a definition
  and `;` outside one are errors caught here rather than in the parser, so
  the `in_definition` flag lives in this struct.
*/

use std::fmt::{Display, Formatter};
use std::str::{Chars, FromStr};

use string_cache::DefaultAtom;
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::bytecode::{Mnemonic, Word};
use crate::errors::{FvmError, Result};

/// Identifiers, strings, and labels are limited to one byte under this.
pub const MAX_ID_LENGTH: usize = 256;

/// The reserved words of the source language, excluding instruction
/// mnemonics (see `Mnemonic`).
#[derive(
  StrumDisplay, IntoStaticStr, EnumString,
  Clone,        Copy,          Eq,         PartialEq, Debug, Hash,
)]
pub enum Keyword {
  #[strum(serialize = "constant")]  Constant,
  #[strum(serialize = "call")]      Call,
  #[strum(serialize = "branch")]    Branch,
  #[strum(serialize = "0branch")]   ZBranch,
  #[strum(serialize = "begin")]     Begin,
  #[strum(serialize = "while")]     While,
  #[strum(serialize = "repeat")]    Repeat,
  #[strum(serialize = "again")]     Again,
  #[strum(serialize = "until")]     Until,
  #[strum(serialize = "for")]       For,
  #[strum(serialize = "aft")]       Aft,
  #[strum(serialize = "next")]      Next,
  #[strum(serialize = "if")]        If,
  #[strum(serialize = "else")]      Else,
  #[strum(serialize = "then")]      Then,
  #[strum(serialize = ":")]         Define,
  #[strum(serialize = ";")]         EndDefine,
  #[strum(serialize = "[char]")]    Char,
  #[strum(serialize = "variable")]  Variable,
  #[strum(serialize = "location")]  Location,
  #[strum(serialize = "immediate")] Immediate,
  #[strum(serialize = "hidden")]    Hidden,
  #[strum(serialize = "inline")]    Inline,
  #[strum(serialize = "'")]         Quote,
  #[strum(serialize = ".pwd")]      Pwd,
  #[strum(serialize = ".set")]      Set,
  #[strum(serialize = ".pc")]       Pc,
  #[strum(serialize = ".mode")]     Mode,
  #[strum(serialize = ".allocate")] Allocate,
  #[strum(serialize = ".built-in")] BuiltIn,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum TokenKind {
  Literal(Word),
  Identifier(DefaultAtom),
  Label(DefaultAtom),
  Str(String),
  Keyword(Keyword),
  Instruction(Mnemonic),
  Eoi,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub line: usize,
}

impl Display for TokenKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TokenKind::Literal(n)     => write!(f, "number: {}", n),
      TokenKind::Identifier(id) => write!(f, "id: {}", id),
      TokenKind::Label(id)      => write!(f, "label: {}", id),
      TokenKind::Str(s)         => write!(f, "string: \"{}\"", s),
      TokenKind::Keyword(k)     => write!(f, "keyword: {}", k),
      TokenKind::Instruction(m) => write!(f, "instruction: {}", m),
      TokenKind::Eoi            => write!(f, "EOI"),
    }
  }
}

pub struct Lexer<'a> {
  chars         : Chars<'a>,
  pushed_back   : Option<char>,
  line          : usize,
  in_definition : bool,
}

impl<'a> Lexer<'a> {

  pub fn new(input: &'a str) -> Lexer<'a> {
    Lexer {
      chars         : input.chars(),
      pushed_back   : None,
      line          : 1,
      in_definition : false,
    }
  }

  fn next_char(&mut self) -> Option<char> {
    match self.pushed_back.take() {
      None      => self.chars.next(),
      otherwise => otherwise,
    }
  }

  fn unget_char(&mut self, c: char) {
    self.pushed_back = Some(c);
  }

  fn error(&self, message: impl Into<String>) -> FvmError {
    FvmError::Lexical { line: self.line, message: message.into() }
  }

  /// Produces the next token. Once the input is exhausted this keeps
  /// returning `Eoi`.
  pub fn next_token(&mut self) -> Result<Token> {
    loop {
      let ch = match self.next_char() {
        None    => return Ok(Token { kind: TokenKind::Eoi, line: self.line }),
        Some(c) => c,
      };

      match ch {
        '\n' => {
          self.line += 1;
        }

        c if c.is_whitespace() => {}

        '\\' => loop {
          match self.next_char() {
            None       => return Err(self.error("'\\' comment terminated by EOF")),
            Some('\n') => {
              self.line += 1;
              break;
            }
            Some(_)    => {}
          }
        },

        '(' => match self.next_char() {
          Some(c) if c.is_whitespace() => loop {
            match self.next_char() {
              None       => return Err(self.error("'(' comment terminated by EOF")),
              Some(')')  => break,
              Some('\n') => self.line += 1,
              Some(_)    => {}
            }
          },
          other => {
            // Not a comment after all; the parenthesis begins a word.
            if let Some(c) = other {
              self.unget_char(c);
            }
            return self.word(ch);
          }
        },

        '"' => {
          let mut text = String::new();
          loop {
            match self.next_char() {
              None      => return Err(self.error("string terminated by EOF")),
              Some('"') => break,
              Some(c)   => {
                if text.len() >= MAX_ID_LENGTH - 1 {
                  return Err(self.error(format!("string too large: {}", text)));
                }
                text.push(c);
              }
            }
          }
          return Ok(Token { kind: TokenKind::Str(text), line: self.line });
        }

        c if c.is_ascii_graphic() => return self.word(c),

        c => return Err(self.error(format!("invalid character: {}", c))),
      }
    }
  }

  /// Accumulates a bare word starting with `first` and classifies it.
  fn word(&mut self, first: char) -> Result<Token> {
    let mut id = String::new();
    id.push(first);

    while let Some(c) = self.next_char() {
      if !c.is_ascii_graphic() {
        self.unget_char(c);
        break;
      }
      if id.len() >= MAX_ID_LENGTH - 1 {
        return Err(self.error(format!("identifier too large: {}", id)));
      }
      id.push(c);
    }

    let line = self.line;

    if let Some(number) = parse_number(&id) {
      return Ok(Token { kind: TokenKind::Literal(number), line });
    }

    if let Ok(keyword) = Keyword::from_str(&id) {
      match keyword {
        Keyword::Define => {
          if self.in_definition {
            return Err(self.error("nested definitions are not allowed"));
          }
          self.in_definition = true;
        }
        Keyword::EndDefine => {
          if !self.in_definition {
            return Err(self.error("use of ';' not terminating word definition"));
          }
          self.in_definition = false;
        }
        _ => {}
      }
      return Ok(Token { kind: TokenKind::Keyword(keyword), line });
    }

    if let Ok(mnemonic) = Mnemonic::from_str(&id) {
      return Ok(Token { kind: TokenKind::Instruction(mnemonic), line });
    }

    if id.len() > 1 && id.ends_with(':') {
      let trimmed = &id[..id.len() - 1];
      return Ok(Token { kind: TokenKind::Label(DefaultAtom::from(trimmed)), line });
    }

    Ok(Token { kind: TokenKind::Identifier(DefaultAtom::from(&*id)), line })
  }
}

/**
  Parses a word as a signed 16-bit literal: base 10, or base 16 with a `$`
  prefix, optionally negated by a leading `-`. Accumulation wraps at 32 bits
  and the result truncates to 16. Returns `None` when the word is not a
  number at all.
*/
fn parse_number(s: &str) -> Option<Word> {
  let bytes = s.as_bytes();
  if bytes.is_empty() {
    return None;
  }

  let mut start = 0;
  let mut base: u32 = 10;
  let mut negate = false;

  if bytes[0] == b'-' {
    if bytes.len() == 1 {
      return None;
    }
    negate = true;
    start = 1;
  }
  if bytes[start] == b'$' {
    base = 16;
    if start + 1 >= bytes.len() {
      return None;
    }
    start += 1;
  }

  let digits = &bytes[start..];
  let numeric = digits.iter().all(|&c| match base {
    10 => c.is_ascii_digit(),
    _  => c.is_ascii_hexdigit(),
  });
  if !numeric {
    return None;
  }

  let mut out: u32 = 0;
  for &c in digits {
    out = out.wrapping_mul(base).wrapping_add((c as char).to_digit(16).unwrap());
  }
  if negate {
    out = out.wrapping_neg();
  }
  Some(out as Word)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(input);
    let mut result = Vec::new();
    loop {
      let token = lexer.next_token().unwrap();
      if token.kind == TokenKind::Eoi {
        return result;
      }
      result.push(token.kind);
    }
  }

  fn first_error(input: &str) -> FvmError {
    let mut lexer = Lexer::new(input);
    loop {
      match lexer.next_token() {
        Err(e) => return e,
        Ok(Token { kind: TokenKind::Eoi, .. }) => panic!("lexed cleanly"),
        Ok(_) => {}
      }
    }
  }

  #[test]
  fn numbers_in_both_bases() {
    assert_eq!(kinds("42"), vec![TokenKind::Literal(42)]);
    assert_eq!(kinds("$ff"), vec![TokenKind::Literal(255)]);
    assert_eq!(kinds("-1"), vec![TokenKind::Literal(0xFFFF)]);
    assert_eq!(kinds("-$10"), vec![TokenKind::Literal(0xFFF0)]);
    assert_eq!(kinds("65536"), vec![TokenKind::Literal(0)]);
  }

  #[test]
  fn almost_numbers_are_identifiers() {
    assert_eq!(kinds("1a"), vec![TokenKind::Identifier(DefaultAtom::from("1a"))]);
    assert_eq!(kinds("$"), vec![TokenKind::Identifier(DefaultAtom::from("$"))]);
    assert_eq!(kinds("-"), vec![TokenKind::Identifier(DefaultAtom::from("-"))]);
  }

  #[test]
  fn keywords_and_instructions_win_over_identifiers() {
    assert_eq!(kinds("begin"), vec![TokenKind::Keyword(Keyword::Begin)]);
    assert_eq!(kinds(".built-in"), vec![TokenKind::Keyword(Keyword::BuiltIn)]);
    assert_eq!(kinds("dup"), vec![TokenKind::Instruction(Mnemonic::Dup)]);
    assert_eq!(kinds("u<"), vec![TokenKind::Instruction(Mnemonic::ULess)]);
    assert_eq!(kinds("tx!"), vec![TokenKind::Instruction(Mnemonic::Tx)]);
  }

  #[test]
  fn trailing_colon_makes_a_label() {
    assert_eq!(kinds("loop:"), vec![TokenKind::Label(DefaultAtom::from("loop"))]);
    // A bare colon is the definition keyword, not a label.
    assert_eq!(kinds(": x ;"), vec![
      TokenKind::Keyword(Keyword::Define),
      TokenKind::Identifier(DefaultAtom::from("x")),
      TokenKind::Keyword(Keyword::EndDefine),
    ]);
  }

  #[test]
  fn comments_are_skipped() {
    assert_eq!(kinds("\\ ignore me\n7"), vec![TokenKind::Literal(7)]);
    assert_eq!(kinds("( ignore me ) 7"), vec![TokenKind::Literal(7)]);
  }

  #[test]
  fn paren_without_whitespace_is_an_identifier() {
    assert_eq!(kinds("(foo)"), vec![TokenKind::Identifier(DefaultAtom::from("(foo)"))]);
  }

  #[test]
  fn strings_capture_their_text() {
    assert_eq!(kinds("\"hello world\""), vec![TokenKind::Str("hello world".to_string())]);
  }

  #[test]
  fn unterminated_forms_are_lexical_errors() {
    assert!(matches!(first_error("\"abc"), FvmError::Lexical { .. }));
    assert!(matches!(first_error("( abc"), FvmError::Lexical { .. }));
    assert!(matches!(first_error("\\ abc"), FvmError::Lexical { .. }));
  }

  #[test]
  fn definition_brackets_must_balance() {
    assert!(matches!(first_error(";"), FvmError::Lexical { .. }));
    assert!(matches!(first_error(": a : b"), FvmError::Lexical { .. }));
  }

  #[test]
  fn line_numbers_advance() {
    let mut lexer = Lexer::new("1\n2\n\n3");
    assert_eq!(lexer.next_token().unwrap().line, 1);
    assert_eq!(lexer.next_token().unwrap().line, 2);
    assert_eq!(lexer.next_token().unwrap().line, 4);
  }

  #[test]
  fn oversize_identifiers_are_rejected() {
    let long = "x".repeat(MAX_ID_LENGTH);
    assert!(matches!(first_error(&long), FvmError::Lexical { .. }));
  }
}
