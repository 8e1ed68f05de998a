/*!

This module parses a token stream into an abstract syntax tree of
statements.

The grammar, roughly:

```text
program    := statements EOI
statements := statement*
statement  := ("call" | "branch" | "0branch") target
            | ("constant" | "variable" | "location") ident (literal | string) ["hidden"]
            | "if" statements ["else" statements] "then"
            | "begin" statements ("again" | "until" | "while" statements "repeat")
            | "for" statements ["aft" statements "then" statements] "next"
            | ":" (ident | string) statements ";" {"immediate" | "hidden" | "inline"}*
            | "[char]" ident
            | "'" (ident | string)
            | ".pwd" (literal | ident)
            | ".set" (ident | literal) (ident | literal | string)
            | ".pc" (literal | ident)
            | ".mode" literal
            | ".allocate" (literal | ident)
            | ".built-in"
            | literal | label | ident | INSTRUCTION
```

The parser is recursive descent with a single token of lookahead. Each
alternative of `statement` becomes one `Statement` variant carrying its
operands by value; tokens are consumed into the tree and never revisited.
Flag keywords after a definition set bits on the owning node, and setting
the same bit twice is a syntax error.

*/

use string_cache::DefaultAtom;

use crate::bytecode::{Mnemonic, Word};
use crate::errors::{FvmError, Result};
use super::lexer::{Keyword, Lexer, Token, TokenKind};

// Word definition flag bits, stored on `Statement::Definition` and shifted
// into the header cell's top three bits by the assembler.
pub const FLAG_HIDDEN:    u16 = 1 << 0;
pub const FLAG_IMMEDIATE: u16 = 1 << 1;
pub const FLAG_INLINE:    u16 = 1 << 2;

/// A jump target or address operand: either a bare number or a name to be
/// resolved against the symbol table at assembly time.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Target {
  Literal(Word),
  Name(DefaultAtom),
}

/// The initializer of a `constant`, `variable`, or `location`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Value {
  Number(Word),
  Str(String),
}

/// The right-hand side of a `.set`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum SetValue {
  Number(Word),
  Name(DefaultAtom),
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Statement {
  Label(DefaultAtom),
  Branch(Target),
  ZBranch(Target),
  Call(Target),
  Constant { name: DefaultAtom, value: Value, hidden: bool },
  Variable { name: DefaultAtom, value: Value, hidden: bool },
  Location { name: DefaultAtom, value: Value },
  Literal(Word),
  Instruction(Mnemonic),
  If { then_branch: Vec<Statement>, else_branch: Option<Vec<Statement>> },
  BeginUntil(Vec<Statement>),
  BeginAgain(Vec<Statement>),
  BeginWhileRepeat { condition: Vec<Statement>, body: Vec<Statement> },
  ForNext(Vec<Statement>),
  ForAftThenNext { setup: Vec<Statement>, aft: Vec<Statement>, tail: Vec<Statement> },
  Definition { name: DefaultAtom, body: Vec<Statement>, bits: u16 },
  CharLiteral(u8),
  Quote(DefaultAtom),
  /// A bare identifier: call the word, or push the value of the constant or
  /// variable it names.
  CallWord(DefaultAtom),
  SetPwd(Target),
  Set { address: Target, value: SetValue },
  SetPc(Target),
  Mode(Word),
  Allocate(Target),
  BuiltIn,
}

struct Parser<'a> {
  lexer : Lexer<'a>,
  token : Token,
}

/// Parses source text into a statement sequence, or the first error met.
pub fn parse(input: &str) -> Result<Vec<Statement>> {
  let mut lexer = Lexer::new(input);
  let token = lexer.next_token()?;
  let mut parser = Parser { lexer, token };

  let program = parser.statements()?;
  match parser.token.kind {
    TokenKind::Eoi => Ok(program),
    _              => Err(parser.unexpected("expected end of input")),
  }
}

impl<'a> Parser<'a> {

  /// Consumes the current token, returning it, and pulls the next one from
  /// the lexer.
  fn advance(&mut self) -> Result<Token> {
    let next = self.lexer.next_token()?;
    Ok(std::mem::replace(&mut self.token, next))
  }

  fn accept(&mut self, keyword: Keyword) -> Result<bool> {
    match self.token.kind {
      TokenKind::Keyword(k) if k == keyword => {
        self.advance()?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  fn expect(&mut self, keyword: Keyword) -> Result<()> {
    match self.accept(keyword)? {
      true  => Ok(()),
      false => Err(self.unexpected(&format!("expected `{}`", keyword))),
    }
  }

  fn unexpected(&self, expected: &str) -> FvmError {
    FvmError::Syntax {
      line: self.token.line,
      message: format!("unexpected token ({}); {}", self.token.kind, expected),
    }
  }

  /// An identifier, with strings admitted as identifiers when `strings` is
  /// set — definition names, quote, and jump targets may be quoted to use
  /// spellings the lexer would otherwise classify.
  fn name(&mut self, strings: bool) -> Result<DefaultAtom> {
    match &self.token.kind {
      TokenKind::Identifier(_)          => {}
      TokenKind::Str(_) if strings      => {}
      _ => return Err(self.unexpected("expected an identifier")),
    }
    match self.advance()?.kind {
      TokenKind::Identifier(id) => Ok(id),
      TokenKind::Str(s)         => Ok(DefaultAtom::from(&*s)),
      _                         => unreachable!(),
    }
  }

  /// literal | string | identifier
  fn target(&mut self) -> Result<Target> {
    match &self.token.kind {
      TokenKind::Literal(_) => match self.advance()?.kind {
        TokenKind::Literal(n) => Ok(Target::Literal(n)),
        _                     => unreachable!(),
      },
      TokenKind::Identifier(_) | TokenKind::Str(_) => Ok(Target::Name(self.name(true)?)),
      _ => Err(self.unexpected("expected a jump target")),
    }
  }

  /// literal | identifier
  fn literal_or_name(&mut self) -> Result<Target> {
    match &self.token.kind {
      TokenKind::Literal(_) => self.target(),
      TokenKind::Identifier(_) => Ok(Target::Name(self.name(false)?)),
      _ => Err(self.unexpected("expected a literal or identifier")),
    }
  }

  fn initializer(&mut self) -> Result<Value> {
    match self.token.kind {
      TokenKind::Literal(_) | TokenKind::Str(_) => match self.advance()?.kind {
        TokenKind::Literal(n) => Ok(Value::Number(n)),
        TokenKind::Str(s)     => Ok(Value::Str(s)),
        _                     => unreachable!(),
      },
      _ => Err(self.unexpected("expected a literal or string")),
    }
  }

  fn statements(&mut self) -> Result<Vec<Statement>> {
    let mut result = Vec::new();
    loop {
      let statement = match &self.token.kind {

        TokenKind::Keyword(Keyword::Call) => {
          self.advance()?;
          Statement::Call(self.target()?)
        }

        TokenKind::Keyword(Keyword::Branch) => {
          self.advance()?;
          Statement::Branch(self.target()?)
        }

        TokenKind::Keyword(Keyword::ZBranch) => {
          self.advance()?;
          Statement::ZBranch(self.target()?)
        }

        TokenKind::Literal(n) => {
          let n = *n;
          self.advance()?;
          Statement::Literal(n)
        }

        TokenKind::Label(_) => match self.advance()?.kind {
          TokenKind::Label(id) => Statement::Label(id),
          _                    => unreachable!(),
        },

        TokenKind::Keyword(Keyword::Constant) => {
          self.advance()?;
          let name = self.name(false)?;
          let value = self.initializer()?;
          let hidden = self.accept(Keyword::Hidden)?;
          Statement::Constant { name, value, hidden }
        }

        TokenKind::Keyword(Keyword::Variable) => {
          self.advance()?;
          let name = self.name(false)?;
          let value = self.initializer()?;
          let hidden = self.accept(Keyword::Hidden)?;
          Statement::Variable { name, value, hidden }
        }

        TokenKind::Keyword(Keyword::Location) => {
          self.advance()?;
          let name = self.name(false)?;
          let value = self.initializer()?;
          // A location is unconditionally hidden; the flag is tolerated.
          self.accept(Keyword::Hidden)?;
          Statement::Location { name, value }
        }

        TokenKind::Keyword(Keyword::If) => {
          self.advance()?;
          self.if_statement()?
        }

        TokenKind::Keyword(Keyword::Define) => {
          self.advance()?;
          self.definition()?
        }

        TokenKind::Keyword(Keyword::Char) => {
          self.advance()?;
          self.char_literal()?
        }

        TokenKind::Keyword(Keyword::Begin) => {
          self.advance()?;
          self.begin()?
        }

        TokenKind::Keyword(Keyword::For) => {
          self.advance()?;
          self.for_next()?
        }

        TokenKind::Keyword(Keyword::Quote) => {
          self.advance()?;
          Statement::Quote(self.name(true)?)
        }

        TokenKind::Identifier(_) => Statement::CallWord(self.name(false)?),

        TokenKind::Keyword(Keyword::Pwd) => {
          self.advance()?;
          Statement::SetPwd(self.literal_or_name()?)
        }

        TokenKind::Keyword(Keyword::Set) => {
          self.advance()?;
          let address = self.literal_or_name()?;
          let value = match &self.token.kind {
            TokenKind::Identifier(_) | TokenKind::Str(_) => SetValue::Name(self.name(true)?),
            TokenKind::Literal(_) => match self.advance()?.kind {
              TokenKind::Literal(n) => SetValue::Number(n),
              _                     => unreachable!(),
            },
            _ => return Err(self.unexpected("expected a value for .set")),
          };
          Statement::Set { address, value }
        }

        TokenKind::Keyword(Keyword::Pc) => {
          self.advance()?;
          Statement::SetPc(self.literal_or_name()?)
        }

        TokenKind::Keyword(Keyword::Mode) => {
          self.advance()?;
          match self.token.kind {
            TokenKind::Literal(n) => {
              self.advance()?;
              Statement::Mode(n)
            }
            _ => return Err(self.unexpected("expected a literal mode")),
          }
        }

        TokenKind::Keyword(Keyword::Allocate) => {
          self.advance()?;
          Statement::Allocate(self.literal_or_name()?)
        }

        TokenKind::Keyword(Keyword::BuiltIn) => {
          self.advance()?;
          Statement::BuiltIn
        }

        TokenKind::Instruction(m) => {
          let m = *m;
          self.advance()?;
          Statement::Instruction(m)
        }

        // Anything else ends the sequence; the caller decides whether the
        // terminator it sees is legal.
        _ => break,
      };
      result.push(statement);
    }
    Ok(result)
  }

  fn if_statement(&mut self) -> Result<Statement> {
    let then_branch = self.statements()?;
    let else_branch = match self.accept(Keyword::Else)? {
      true  => Some(self.statements()?),
      false => None,
    };
    self.expect(Keyword::Then)?;
    Ok(Statement::If { then_branch, else_branch })
  }

  fn begin(&mut self) -> Result<Statement> {
    let body = self.statements()?;
    if self.accept(Keyword::Again)? {
      return Ok(Statement::BeginAgain(body));
    }
    if self.accept(Keyword::While)? {
      let inner = self.statements()?;
      self.expect(Keyword::Repeat)?;
      return Ok(Statement::BeginWhileRepeat { condition: body, body: inner });
    }
    self.expect(Keyword::Until)?;
    Ok(Statement::BeginUntil(body))
  }

  fn for_next(&mut self) -> Result<Statement> {
    let setup = self.statements()?;
    if self.accept(Keyword::Aft)? {
      let aft = self.statements()?;
      self.expect(Keyword::Then)?;
      let tail = self.statements()?;
      self.expect(Keyword::Next)?;
      return Ok(Statement::ForAftThenNext { setup, aft, tail });
    }
    self.expect(Keyword::Next)?;
    Ok(Statement::ForNext(setup))
  }

  fn definition(&mut self) -> Result<Statement> {
    let name = self.name(true)?;
    let body = self.statements()?;
    self.expect(Keyword::EndDefine)?;

    let mut bits: u16 = 0;
    loop {
      let (keyword, bit) = match self.token.kind {
        TokenKind::Keyword(Keyword::Immediate) => (Keyword::Immediate, FLAG_IMMEDIATE),
        TokenKind::Keyword(Keyword::Hidden)    => (Keyword::Hidden, FLAG_HIDDEN),
        TokenKind::Keyword(Keyword::Inline)    => (Keyword::Inline, FLAG_INLINE),
        _ => break,
      };
      if bits & bit != 0 {
        return Err(FvmError::Syntax {
          line: self.token.line,
          message: format!("{} bit already set on latest word definition", keyword),
        });
      }
      bits |= bit;
      self.advance()?;
    }

    Ok(Statement::Definition { name, body, bits })
  }

  fn char_literal(&mut self) -> Result<Statement> {
    let line = self.token.line;
    let id = self.name(false)?;
    if id.len() > 1 {
      return Err(FvmError::Syntax {
        line,
        message: format!("expected single character, got identifier: {}", id),
      });
    }
    Ok(Statement::CharLiteral(id.as_bytes()[0]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn atom(s: &str) -> DefaultAtom {
    DefaultAtom::from(s)
  }

  #[test]
  fn flat_statement_sequence() {
    let program = parse("1 dup over:").unwrap();
    assert_eq!(program, vec![
      Statement::Literal(1),
      Statement::Instruction(Mnemonic::Dup),
      Statement::Label(atom("over")),
    ]);
  }

  #[test]
  fn jumps_take_literals_names_and_strings() {
    let program = parse("branch 8 call foo 0branch \"weird name\"").unwrap();
    assert_eq!(program, vec![
      Statement::Branch(Target::Literal(8)),
      Statement::Call(Target::Name(atom("foo"))),
      Statement::ZBranch(Target::Name(atom("weird name"))),
    ]);
  }

  #[test]
  fn definitions_collect_flag_bits() {
    let program = parse(": next' dup ; immediate inline").unwrap();
    match &program[0] {
      Statement::Definition { name, body, bits } => {
        assert_eq!(&**name, "next'");
        assert_eq!(body.len(), 1);
        assert_eq!(*bits, FLAG_IMMEDIATE | FLAG_INLINE);
      }
      other => panic!("parsed {:?}", other),
    }
  }

  #[test]
  fn repeated_flags_are_rejected() {
    assert!(matches!(
      parse(": a ; hidden hidden"),
      Err(FvmError::Syntax { .. })
    ));
  }

  #[test]
  fn if_else_then_nests() {
    let program = parse("if 1 else if 2 then then").unwrap();
    match &program[0] {
      Statement::If { then_branch, else_branch } => {
        assert_eq!(then_branch, &vec![Statement::Literal(1)]);
        let else_branch = else_branch.as_ref().unwrap();
        assert!(matches!(else_branch[0], Statement::If { .. }));
      }
      other => panic!("parsed {:?}", other),
    }
  }

  #[test]
  fn begin_variants() {
    assert!(matches!(parse("begin 0 until").unwrap()[0], Statement::BeginUntil(_)));
    assert!(matches!(parse("begin again").unwrap()[0], Statement::BeginAgain(_)));
    match &parse("begin 1 while dup repeat").unwrap()[0] {
      Statement::BeginWhileRepeat { condition, body } => {
        assert_eq!(condition, &vec![Statement::Literal(1)]);
        assert_eq!(body, &vec![Statement::Instruction(Mnemonic::Dup)]);
      }
      other => panic!("parsed {:?}", other),
    }
  }

  #[test]
  fn for_with_and_without_aft() {
    assert!(matches!(parse("for dup next").unwrap()[0], Statement::ForNext(_)));
    match &parse("for 1 aft 2 then 3 next").unwrap()[0] {
      Statement::ForAftThenNext { setup, aft, tail } => {
        assert_eq!(setup, &vec![Statement::Literal(1)]);
        assert_eq!(aft, &vec![Statement::Literal(2)]);
        assert_eq!(tail, &vec![Statement::Literal(3)]);
      }
      other => panic!("parsed {:?}", other),
    }
  }

  #[test]
  fn variable_and_constant_forms() {
    let program = parse("variable v 42 constant c $10 hidden location l \"buf\"").unwrap();
    assert_eq!(program[0], Statement::Variable {
      name: atom("v"), value: Value::Number(42), hidden: false,
    });
    assert_eq!(program[1], Statement::Constant {
      name: atom("c"), value: Value::Number(16), hidden: true,
    });
    assert_eq!(program[2], Statement::Location {
      name: atom("l"), value: Value::Str("buf".to_string()),
    });
  }

  #[test]
  fn char_literal_takes_one_character() {
    assert_eq!(parse("[char] A").unwrap()[0], Statement::CharLiteral(b'A'));
    assert!(matches!(parse("[char] AB"), Err(FvmError::Syntax { .. })));
  }

  #[test]
  fn directives() {
    let program = parse(".mode 3 .pc 8 .pwd 0 .allocate 32 .set 16 $pc .built-in").unwrap();
    assert_eq!(program, vec![
      Statement::Mode(3),
      Statement::SetPc(Target::Literal(8)),
      Statement::SetPwd(Target::Literal(0)),
      Statement::Allocate(Target::Literal(32)),
      Statement::Set { address: Target::Literal(16), value: SetValue::Name(atom("$pc")) },
      Statement::BuiltIn,
    ]);
  }

  #[test]
  fn stray_terminators_do_not_parse() {
    assert!(matches!(parse("then"), Err(FvmError::Syntax { .. })));
    assert!(matches!(parse("if 1"), Err(FvmError::Syntax { .. })));
  }

  #[test]
  fn quote_takes_a_name() {
    assert_eq!(parse("' foo").unwrap()[0], Statement::Quote(atom("foo")));
  }
}
