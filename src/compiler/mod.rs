/*!
  The compilation pipeline: lexer, parser, and assembler.

  `compile` takes source text the whole way to an executable machine image;
  `compile_with` does the same against a caller-owned symbol table so that
  several compilation units can see each other's definitions.
*/

mod compile;
mod lexer;
mod parser;

pub use compile::*;
pub use lexer::*;
pub use parser::*;
