/*!

  The machine uses a 16-bit little-endian word size and a single-word
  instruction format. The top three bits of a word classify it as a literal,
  an ALU operation, a call, a conditional branch, or an unconditional
  branch; the remaining bits are operand fields. Branch and call addresses
  are 13 bits and address words, not bytes. Return addresses, word headers,
  and variable symbols traffic in byte addresses (word address shifted left
  one), and the low bit of a byte address is discarded on loads.

  One design decision that needed to be made is how to represent decoded
  instructions. An enum with one variant per instruction would be the
  obvious choice, but the assembler and machine both operate on packed
  words directly — the peephole optimizer ORs and compares raw cells — so
  the representation here *is* the 16-bit word, and this module provides
  the pure predicates and field accessors over it. Only the ALU operation
  selector and the source-language mnemonics get enums of their own.

*/

mod binary;
mod instruction;

pub use binary::{load, read_image, save, write_image, FORTH_BLOCK};
pub use instruction::*;
