/*!
  Representation of machine instructions as bit fields of a 16-bit word.

  The top three bits classify the word:

  ```text
    1xxx xxxx xxxx xxxx   literal     (low 15 bits pushed, zero extended)
    011x xxxx xxxx xxxx   ALU op
    010a aaaa aaaa aaaa   call        (a = word address)
    001a aaaa aaaa aaaa   0branch     (branch if popped value is zero)
    000a aaaa aaaa aaaa   branch
  ```

  An ALU word subdivides further: bits 12:8 select one of the `Alu`
  operations, bits 7:4 are the transfer flags `T→N`, `T→R`, `N→[T]`, and
  `R→PC`, bits 3:2 encode the return-stack delta and bits 1:0 the data-stack
  delta. Delta codes map {0, 1, 2, 3} to {0, +1, −2, −1}; the last two are
  two's-complement encodings of small negatives and are a hardware
  convention, not something to repair.

  Everything in this module is a pure function of its inputs. The same
  field accessors drive both the assembler (composition) and the virtual
  machine (decoding), which is what keeps the two ends of the pipeline
  honest with each other.
*/

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

// If you change this you must also change the binary image serialization.
pub type Word = u16;

// Opcode class bases, ORed with their operand fields.
pub const OP_BRANCH:  Word = 0x0000;
pub const OP_0BRANCH: Word = 0x2000;
pub const OP_CALL:    Word = 0x4000;
pub const OP_ALU:     Word = 0x6000;
pub const OP_LITERAL: Word = 0x8000;

// ALU transfer flags.
pub const T_TO_N:      Word = 0x0080;
pub const T_TO_R:      Word = 0x0040;
pub const N_TO_ADDR_T: Word = 0x0020;
pub const R_TO_PC:     Word = 0x0010;

// Stack delta codes for the two-bit delta fields.
pub const DELTA_0:  Word = 0;
pub const DELTA_1:  Word = 1;
pub const DELTA_N2: Word = 2;
pub const DELTA_N1: Word = 3;

pub const fn mk_dstack(delta: Word) -> Word { delta }
pub const fn mk_rstack(delta: Word) -> Word { delta << 2 }
pub const fn mk_alu(op: Alu) -> Word { (op as Word) << 8 }

pub fn is_literal(w: Word) -> bool { w & 0x8000 != 0 }
pub fn is_alu(w: Word)     -> bool { w & 0xE000 == OP_ALU }
pub fn is_call(w: Word)    -> bool { w & 0xE000 == OP_CALL }
pub fn is_0branch(w: Word) -> bool { w & 0xE000 == OP_0BRANCH }
pub fn is_branch(w: Word)  -> bool { w & 0xE000 == OP_BRANCH }

pub fn alu_op(w: Word)  -> Word { (w >> 8) & 0x1F }
pub fn rstack(w: Word)  -> Word { (w >> 2) & 0x3 }
pub fn dstack(w: Word)  -> Word { w & 0x3 }
pub fn address(w: Word) -> Word { w & 0x1FFF }
pub fn flags(w: Word)   -> Word { w & (T_TO_N | T_TO_R | N_TO_ADDR_T | R_TO_PC) }

/// The signed-delta lookup shared by the encoder and the machine. Indexing
/// is by the two-bit field value; results are u16 two's complement.
pub fn stack_delta(code: Word) -> Word {
  const DELTAS: [Word; 4] = [0x0000, 0x0001, 0xFFFE, 0xFFFF];
  DELTAS[(code & 0x3) as usize]
}

/// Reassembles an ALU word from its extracted fields. Inverse of the field
/// accessors above, which the tests pin down over the whole field space.
pub fn compose_alu(op: Word, flag_bits: Word, rdelta: Word, ddelta: Word) -> Word {
  OP_ALU | ((op & 0x1F) << 8) | flags(flag_bits) | mk_rstack(rdelta & 0x3) | mk_dstack(ddelta & 0x3)
}

/**
  The ALU operation selected by bits 12:8 of an ALU word. The discriminant
  *is* the bit field value. Codes 22 through 31 are unassigned; the machine
  executes them as `T`.
*/
#[derive(
  TryFromPrimitive, IntoPrimitive,
  Clone,            Copy,          Eq, PartialEq, Debug, Hash,
)]
#[repr(u8)]
pub enum Alu {
  T,            // T
  N,            // N
  TPlusN,       // T + N
  TAndN,        // T & N
  TOrN,         // T | N
  TXorN,        // T ^ N
  InvertT,      // ~T
  TEqualN,      // -(T == N)
  NLessT,       // -(N < T), signed
  NRshiftT,     // N >> T
  TDecrement,   // T - 1
  R,            // top of return stack
  TLoad,        // [T >> 1]
  NLshiftT,     // N << T
  Depth,        // sp - VARIABLE_STACK_START
  NUlessT,      // -(N < T), unsigned
  RDepth,       // rp - RETURN_STACK_START
  TEqual0,      // -(T == 0)
  Tx,           // emit T to the console, then T = N
  Rx,           // read a byte from the console into T
  Save,         // persist the core image
  Bye,          // halt, returning T
}

// Encodings of the named single-word instructions. These are what the
// assembler emits for instruction mnemonics and what `.built-in` expands
// into word definitions.
pub const CODE_NOP:        Word = OP_ALU | mk_alu(Alu::T);
pub const CODE_DUP:        Word = OP_ALU | mk_alu(Alu::T) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_OVER:       Word = OP_ALU | mk_alu(Alu::N) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_INVERT:     Word = OP_ALU | mk_alu(Alu::InvertT);
pub const CODE_ADD:        Word = OP_ALU | mk_alu(Alu::TPlusN) | mk_dstack(DELTA_N1);
pub const CODE_SWAP:       Word = OP_ALU | mk_alu(Alu::N) | T_TO_N;
pub const CODE_NIP:        Word = OP_ALU | mk_alu(Alu::T) | mk_dstack(DELTA_N1);
pub const CODE_DROP:       Word = OP_ALU | mk_alu(Alu::N) | mk_dstack(DELTA_N1);
pub const CODE_EXIT:       Word = OP_ALU | mk_alu(Alu::T) | R_TO_PC | mk_rstack(DELTA_N1);
pub const CODE_TOR:        Word = OP_ALU | mk_alu(Alu::N) | T_TO_R | mk_rstack(DELTA_1) | mk_dstack(DELTA_N1);
pub const CODE_FROMR:      Word = OP_ALU | mk_alu(Alu::R) | T_TO_N | mk_rstack(DELTA_N1) | mk_dstack(DELTA_1);
pub const CODE_RAT:        Word = OP_ALU | mk_alu(Alu::R) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_LOAD:       Word = OP_ALU | mk_alu(Alu::TLoad);
// ( value addr -- value ): no ALU op can reach the third stack element, so
// a full Forth `!` is defined in source on top of this primitive.
pub const CODE_STORE:      Word = OP_ALU | mk_alu(Alu::N) | N_TO_ADDR_T | mk_dstack(DELTA_N1);
pub const CODE_RSHIFT:     Word = OP_ALU | mk_alu(Alu::NRshiftT) | mk_dstack(DELTA_N1);
pub const CODE_LSHIFT:     Word = OP_ALU | mk_alu(Alu::NLshiftT) | mk_dstack(DELTA_N1);
pub const CODE_EQUAL:      Word = OP_ALU | mk_alu(Alu::TEqualN) | mk_dstack(DELTA_N1);
pub const CODE_ULESS:      Word = OP_ALU | mk_alu(Alu::NUlessT) | mk_dstack(DELTA_N1);
pub const CODE_LESS:       Word = OP_ALU | mk_alu(Alu::NLessT) | mk_dstack(DELTA_N1);
pub const CODE_AND:        Word = OP_ALU | mk_alu(Alu::TAndN) | mk_dstack(DELTA_N1);
pub const CODE_XOR:        Word = OP_ALU | mk_alu(Alu::TXorN) | mk_dstack(DELTA_N1);
pub const CODE_OR:         Word = OP_ALU | mk_alu(Alu::TOrN) | mk_dstack(DELTA_N1);
pub const CODE_DEPTH:      Word = OP_ALU | mk_alu(Alu::Depth) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_T_N1:       Word = OP_ALU | mk_alu(Alu::TDecrement);
pub const CODE_ZERO_EQUAL: Word = OP_ALU | mk_alu(Alu::TEqual0);
pub const CODE_RDEPTH:     Word = OP_ALU | mk_alu(Alu::RDepth) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_TX:         Word = OP_ALU | mk_alu(Alu::Tx) | mk_dstack(DELTA_N1);
pub const CODE_RX:         Word = OP_ALU | mk_alu(Alu::Rx) | T_TO_N | mk_dstack(DELTA_1);
pub const CODE_SAVE:       Word = OP_ALU | mk_alu(Alu::Save);
pub const CODE_BYE:        Word = OP_ALU | mk_alu(Alu::Bye);
pub const CODE_RDROP:      Word = OP_ALU | mk_alu(Alu::T) | mk_rstack(DELTA_N1);

/**
  The instruction mnemonics of the source language. `EnumString` gives the
  lexer its reserved-word test, `Display`/`IntoStaticStr` give `.built-in`
  the dictionary names, and `EnumIter` fixes the expansion order of the
  built-in word table.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, EnumIter,
  Clone,        Copy,          Eq,         PartialEq, Debug, Hash,
)]
pub enum Mnemonic {
  #[strum(serialize = "nop")]    Nop,
  #[strum(serialize = "dup")]    Dup,
  #[strum(serialize = "over")]   Over,
  #[strum(serialize = "invert")] Invert,
  #[strum(serialize = "+")]      Add,
  #[strum(serialize = "swap")]   Swap,
  #[strum(serialize = "nip")]    Nip,
  #[strum(serialize = "drop")]   Drop,
  #[strum(serialize = "exit")]   Exit,
  #[strum(serialize = ">r")]     ToR,
  #[strum(serialize = "r>")]     FromR,
  #[strum(serialize = "r@")]     RAt,
  #[strum(serialize = "@")]      Load,
  #[strum(serialize = "store")]  Store,
  #[strum(serialize = "rshift")] RShift,
  #[strum(serialize = "lshift")] LShift,
  #[strum(serialize = "=")]      Equal,
  #[strum(serialize = "u<")]     ULess,
  #[strum(serialize = "<")]      Less,
  #[strum(serialize = "and")]    And,
  #[strum(serialize = "xor")]    Xor,
  #[strum(serialize = "or")]     Or,
  #[strum(serialize = "depth")]  Depth,
  #[strum(serialize = "1-")]     Decrement,
  #[strum(serialize = "0=")]     ZeroEqual,
  #[strum(serialize = "rdepth")] RDepth,
  #[strum(serialize = "tx!")]    Tx,
  #[strum(serialize = "rx?")]    Rx,
  #[strum(serialize = "save")]   Save,
  #[strum(serialize = "bye")]    Bye,
  #[strum(serialize = "rdrop")]  RDrop,
}

impl Mnemonic {

  /// The single instruction word this mnemonic assembles to.
  pub fn encoding(self) -> Word {
    match self {
      Mnemonic::Nop       => CODE_NOP,
      Mnemonic::Dup       => CODE_DUP,
      Mnemonic::Over      => CODE_OVER,
      Mnemonic::Invert    => CODE_INVERT,
      Mnemonic::Add       => CODE_ADD,
      Mnemonic::Swap      => CODE_SWAP,
      Mnemonic::Nip       => CODE_NIP,
      Mnemonic::Drop      => CODE_DROP,
      Mnemonic::Exit      => CODE_EXIT,
      Mnemonic::ToR       => CODE_TOR,
      Mnemonic::FromR     => CODE_FROMR,
      Mnemonic::RAt       => CODE_RAT,
      Mnemonic::Load      => CODE_LOAD,
      Mnemonic::Store     => CODE_STORE,
      Mnemonic::RShift    => CODE_RSHIFT,
      Mnemonic::LShift    => CODE_LSHIFT,
      Mnemonic::Equal     => CODE_EQUAL,
      Mnemonic::ULess     => CODE_ULESS,
      Mnemonic::Less      => CODE_LESS,
      Mnemonic::And       => CODE_AND,
      Mnemonic::Xor       => CODE_XOR,
      Mnemonic::Or        => CODE_OR,
      Mnemonic::Depth     => CODE_DEPTH,
      Mnemonic::Decrement => CODE_T_N1,
      Mnemonic::ZeroEqual => CODE_ZERO_EQUAL,
      Mnemonic::RDepth    => CODE_RDEPTH,
      Mnemonic::Tx        => CODE_TX,
      Mnemonic::Rx        => CODE_RX,
      Mnemonic::Save      => CODE_SAVE,
      Mnemonic::Bye       => CODE_BYE,
      Mnemonic::RDrop     => CODE_RDROP,
    }
  }

  /// Whether `.built-in` compiles this word into the image. A `nop` earns
  /// no dictionary entry, and `store` leaves its value behind, so the image
  /// defines the proper `!` on top of it in source.
  pub fn compiles(self) -> bool {
    !matches!(self, Mnemonic::Nop | Mnemonic::Store)
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;
  use strum::IntoEnumIterator;
  use super::*;

  #[test]
  fn class_predicates_are_disjoint() {
    for &w in &[0x0000u16, 0x1FFF, 0x2000, 0x4123, 0x601C, 0x8001, 0xFFFF] {
      let classes = [is_literal(w), is_alu(w), is_call(w), is_0branch(w), is_branch(w)];
      assert_eq!(classes.iter().filter(|c| **c).count(), 1, "word {:04x}", w);
    }
  }

  #[test]
  fn known_encodings() {
    assert_eq!(CODE_DUP,    0x6081);
    assert_eq!(CODE_EXIT,   0x601C);
    assert_eq!(CODE_TOR,    0x6147);
    assert_eq!(CODE_FROMR,  0x6B8D);
    assert_eq!(CODE_INVERT, 0x6600);
    assert_eq!(CODE_STORE,  0x6123);
    assert_eq!(CODE_BYE,    0x7500);
  }

  #[test]
  fn delta_table_is_the_hardware_one() {
    assert_eq!(stack_delta(DELTA_0),  0x0000);
    assert_eq!(stack_delta(DELTA_1),  0x0001);
    assert_eq!(stack_delta(DELTA_N2), 0xFFFE);
    assert_eq!(stack_delta(DELTA_N1), 0xFFFF);
  }

  // Every ALU word survives decomposition and recomposition. The low 13
  // bits are the full operand space; the class prefix is fixed.
  #[test]
  fn alu_field_round_trip() {
    for low in 0..0x2000u16 {
      let w = OP_ALU | low;
      assert_eq!(compose_alu(alu_op(w), flags(w), rstack(w), dstack(w)), w);
    }
  }

  #[test]
  fn mnemonics_parse_from_their_spelling() {
    for m in Mnemonic::iter() {
      let spelling = m.to_string();
      assert_eq!(Mnemonic::from_str(&spelling), Ok(m));
      assert!(is_alu(m.encoding()));
    }
  }

  #[test]
  fn alu_code_is_the_discriminant() {
    assert_eq!(Alu::try_from(alu_op(CODE_LOAD) as u8).unwrap(), Alu::TLoad);
    assert_eq!(Alu::try_from(alu_op(CODE_BYE) as u8).unwrap(), Alu::Bye);
    assert!(Alu::try_from(31u8).is_err());
  }

  #[test]
  fn exit_merges_into_plain_alu_words_only() {
    // The peephole preconditions, expressed as bit tests.
    assert_eq!(CODE_DUP & R_TO_PC, 0);
    assert_eq!(CODE_DUP & mk_rstack(DELTA_N1), 0);
    assert_ne!(CODE_TOR & mk_rstack(DELTA_N1), 0);
    assert_eq!(CODE_DUP | CODE_EXIT, 0x609D);
  }
}
