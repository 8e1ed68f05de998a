/*!
  Functions to produce a memory image from source code input.

  The compilation pipeline is this:
  ```text
  text -> [`lexer`] -> `Token`s -> [`parser::parse`] -> `Statement`s ->⋯

  ⋯-> [`Assembler::assemble`] -> instruction cells in an `FVM` core
  ```

  The assembler walks the statement tree emitting 16-bit cells directly
  into a fresh machine's core, tracking four pieces of state along the way:
  the machine's own program counter, the previous-word-header pointer
  (`pwd`), the optimization fence, and a mode word. The mode word is set
  from source with `.mode`; bit 0 enables word headers in the image, bit 1
  enables the peephole optimizer.

  Two peephole rewrites exist, both concerned with the `exit` at the end of
  a word. When the final body instruction is a plain ALU word, the return
  is folded into it through the `R→PC` and return-delta fields. When the
  final body instruction is a call, the call becomes a branch and the
  `exit` is dropped. The fence keeps both rewrites inside the current basic
  block: it rises over every emitted branch, call, literal, data or header
  cell, every label, and every `.pc`/`.allocate` jump, and the optimizer
  never touches a cell at or below it.
*/

use string_cache::DefaultAtom;
use strum::IntoEnumIterator;

use crate::bytecode::*;
use crate::errors::{FvmError, Result};
use crate::fvm::{FVM, MAX_PROGRAM, START_ADDR};
use crate::symboltable::{SymbolKind, SymbolTable};
use super::parser::{self, SetValue, Statement, Target, Value, FLAG_HIDDEN, FLAG_IMMEDIATE, FLAG_INLINE};

pub const MODE_NORMAL:              Word = 0;
pub const MODE_COMPILE_WORD_HEADER: Word = 1 << 0;
pub const MODE_OPTIMIZATION_ON:     Word = 1 << 1;

/// Compiles source text into a machine ready to run, with a private symbol
/// table that is discarded along with any partial state on failure.
pub fn compile(text: &str) -> Result<FVM> {
  let mut symbols = SymbolTable::new();
  compile_with(text, &mut symbols)
}

/// Compiles source text against a caller-supplied symbol table, which can
/// carry definitions across compilation units.
pub fn compile_with(text: &str, symbols: &mut SymbolTable) -> Result<FVM> {
  let program = parser::parse(text)?;

  let mut vm = FVM::new(START_ADDR);
  let mut assembler = Assembler::default();
  assembler.assemble(&mut vm, symbols, &program)?;

  #[cfg(feature = "trace_computation")]
  println!("{}", symbols.to_table());

  Ok(vm)
}

struct BuiltInWord {
  name       : &'static str,
  inline_bit : bool,
  hidden     : bool,
  compile    : bool,
  code       : Vec<Word>,
}

lazy_static! {
  /**
    The primitive dictionary `.built-in` expands into the image: one word
    per instruction mnemonic, followed by the hidden runtime words that
    variable declarations, constant fetches, and counted loops compile
    calls to.
  */
  static ref BUILT_IN_WORDS: Vec<BuiltInWord> = {
    let mut words: Vec<BuiltInWord> =
      Mnemonic::iter()
        .map(|m| BuiltInWord {
          name       : m.into(),
          inline_bit : true,
          hidden     : false,
          compile    : m.compiles(),
          code       : vec![m.encoding()],
        })
        .collect();

    words.push(BuiltInWord {
      name: "doVar", inline_bit: false, hidden: true, compile: true,
      code: vec![CODE_FROMR],
    });
    words.push(BuiltInWord {
      name: "doConst", inline_bit: false, hidden: true, compile: true,
      code: vec![CODE_FROMR, CODE_LOAD],
    });
    words.push(BuiltInWord {
      name: "r1-", inline_bit: false, hidden: true, compile: true,
      code: vec![CODE_FROMR, CODE_FROMR, CODE_T_N1, CODE_TOR, CODE_TOR],
    });

    words
  };
}

fn pack_16(low: u8, high: u8) -> Word {
  (Word::from(high) << 8) | Word::from(low)
}

fn fix(vm: &mut FVM, hole: Word, patch: Word) {
  vm.set_cell(hole, patch);
}

pub struct Assembler {
  mode                   : Word,
  pwd                    : Word,
  fence                  : Word,
  in_definition          : bool,
  built_in_words_defined : bool,
  // Lazily cached dictionary addresses of the runtime support words.
  do_var         : Option<Word>,
  do_const       : Option<Word>,
  do_next        : Option<Word>,
  do_r_decrement : Option<Word>,
}

impl Default for Assembler {
  fn default() -> Assembler {
    Assembler {
      mode                   : MODE_NORMAL,
      pwd                    : 0,
      fence                  : 0,
      in_definition          : false,
      built_in_words_defined : false,
      do_var         : None,
      do_const       : None,
      do_next        : None,
      do_r_decrement : None,
    }
  }
}

impl Assembler {

  pub fn assemble(&mut self, vm: &mut FVM, symbols: &mut SymbolTable, program: &[Statement]) -> Result<()> {
    for statement in program {
      self.statement(vm, symbols, statement)?;
    }
    Ok(())
  }

  // region Emission primitives

  fn update_fence(&mut self, pc: Word) {
    self.fence = self.fence.max(pc);
  }

  fn here(&mut self, vm: &FVM) -> Word {
    debug_assert!(vm.pc < MAX_PROGRAM);
    self.update_fence(vm.pc);
    vm.pc
  }

  /// Reserves the next cell for later patching via `fix`.
  fn hole(&mut self, vm: &mut FVM) -> Word {
    let pc = self.here(vm);
    vm.pc = pc + 1;
    pc
  }

  /**
    Emits one instruction cell at the program counter, applying the two
    peephole rewrites when optimization is on. Emitting any flow-control or
    literal cell raises the fence so later rewrites cannot reach across it.
  */
  fn generate(&mut self, vm: &mut FVM, instruction: Word) {
    #[cfg(feature = "trace_computation")]
    println!("{:04x}:\t{:04x}", vm.pc, instruction);

    if is_call(instruction) || is_literal(instruction) || is_0branch(instruction) || is_branch(instruction) {
      self.update_fence(vm.pc);
    }

    if self.mode & MODE_OPTIMIZATION_ON != 0 && vm.pc != 0 {
      let previous = vm.cell(vm.pc - 1);

      if vm.pc - 1 > self.fence && is_alu(previous) && instruction == CODE_EXIT {
        // Fold the return into the previous cell, when its return-stack
        // fields are free for the taking.
        if previous & R_TO_PC == 0 && previous & mk_rstack(DELTA_N1) == 0 {
          let cell = vm.pc - 1;

          #[cfg(feature = "trace_computation")]
          println!("exit merge {:04x}: [{:04x} -> {:04x}]", cell, previous, previous | instruction);

          fix(vm, cell, previous | instruction);
          self.update_fence(cell);
          return;
        }
      } else if vm.pc > self.fence && is_call(previous) && instruction == CODE_EXIT {
        // A call in tail position becomes a plain branch and the exit is
        // never emitted.
        let cell = vm.pc - 1;

        #[cfg(feature = "trace_computation")]
        println!("tail call {:04x}: [{:04x} -> {:04x}]", cell, previous, OP_BRANCH | address(previous));

        fix(vm, cell, OP_BRANCH | address(previous));
        self.update_fence(cell);
        return;
      }
    }

    let pc = vm.pc;
    vm.set_cell(pc, instruction);
    vm.pc = pc + 1;
  }

  /// Numbers with the top bit set cannot ride in a literal instruction, so
  /// they are emitted inverted and followed by an `invert`.
  fn generate_literal(&mut self, vm: &mut FVM, number: Word) {
    if number & OP_LITERAL != 0 {
      self.generate(vm, OP_LITERAL | !number);
      self.generate(vm, CODE_INVERT);
    } else {
      self.generate(vm, OP_LITERAL | number);
    }
  }

  fn generate_jump(&mut self, vm: &mut FVM, symbols: &SymbolTable, target: &Target, op: Word) -> Result<()> {
    let address = match target {
      Target::Name(id) => {
        let symbol = symbols.lookup(id).ok_or_else(|| FvmError::UndefinedSymbol(id.clone()))?;
        if symbol.kind == SymbolKind::Call && op != OP_CALL {
          return Err(FvmError::BranchToCall(id.clone()));
        }
        symbol.value
      }
      Target::Literal(n) => *n,
    };

    if address > MAX_PROGRAM {
      return Err(FvmError::JumpOutOfRange(address));
    }
    self.generate(vm, op | address);
    Ok(())
  }

  /// Packs a length-prefixed string into consecutive cells, two bytes per
  /// cell, returning the cell index where it begins.
  fn pack_string(&mut self, vm: &mut FVM, s: &str) -> Result<Word> {
    let bytes = s.as_bytes();
    let length = bytes.len();
    if length > 255 {
      return Err(FvmError::StringTooLong(s.to_string(), length));
    }

    let start = vm.pc;
    let first = bytes.first().copied().unwrap_or(0);
    let cell = self.hole(vm);
    fix(vm, cell, pack_16(length as u8, first));

    let mut i = 1;
    while i < length {
      let high = bytes.get(i + 1).copied().unwrap_or(0);
      let cell = self.hole(vm);
      fix(vm, cell, pack_16(bytes[i], high));
      i += 2;
    }

    self.here(vm);
    Ok(start)
  }

  // endregion

  // region Symbol resolution helpers

  fn literal_or_symbol_lookup(&self, symbols: &SymbolTable, target: &Target) -> Result<Word> {
    match target {
      Target::Literal(n) => Ok(*n),
      Target::Name(id) => symbols
        .lookup(id)
        .map(|s| s.value)
        .ok_or_else(|| FvmError::UndefinedSymbol(id.clone())),
    }
  }

  /// The reserved `.set` value names that read assembler state instead of
  /// the symbol table.
  fn symbol_special(&self, vm: &FVM, id: &str) -> Result<Word> {
    match id {
      "$pc"  => Ok(vm.pc << 1),
      "$pwd" => Ok(self.pwd), // already a byte address
      _      => Err(FvmError::semantic(format!("'{}' is not a symbol", id))),
    }
  }

  fn do_var(&mut self, symbols: &SymbolTable) -> Result<Word> {
    if self.do_var.is_none() {
      self.do_var = symbols.lookup("doVar").map(|s| s.value);
    }
    self.do_var.ok_or_else(|| FvmError::semantic("variable used but doVar not defined, use location"))
  }

  fn do_const(&mut self, symbols: &SymbolTable) -> Result<Word> {
    if self.do_const.is_none() {
      self.do_const = symbols.lookup("doConst").map(|s| s.value);
    }
    self.do_const.ok_or_else(|| FvmError::semantic("constant header requires doConst"))
  }

  fn do_next(&mut self, symbols: &SymbolTable) -> Option<Word> {
    if self.do_next.is_none() {
      self.do_next = symbols.lookup("doNext").map(|s| s.value);
    }
    self.do_next
  }

  fn do_r_decrement(&mut self, symbols: &SymbolTable) -> Option<Word> {
    if self.do_r_decrement.is_none() {
      self.do_r_decrement = symbols.lookup("r1-").map(|s| s.value);
    }
    self.do_r_decrement
  }

  /// Decrements the loop counter on the return stack, through `r1-` when
  /// optimizing and it exists, inline otherwise.
  fn generate_loop_decrement(&mut self, vm: &mut FVM, symbols: &SymbolTable) {
    match (self.do_r_decrement(symbols), self.mode & MODE_OPTIMIZATION_ON != 0) {
      (Some(r_decrement), true) => self.generate(vm, OP_CALL | r_decrement),
      _ => {
        self.generate(vm, CODE_FROMR);
        self.generate(vm, CODE_T_N1);
        self.generate(vm, CODE_TOR);
      }
    }
  }

  // endregion

  /// Emits the storage cell (or packed string) behind a variable or
  /// location and records the symbol as the storage's *byte* address. The
  /// low bit of a byte address is discarded on loads.
  fn data_cell(
    &mut self,
    vm: &mut FVM,
    symbols: &mut SymbolTable,
    name: &DefaultAtom,
    value: &Value,
    hidden: bool,
  ) -> Result<()> {
    self.here(vm);
    let cell = match value {
      Value::Number(n) => {
        let cell = self.hole(vm);
        fix(vm, cell, *n);
        cell
      }
      Value::Str(s) => self.pack_string(vm, s)?,
    };
    symbols.add(SymbolKind::Variable, name.clone(), cell << 1, hidden)
  }

  fn statement(&mut self, vm: &mut FVM, symbols: &mut SymbolTable, statement: &Statement) -> Result<()> {
    if vm.pc > MAX_PROGRAM {
      return Err(FvmError::DictionaryOverflow(vm.pc));
    }

    match statement {

      Statement::Label(id) => {
        let here = self.here(vm);
        symbols.add(SymbolKind::Label, id.clone(), here, false)?;
      }

      Statement::Branch(target)  => self.generate_jump(vm, symbols, target, OP_BRANCH)?,
      Statement::ZBranch(target) => self.generate_jump(vm, symbols, target, OP_0BRANCH)?,
      Statement::Call(target)    => self.generate_jump(vm, symbols, target, OP_CALL)?,

      Statement::Constant { name, value, hidden } => {
        let number = match value {
          Value::Number(n) => *n,
          Value::Str(_) => {
            return Err(FvmError::semantic(format!("constant {} requires a numeric value", name)));
          }
        };

        if self.mode & MODE_COMPILE_WORD_HEADER != 0 && self.built_in_words_defined && !hidden {
          let do_const = self.do_const(symbols)?;
          let header = self.hole(vm);
          let pwd = self.pwd;
          fix(vm, header, pwd);
          self.pwd = header << 1;
          self.pack_string(vm, name)?;
          self.generate(vm, OP_CALL | do_const);
          let cell = self.hole(vm);
          fix(vm, cell, number);
        }
        // The `hidden` flag suppresses only the header; the symbol is
        // always visible.
        symbols.add(SymbolKind::Constant, name.clone(), number, false)?;
      }

      Statement::Variable { name, value, hidden } => {
        if self.mode & MODE_COMPILE_WORD_HEADER != 0 && self.built_in_words_defined && !hidden {
          let do_var = self.do_var(symbols)?;
          let header = self.hole(vm);
          let pwd = self.pwd;
          fix(vm, header, pwd);
          self.pwd = header << 1;
          self.pack_string(vm, name)?;
          self.generate(vm, OP_CALL | do_var);
        } else if !hidden {
          return Err(FvmError::semantic("variable used but doVar not defined, use location"));
        }
        self.data_cell(vm, symbols, name, value, false)?;
      }

      Statement::Location { name, value } => {
        self.data_cell(vm, symbols, name, value, true)?;
      }

      Statement::Quote(id) => {
        let value = match symbols.lookup(id) {
          Some(s) if s.kind == SymbolKind::Call || s.kind == SymbolKind::Label => s.value,
          _ => return Err(FvmError::semantic(format!("not a defined procedure: {}", id))),
        };
        self.generate_literal(vm, value << 1);
      }

      Statement::Literal(n) => self.generate_literal(vm, *n),

      Statement::Instruction(m) => self.generate(vm, m.encoding()),

      Statement::BeginUntil(body) => {
        let head = self.here(vm);
        self.assemble(vm, symbols, body)?;
        self.generate(vm, OP_0BRANCH | head);
      }

      Statement::BeginAgain(body) => {
        let head = self.here(vm);
        self.assemble(vm, symbols, body)?;
        self.generate(vm, OP_BRANCH | head);
      }

      Statement::BeginWhileRepeat { condition, body } => {
        let head = self.here(vm);
        self.assemble(vm, symbols, condition)?;
        let exit_hole = self.hole(vm);
        self.assemble(vm, symbols, body)?;
        self.generate(vm, OP_BRANCH | head);
        let after = self.here(vm);
        fix(vm, exit_hole, OP_0BRANCH | after);
      }

      Statement::ForNext(body) => {
        match (self.do_next(symbols), self.mode & MODE_OPTIMIZATION_ON != 0) {
          (Some(do_next), true) => {
            self.generate(vm, CODE_TOR);
            let head = self.here(vm);
            self.assemble(vm, symbols, body)?;
            self.generate(vm, OP_CALL | do_next);
            // The loop-head byte address rides as a raw cell after the
            // call; the runtime word consumes it.
            self.generate(vm, head << 1);
          }
          _ => {
            self.generate(vm, CODE_TOR);
            let head = self.here(vm);
            self.assemble(vm, symbols, body)?;
            self.generate(vm, CODE_RAT);
            let exit_hole = self.hole(vm);
            self.generate_loop_decrement(vm, symbols);
            self.generate(vm, OP_BRANCH | head);
            let after = self.here(vm);
            fix(vm, exit_hole, OP_0BRANCH | after);
            self.generate(vm, CODE_RDROP);
          }
        }
      }

      Statement::ForAftThenNext { setup, aft, tail } => {
        self.generate(vm, CODE_TOR);
        self.assemble(vm, symbols, setup)?;
        let entry_hole = self.hole(vm);
        self.generate(vm, CODE_RAT);
        self.generate_loop_decrement(vm, symbols);
        let exit_hole = self.hole(vm);
        self.assemble(vm, symbols, aft)?;
        let here = self.here(vm);
        fix(vm, entry_hole, OP_BRANCH | here);
        self.assemble(vm, symbols, tail)?;
        self.generate(vm, OP_BRANCH | (entry_hole + 1));
        let after = self.here(vm);
        fix(vm, exit_hole, OP_0BRANCH | after);
        self.generate(vm, CODE_RDROP);
      }

      Statement::If { then_branch, else_branch } => {
        let condition_hole = self.hole(vm);
        self.assemble(vm, symbols, then_branch)?;
        match else_branch {
          Some(else_branch) => {
            let skip_hole = self.hole(vm);
            fix(vm, condition_hole, OP_0BRANCH | (skip_hole + 1));
            self.assemble(vm, symbols, else_branch)?;
            let after = self.here(vm);
            fix(vm, skip_hole, OP_BRANCH | after);
          }
          None => {
            let after = self.here(vm);
            fix(vm, condition_hole, OP_0BRANCH | after);
          }
        }
      }

      Statement::CallWord(id) => {
        let (kind, value) = match symbols.lookup(id) {
          Some(s) => (s.kind, s.value),
          None => {
            return Err(FvmError::semantic(format!("not a constant or a defined procedure: {}", id)));
          }
        };
        match kind {
          SymbolKind::Call => self.generate(vm, OP_CALL | value),
          SymbolKind::Constant | SymbolKind::Variable => self.generate_literal(vm, value),
          SymbolKind::Label => {
            return Err(FvmError::semantic(format!("can only call or push literal: {}", id)));
          }
        }
      }

      Statement::Definition { name, body, bits } => {
        if *bits != 0 && self.mode & MODE_COMPILE_WORD_HEADER == 0 {
          return Err(FvmError::semantic(
            "cannot modify word bits (immediate/hidden/inline) if not in compile mode",
          ));
        }
        if self.mode & MODE_COMPILE_WORD_HEADER != 0 && bits & FLAG_HIDDEN == 0 {
          let header = self.hole(vm);
          let flag_bits = bits & (FLAG_IMMEDIATE | FLAG_INLINE);
          let patch = self.pwd | flag_bits << 13;
          fix(vm, header, patch);
          self.pwd = header << 1;
          self.pack_string(vm, name)?;
        }
        // The entry point is recorded without raising the fence, which
        // leaves the body's first instruction eligible for the EXIT merge.
        symbols.add(SymbolKind::Call, name.clone(), vm.pc, bits & FLAG_HIDDEN != 0)?;
        if self.in_definition {
          return Err(FvmError::semantic("nested word definition is not allowed"));
        }
        self.in_definition = true;
        self.assemble(vm, symbols, body)?;
        self.generate(vm, CODE_EXIT);
        self.in_definition = false;
      }

      Statement::CharLiteral(byte) => {
        self.generate(vm, OP_LITERAL | Word::from(*byte));
      }

      Statement::Set { address, value } => {
        let location = self.literal_or_symbol_lookup(symbols, address)?;
        let value = match value {
          SetValue::Number(n) => *n,
          SetValue::Name(id) => match symbols.lookup(id) {
            // Call symbols hold word addresses; stored values are byte
            // addresses.
            Some(s) if s.kind == SymbolKind::Call => s.value << 1,
            Some(s) => s.value,
            None => self.symbol_special(vm, id)?,
          },
        };
        fix(vm, location >> 1, value);
      }

      Statement::SetPwd(target) => {
        self.pwd = self.literal_or_symbol_lookup(symbols, target)?;
      }

      Statement::SetPc(target) => {
        vm.pc = self.literal_or_symbol_lookup(symbols, target)?;
        self.update_fence(vm.pc);
      }

      Statement::Mode(mode) => {
        self.mode = *mode;
      }

      Statement::Allocate(target) => {
        let bytes = self.literal_or_symbol_lookup(symbols, target)?;
        vm.pc = vm.pc.wrapping_add(bytes >> 1);
        self.update_fence(vm.pc);
      }

      Statement::BuiltIn => {
        if self.mode & MODE_COMPILE_WORD_HEADER == 0 {
          return Ok(());
        }
        if self.built_in_words_defined {
          return Err(FvmError::semantic("built in words already defined"));
        }
        self.built_in_words_defined = true;

        for word in BUILT_IN_WORDS.iter() {
          if !word.compile {
            continue;
          }
          if !word.hidden {
            let mut pwd = self.pwd;
            let header = self.hole(vm);
            if word.inline_bit {
              pwd |= FLAG_INLINE << 13;
            }
            fix(vm, header, pwd);
            self.pwd = header << 1;
            self.pack_string(vm, word.name)?;
          }
          let here = self.here(vm);
          symbols.add(SymbolKind::Call, DefaultAtom::from(word.name), here, word.hidden)?;
          for &cell in &word.code {
            self.generate(vm, cell);
          }
          self.generate(vm, CODE_EXIT);
        }
      }
    }

    Ok(())
  }
}
