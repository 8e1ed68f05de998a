/*!
  The assembler's symbol table: an insertion-ordered collection of named
  entries. Lookup is a linear scan with first-match semantics, which is what
  the mnemonic and dictionary machinery relies on, so a map would change
  observable behavior here. Redefinition is always an error.
*/

use std::fmt::{Display, Formatter};

use prettytable::Table;
use string_cache::DefaultAtom;
use strum_macros::Display as StrumDisplay;

use crate::bytecode::Word;
use crate::errors::{FvmError, Result};

#[derive(StrumDisplay, Clone, Copy, Eq, PartialEq, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolKind {
  /// A position in the image a branch may target.
  Label,
  /// The entry point of a word definition; only `call` may target it.
  Call,
  Constant,
  /// Holds the byte address of the variable's storage cell.
  Variable,
}

#[derive(Clone, Debug)]
pub struct Symbol {
  pub id     : DefaultAtom,
  pub value  : Word,
  pub kind   : SymbolKind,
  pub hidden : bool,
}

#[derive(Default, Debug)]
pub struct SymbolTable {
  symbols: Vec<Symbol>,
}

impl SymbolTable {

  pub fn new() -> SymbolTable {
    SymbolTable { symbols: Vec::new() }
  }

  pub fn lookup(&self, id: &str) -> Option<&Symbol> {
    self.symbols.iter().find(|s| &*s.id == id)
  }

  pub fn add(&mut self, kind: SymbolKind, id: DefaultAtom, value: Word, hidden: bool) -> Result<()> {
    match self.lookup(&id) {
      Some(_) => Err(FvmError::DuplicateSymbol(id)),
      None => {
        self.symbols.push(Symbol { id, value, kind, hidden });
        Ok(())
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
    self.symbols.iter()
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  /// Renders the table for diagnostic output.
  pub fn to_table(&self) -> Table {
    let mut table = Table::new();
    table.set_titles(row![ub->"Kind", ub->"Id", ub->"Value", ub->"Visibility"]);
    for s in &self.symbols {
      let visibility = match s.hidden {
        true  => "hidden",
        false => "visible",
      };
      table.add_row(row![s.kind, s.id, r->format!("{:04x}", s.value), visibility]);
    }
    table
  }
}

impl Display for SymbolTable {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    for s in &self.symbols {
      let visibility = match s.hidden {
        true  => "hidden",
        false => "visible",
      };
      writeln!(f, "{} {} {} {}", s.kind, s.id, s.value, visibility)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn atom(s: &str) -> DefaultAtom {
    DefaultAtom::from(s)
  }

  #[test]
  fn lookup_finds_what_add_inserted() {
    let mut t = SymbolTable::new();
    assert!(t.is_empty());
    t.add(SymbolKind::Label, atom("start"), 8, false).unwrap();
    t.add(SymbolKind::Call, atom("doVar"), 12, true).unwrap();

    let s = t.lookup("doVar").unwrap();
    assert_eq!(s.value, 12);
    assert_eq!(s.kind, SymbolKind::Call);
    assert!(s.hidden);
    assert!(t.lookup("missing").is_none());
  }

  #[test]
  fn redefinition_is_rejected() {
    let mut t = SymbolTable::new();
    t.add(SymbolKind::Constant, atom("x"), 1, false).unwrap();
    let result = t.add(SymbolKind::Variable, atom("x"), 2, false);
    assert!(matches!(result, Err(FvmError::DuplicateSymbol(_))));
    // The original entry survives.
    assert_eq!(t.lookup("x").unwrap().value, 1);
    assert_eq!(t.len(), 1);
  }

  #[test]
  fn iteration_preserves_insertion_order() {
    let mut t = SymbolTable::new();
    for (i, name) in ["c", "a", "b"].iter().enumerate() {
      t.add(SymbolKind::Label, atom(name), i as Word, false).unwrap();
    }
    let ids: Vec<String> = t.iter().map(|s| s.id.to_string()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
  }

  #[test]
  fn table_rendering_includes_every_symbol() {
    let mut t = SymbolTable::new();
    t.add(SymbolKind::Constant, atom("k"), 9, false).unwrap();
    let rendered = t.to_table().to_string();
    assert!(rendered.contains("constant"));
    assert!(rendered.contains("k"));
  }

  #[test]
  fn display_is_one_line_per_symbol() {
    let mut t = SymbolTable::new();
    t.add(SymbolKind::Variable, atom("v"), 40, false).unwrap();
    assert_eq!(t.to_string(), "variable v 40 visible\n");
  }
}
