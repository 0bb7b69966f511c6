//! DWARF 2 debug line generation for assemblers.
//!
//! This crate turns a stream of location notifications (`.file` and `.loc`
//! directives plus per-instruction emission hooks) into a DWARF version 2
//! line number program, with row addresses bound to the final,
//! post-relaxation values of labels. When the assembler itself produced the
//! line information, the minimal companion sections (`.debug_info`,
//! `.debug_abbrev`, `.debug_aranges`, `.debug_ranges`, `.debug_str`) are
//! emitted alongside it.
//!
//! The central type is [`DwarfWriter`]. It works against an [`Assembly`],
//! the model of the assembler's sections, fragments and symbols:
//!
//! ```
//! use dwarfline::{Assembly, DwarfConfig, DwarfWriter, SectionFlags};
//! use gimli::RunTimeEndian;
//!
//! let mut asm = Assembly::new(RunTimeEndian::Little);
//! let text = asm.section(".text", SectionFlags::CODE);
//! asm.switch_to(text, 0);
//!
//! let mut dwarf = DwarfWriter::new(DwarfConfig::default());
//! dwarf.directive_file(r#"1 "main.c""#).unwrap();
//! dwarf.directive_loc(&mut asm, "1 10").unwrap();
//! asm.append(&[0x90]);
//! dwarf.emit_insn(&mut asm, 1);
//!
//! dwarf.finish(&mut asm);
//! dwarf.final_check(&mut asm).unwrap();
//! let line_section = asm.section_bytes(".debug_line").unwrap();
//! assert!(!line_section.is_empty());
//! ```
//!
//! Line entries are accumulated per (section, subsection) during the pass.
//! At [`finish`](DwarfWriter::finish) the entries are walked in order and
//! every `(line delta, address delta)` step is packed into the most compact
//! opcode sequence DWARF 2 permits. A step that crosses fragments whose
//! distance is not yet known reserves worst-case room and participates in
//! the relaxation loop until symbol values converge.

#![warn(missing_docs)]

mod asm;
mod config;
mod directive;
mod emit;
mod error;
mod files;
mod location;
mod opcode;
mod sections;
mod view;
mod writer;

pub use crate::asm::{Assembly, Expr, Fixup, SectionFlags, SectionId, SymbolId};
pub use crate::config::{DwarfConfig, DwarfFormat, LineParams};
pub use crate::directive::FileDirective;
pub use crate::error::{DwarfError, DwarfErrorKind};
pub use crate::location::{LineFlags, Location};
pub use crate::writer::{DebugType, DwarfWriter};
