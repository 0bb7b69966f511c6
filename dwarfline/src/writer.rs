//! The encoder context: tables, current location, and line entry lists.

use crate::asm::{Assembly, SectionFlags, SectionId, SymbolId};
use crate::config::DwarfConfig;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::files::FileTables;
use crate::location::{LineFlags, Location};
use crate::view;

/// Where debug information comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebugType {
    /// Debug info is driven by `.file`/`.loc` directives only.
    None,
    /// The assembler generates a row per input line on its own.
    Dwarf2,
}

/// A captured line table row: a label and the location it was captured at.
#[derive(Clone, Debug)]
pub(crate) struct LineEntry {
    pub label: SymbolId,
    pub loc: Location,
}

/// Line entries of one (section, subsection), in emission order.
#[derive(Debug)]
pub(crate) struct LineSubseg {
    pub subseg: u32,
    pub entries: Vec<LineEntry>,
    /// Entries below this index are frozen against [`DwarfWriter::move_insn`].
    pub move_tail: usize,
}

/// Per-section line data, in section creation order.
#[derive(Debug)]
pub(crate) struct LineSeg {
    pub section: SectionId,
    /// Subsections in ascending number order.
    pub subsegs: Vec<LineSubseg>,
    pub text_start: Option<SymbolId>,
    pub text_end: Option<SymbolId>,
}

/// View number bookkeeping shared across the stream.
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    /// The sentinel symbol `.loc ... view -0` binds to.
    pub force_reset: Option<SymbolId>,
    /// Chain of deferred reset checks, walked by `final_check`.
    pub assert_failed: Option<SymbolId>,
}

/// Generates DWARF 2 line number information and the companion debug
/// sections for a single assembly run.
///
/// Feed it `.file`/`.loc` directives and per-instruction hooks during the
/// pass, then call [`finish`](Self::finish) once and
/// [`final_check`](Self::final_check) after it.
#[derive(Debug)]
pub struct DwarfWriter {
    pub(crate) config: DwarfConfig,
    pub(crate) files: FileTables,
    pub(crate) current: Location,
    pub(crate) segs: Vec<LineSeg>,
    pub(crate) view_state: ViewState,
    pub(crate) diagnostics: Vec<DwarfError>,
    pub(crate) loc_directive_seen: bool,
    pub(crate) debug_type: DebugType,
    pub(crate) mark_labels: bool,
    /// Dedup memo for assembler-generated rows: last (file, line).
    last_row: Option<(u32, u32)>,
    input_position: Option<(String, u32)>,
    pub(crate) finished: bool,
}

impl DwarfWriter {
    /// Creates a writer with the given host configuration.
    pub fn new(config: DwarfConfig) -> Self {
        let current = Location::initial(config.line.default_is_stmt);
        Self {
            config,
            files: FileTables::new(),
            current,
            segs: Vec::new(),
            view_state: ViewState::default(),
            diagnostics: Vec::new(),
            loc_directive_seen: false,
            debug_type: DebugType::None,
            mark_labels: false,
            last_row: None,
            input_position: None,
            finished: false,
        }
    }

    /// The host configuration.
    pub fn config(&self) -> &DwarfConfig {
        &self.config
    }

    /// Selects whether the assembler generates debug info on its own.
    pub fn set_debug_type(&mut self, debug_type: DebugType) {
        self.debug_type = debug_type;
    }

    /// Updates the assembler input position used for generated rows.
    pub fn set_input_position(&mut self, file: &str, line: u32) {
        self.input_position = Some((file.into(), line));
    }

    /// Target hook: records an instruction set change.
    pub fn set_isa(&mut self, isa: u32) {
        self.current.isa = isa;
    }

    /// The current location as tracked by `.loc` directives.
    pub fn current_location(&self) -> &Location {
        &self.current
    }

    /// Diagnostics collected during emission; directive errors are returned
    /// directly instead.
    pub fn diagnostics(&self) -> &[DwarfError] {
        &self.diagnostics
    }

    /// Returns the source information for the next generated row. With
    /// assembler-generated debug info this is the input position; otherwise
    /// it is the location accumulated from `.loc` directives.
    pub fn where_loc(&mut self) -> Location {
        if self.debug_type != DebugType::Dwarf2 {
            return self.current;
        }
        let (file, line) = self
            .input_position
            .clone()
            .expect("input position required for assembler-generated debug info");
        Location {
            file: self.files.intern(&file, 0),
            line,
            column: 0,
            isa: self.current.isa,
            discriminator: self.current.discriminator,
            flags: LineFlags::IS_STMT,
            view: None,
        }
    }

    /// Marks the pending location as used: one-shot flags, the
    /// discriminator and the view reset, sticky registers stay.
    pub fn consume_line_info(&mut self) {
        self.loc_directive_seen = false;
        self.current.flags &= !(LineFlags::BASIC_BLOCK
            | LineFlags::PROLOGUE_END
            | LineFlags::EPILOGUE_BEGIN);
        self.current.discriminator = 0;
        self.current.view = None;
    }

    /// Called for each machine instruction (or atomic group) of `size`
    /// bytes, after its bytes were emitted. Captures a row if line number
    /// generation is active.
    pub fn emit_insn(&mut self, asm: &mut Assembly, size: u64) {
        let active = match self.debug_type {
            DebugType::Dwarf2 => self.input_position.is_some(),
            DebugType::None => self.loc_directive_seen,
        };
        if !active {
            return;
        }

        let loc = self.where_loc();
        let ofs = asm.frag_now_fix() - size;
        self.gen_line_info(asm, ofs, loc);
        self.consume_line_info();
    }

    /// Called for each label. When label marking is on and the label is in
    /// a code section, captures a basic-block row at the label.
    pub fn emit_label(&mut self, asm: &mut Assembly, label: SymbolId) {
        if !self.mark_labels {
            return;
        }
        let Some(section) = asm.now_seg() else { return };
        if asm.symbol_section(label) != Some(section) {
            return;
        }
        if !asm.section_flags(section).contains(SectionFlags::CODE) {
            return;
        }
        if !self.files.seen_any() && self.debug_type != DebugType::Dwarf2 {
            return;
        }

        let mut loc = self.where_loc();
        loc.flags |= LineFlags::BASIC_BLOCK;
        self.gen_line_info_1(asm, label, loc);
        self.consume_line_info();
    }

    /// Moves all not-yet-frozen line entries sitting at the current position
    /// by `delta` bytes. Must not be called twice for the same entries.
    pub fn move_insn(&mut self, asm: &mut Assembly, delta: i64) {
        if delta == 0 {
            return;
        }
        let Some(section) = asm.now_seg() else { return };
        let subseg = asm.now_subseg();
        let Some(seg) = self.segs.iter_mut().find(|s| s.section == section) else {
            return;
        };
        let Some(lss) = seg.subsegs.iter_mut().find(|ss| ss.subseg == subseg) else {
            return;
        };

        let now = asm.frag_now_fix();
        while let Some(entry) = lss.entries.get(lss.move_tail) {
            if asm.symbol_offset(entry.label) == Some(now) {
                asm.set_symbol_offset(entry.label, (now as i64 + delta) as u64);
            }
            lss.move_tail += 1;
        }
    }

    /// Records a row for `loc` at `ofs` within the current fragment.
    pub fn gen_line_info(&mut self, asm: &mut Assembly, ofs: u64, loc: Location) {
        // Early out for as-yet incomplete location information.
        if loc.file == 0 || loc.line == 0 {
            return;
        }

        // Don't emit sequences of rows for the same line when the rows apply
        // to assembler code. Duplicates from a compiler must be kept: they
        // mark the end of the prologue.
        if self.debug_type == DebugType::Dwarf2 && self.last_row == Some((loc.file, loc.line)) {
            return;
        }
        self.last_row = Some((loc.file, loc.line));

        let frag = asm.frag_now();
        let label = if self.config.linkrelax {
            // A stable name, so relocations can target the row's address.
            let name = format!(".Loc.{}.{}", loc.line, loc.file);
            asm.named_symbol(&name, frag, ofs)
        } else {
            asm.temp_symbol(frag, ofs)
        };
        self.gen_line_info_1(asm, label, loc);
    }

    /// Records a row for `loc` at an existing label.
    pub(crate) fn gen_line_info_1(&mut self, asm: &mut Assembly, label: SymbolId, loc: Location) {
        let Some(section) = asm.now_seg() else { return };
        let subseg = asm.now_subseg();

        let seg_index = match self.segs.iter().position(|s| s.section == section) {
            Some(index) => index,
            None => {
                self.segs.push(LineSeg {
                    section,
                    subsegs: Vec::new(),
                    text_start: None,
                    text_end: None,
                });
                self.segs.len() - 1
            }
        };
        let seg = &mut self.segs[seg_index];
        let pos = seg.subsegs.partition_point(|ss| ss.subseg < subseg);
        if seg.subsegs.get(pos).map(|ss| ss.subseg) != Some(subseg) {
            seg.subsegs.insert(
                pos,
                LineSubseg {
                    subseg,
                    entries: Vec::new(),
                    move_tail: 0,
                },
            );
        }
        let lss = &mut seg.subsegs[pos];

        let has_view = loc.view.is_some();
        lss.entries.push(LineEntry { label, loc });
        if has_view {
            let index = lss.entries.len() - 1;
            view::set_or_check_view(asm, &mut self.view_state, &mut lss.entries, index, true);
        }
    }

    /// Performs the deferred view checks. Call after
    /// [`finish`](Self::finish); reports at most one mismatch.
    pub fn final_check(&mut self, asm: &mut Assembly) -> Result<(), DwarfError> {
        // The accumulator is a chain of adds; walk it iteratively, it could
        // be very deep.
        while let Some(symbol) = self.view_state.assert_failed {
            let check = match asm.symbol_expr(symbol) {
                Some(crate::asm::Expr::Add(acc, check)) => {
                    self.view_state.assert_failed = Some(acc);
                    check
                }
                _ => {
                    self.view_state.assert_failed = None;
                    symbol
                }
            };
            match asm.resolve_symbol(check) {
                Some(0) => continue,
                _ => return Err(DwarfErrorKind::ViewMismatch.into()),
            }
        }
        Ok(())
    }
}
