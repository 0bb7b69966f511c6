//! Emission of the `.debug_line` statement program.

use gimli::constants;

use crate::asm::{Assembly, Expr, LineVariant, SectionFlags, SectionId, SymbolId};
use crate::config::DwarfFormat;
use crate::error::DwarfErrorKind;
use crate::location::LineFlags;
use crate::opcode::{LinePack, END_SEQUENCE, EXTENDED_OP};
use crate::writer::{DwarfWriter, LineEntry, LineSeg};

/// The `.debug_line` program version this generator emits.
pub(crate) const LINE_VERSION: u16 = 2;

/// Lengths of the standard opcodes below `opcode_base` 13.
const STANDARD_OPCODE_LENGTHS: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

impl DwarfWriter {
    /// Switches to `sec` and emits its initial length field. Returns the
    /// offset size of the section, the symbol to bind at section end, and
    /// the size of the length field itself.
    pub(crate) fn out_header(
        &mut self,
        asm: &mut Assembly,
        sec: SectionId,
    ) -> (usize, SymbolId, usize) {
        let format = self.config.format_for(asm.section_name(sec));
        asm.switch_to(sec, 0);

        // With per-section line tables the start and end may land in
        // different sections, so they need real symbols.
        let (start, end) = if self.config.dwarf_sections {
            (
                asm.named_symbol_here(".Ldebug_line_start"),
                asm.named_undefined_symbol(".Ldebug_line_end"),
            )
        } else {
            (asm.temp_symbol_here(), asm.undefined_symbol())
        };

        let initial = format.initial_length_size();
        let length = Expr::Subtract {
            minuend: end,
            subtrahend: start,
            addend: -(initial as i64),
        };
        match format {
            DwarfFormat::Bits32 => asm.emit_expr(length, 4),
            DwarfFormat::Bits64 => {
                asm.emit_u32(0xffff_ffff);
                asm.emit_expr(length, 8);
            }
            DwarfFormat::Bits64Irix => asm.emit_expr(length, 8),
        }
        (format.offset_size(), end, initial)
    }

    /// Emits the directory and file tables of the line program prologue.
    fn out_file_list(&mut self, asm: &mut Assembly) {
        for dir in self.files.dirs() {
            let dir = self.config.remap_debug_filename(dir);
            asm.append(dir.as_bytes());
            asm.emit_u8(0);
        }
        asm.emit_u8(0);

        for slot in self.files.fill_missing() {
            self.diagnostics
                .push(DwarfErrorKind::UnassignedFileNumber(slot).into());
        }
        for i in 1..self.files.num_files() {
            let entry = self.files.entry(i).expect("file table hole after fill");
            asm.append(entry.name.as_bytes());
            asm.emit_u8(0);
            asm.emit_uleb128(u64::from(entry.dir));
            // Last modification time and file size are not tracked.
            asm.emit_uleb128(0);
            asm.emit_uleb128(0);
        }
        asm.emit_u8(0);
    }

    fn out_set_addr(&mut self, asm: &mut Assembly, sym: SymbolId) {
        let address_size = usize::from(self.config.address_size);
        asm.emit_u8(EXTENDED_OP);
        asm.emit_uleb128(address_size as u64 + 1);
        asm.emit_u8(constants::DW_LNE_set_address.0);
        asm.emit_expr(
            Expr::Symbol {
                symbol: sym,
                addend: 0,
            },
            address_size,
        );
    }

    fn out_inc_line_addr(
        &mut self,
        asm: &mut Assembly,
        pack: &mut LinePack,
        line_delta: i64,
        addr_delta: i64,
    ) {
        let len = pack.size_inc_line_addr(line_delta, addr_delta as u64);
        let mut buf = Vec::with_capacity(len);
        pack.emit_inc_line_addr(line_delta, addr_delta, &mut buf, len);
        asm.append(&buf);
    }

    /// Reserves a variant encoding bridging two labels whose distance is not
    /// yet known.
    fn relax_inc_line_addr(
        &mut self,
        asm: &mut Assembly,
        pack: &mut LinePack,
        line_delta: i64,
        to: SymbolId,
        from: SymbolId,
    ) {
        let addr = asm.expr_symbol(Expr::Subtract {
            minuend: to,
            subtrahend: from,
            addend: 0,
        });

        // Worst case is this line delta against the widest unsigned address
        // delta.
        let worst = -i64::from(self.config.line.min_insn_length) as u64;
        let max_chars = pack.size_variant(line_delta, worst);
        asm.reserve_variant(LineVariant {
            line_delta,
            addr,
            to,
            max_chars,
            subtype: max_chars,
        });
    }

    /// Emits the statement program for one code section's entry chain.
    fn process_entries(
        &mut self,
        asm: &mut Assembly,
        pack: &mut LinePack,
        section: SectionId,
        entries: Vec<LineEntry>,
    ) {
        if entries.is_empty() {
            return;
        }

        if self.config.dwarf_sections {
            // Emit each program into its own .debug_line.<section>
            // subsection; a .debug_line.text twin would be redundant, the
            // container itself serves for it.
            let sec_name = asm.section_name(section).to_string();
            let target = if sec_name != ".text" {
                asm.section(&format!(".debug_line{sec_name}"), SectionFlags::DEBUG)
            } else {
                asm.section(".debug_line", SectionFlags::DEBUG)
            };
            asm.switch_to(target, 0);
        }

        // Start from an unset file so the first row pins its file
        // explicitly, even when it is the consumer's default of 1.
        let mut filenum: u32 = 0;
        let mut line: u32 = 1;
        let mut column: u32 = 0;
        let mut isa: u32 = 0;
        let mut is_stmt = self.config.line.default_is_stmt;
        let mut last: Option<(crate::asm::FragId, u64, SymbolId)> = None;

        for entry in entries {
            let loc = &entry.loc;

            if filenum != loc.file {
                filenum = loc.file;
                asm.emit_u8(constants::DW_LNS_set_file.0);
                asm.emit_uleb128(u64::from(filenum));
            }

            if column != loc.column {
                column = loc.column;
                asm.emit_u8(constants::DW_LNS_set_column.0);
                asm.emit_uleb128(u64::from(column));
            }

            if loc.discriminator != 0 {
                asm.emit_u8(EXTENDED_OP);
                asm.emit_sleb128(
                    1 + dwarfline_common::uleb128_size(u64::from(loc.discriminator)) as i64,
                );
                asm.emit_u8(constants::DW_LNE_set_discriminator.0);
                asm.emit_uleb128(u64::from(loc.discriminator));
            }

            if isa != loc.isa {
                isa = loc.isa;
                asm.emit_u8(constants::DW_LNS_set_isa.0);
                asm.emit_uleb128(u64::from(isa));
            }

            if loc.flags.contains(LineFlags::IS_STMT) != is_stmt {
                is_stmt = !is_stmt;
                asm.emit_u8(constants::DW_LNS_negate_stmt.0);
            }

            if loc.flags.contains(LineFlags::BASIC_BLOCK) {
                asm.emit_u8(constants::DW_LNS_set_basic_block.0);
            }

            if loc.flags.contains(LineFlags::PROLOGUE_END) {
                asm.emit_u8(constants::DW_LNS_set_prologue_end.0);
            }

            if loc.flags.contains(LineFlags::EPILOGUE_BEGIN) {
                asm.emit_u8(constants::DW_LNS_set_epilogue_begin.0);
            }

            // Don't optimize away redundant entries; a debugger needs two
            // rows for a function whose code starts on the line of the
            // opening brace.
            let line_delta = i64::from(loc.line) - i64::from(line);
            let lab = entry.label;
            let frag = asm.symbol_frag(lab).expect("line entry label not bound");
            let frag_ofs = asm.symbol_offset(lab).expect("line entry label not bound");

            let forced =
                self.view_state.force_reset.is_some() && loc.view == self.view_state.force_reset;

            // A forced view reset has to reach the consumer as set_address
            // unless the program counter provably advances here; advancing
            // resets the consumer's view counter on its own.
            let must_set_addr = match last {
                None => true,
                Some((last_frag, last_frag_ofs, _)) => {
                    forced
                        && (if frag == last_frag {
                            last_frag_ofs == frag_ofs
                        } else {
                            frag_ofs == 0 && last_frag_ofs >= asm.frag_fix(last_frag)
                        })
                }
            };

            if must_set_addr {
                self.out_set_addr(asm, lab);
                self.out_inc_line_addr(asm, pack, line_delta, 0);
            } else {
                let (last_frag, last_frag_ofs, last_lab) = last.unwrap();
                if frag == last_frag && !pack.fixed_advance {
                    self.out_inc_line_addr(
                        asm,
                        pack,
                        line_delta,
                        frag_ofs as i64 - last_frag_ofs as i64,
                    );
                } else {
                    self.relax_inc_line_addr(asm, pack, line_delta, lab, last_lab);
                }
            }

            line = loc.line;
            last = Some((frag, frag_ofs, lab));
        }

        // Close the sequence at the end of the section's text.
        let frag = asm.last_frag(section).expect("code section without fragments");
        let frag_ofs = asm.frag_fix(frag);
        let (last_frag, last_frag_ofs, last_lab) = last.expect("sequence without entries");
        if frag == last_frag && !pack.fixed_advance {
            self.out_inc_line_addr(
                asm,
                pack,
                END_SEQUENCE,
                frag_ofs as i64 - last_frag_ofs as i64,
            );
        } else {
            let lab = asm.temp_symbol(frag, frag_ofs);
            self.relax_inc_line_addr(asm, pack, END_SEQUENCE, lab, last_lab);
        }
    }

    /// Emits the complete `.debug_line` section: prologue, file tables and
    /// one statement program per code section.
    pub(crate) fn out_debug_line(
        &mut self,
        asm: &mut Assembly,
        pack: &mut LinePack,
        line_sec: SectionId,
        segs: &mut [LineSeg],
    ) {
        let (sizeof_offset, line_end, _) = self.out_header(asm, line_sec);

        asm.emit_u16(LINE_VERSION);

        // Prologue length, a self-describing subtraction of two symbols.
        let prologue_start = asm.undefined_symbol();
        let prologue_end = asm.undefined_symbol();
        asm.emit_expr(
            Expr::Subtract {
                minuend: prologue_end,
                subtrahend: prologue_start,
                addend: 0,
            },
            sizeof_offset,
        );
        asm.set_symbol_value_now(prologue_start);

        let params = self.config.line;
        asm.emit_u8(params.min_insn_length);
        asm.emit_u8(params.default_is_stmt as u8);
        asm.emit_u8(params.line_base as u8);
        asm.emit_u8(params.line_range);
        asm.emit_u8(params.opcode_base);
        for length in STANDARD_OPCODE_LENGTHS {
            asm.emit_u8(length);
        }

        self.out_file_list(asm);
        asm.set_symbol_value_now(prologue_end);

        for seg in segs.iter_mut() {
            let entries: Vec<LineEntry> = seg
                .subsegs
                .iter_mut()
                .flat_map(|ss| std::mem::take(&mut ss.entries))
                .collect();
            self.process_entries(asm, pack, seg.section, entries);
        }

        if self.config.dwarf_sections {
            // The line_end symbol has to land after all the per-section
            // tables; a trailing placement section the linker script sorts
            // last provides that.
            let end_sec = asm.section(".debug_line_end", SectionFlags::DEBUG);
            asm.switch_to(end_sec, 0);
        }
        asm.set_symbol_value_now(line_end);
    }
}
