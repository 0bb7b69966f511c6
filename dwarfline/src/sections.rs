//! The companion debug sections and the finalization entry point.
//!
//! When the assembler itself produced the line information, a minimal
//! compilation unit is emitted alongside it: `.debug_info` with a single
//! `DW_TAG_compile_unit` DIE, its `.debug_abbrev`, the `.debug_aranges`
//! index, `.debug_ranges` when the code is disjoint, and the `.debug_str`
//! pool holding the three strings the DIE references.

use gimli::constants;

use crate::asm::{Assembly, Expr, SectionFlags, SectionId, SymbolId};
use crate::config::DwarfFormat;
use crate::opcode::LinePack;
use crate::writer::{DwarfWriter, LineSeg};

impl DwarfWriter {
    fn out_abbrev(&self, asm: &mut Assembly, name: constants::DwAt, form: constants::DwForm) {
        asm.emit_uleb128(u64::from(name.0));
        asm.emit_uleb128(u64::from(form.0));
    }

    /// Emits `.debug_ranges`: a base address selection, one range per code
    /// section, and the end-of-list entry.
    fn out_debug_ranges(&mut self, asm: &mut Assembly, ranges_sec: SectionId, segs: &mut [LineSeg]) {
        asm.switch_to(ranges_sec, 0);
        let address_size = usize::from(self.config.address_size);

        // Base address selection entry.
        for _ in 0..address_size {
            asm.emit_u8(0xff);
        }
        for _ in 0..address_size {
            asm.emit_u8(0);
        }

        for seg in segs.iter_mut() {
            let first = asm.first_frag(seg.section).expect("line seg without code");
            let beg = asm.temp_symbol(first, 0);
            seg.text_start = Some(beg);

            let last = asm.last_frag(seg.section).expect("line seg without code");
            let end_ofs = asm.frag_fix(last);
            let end = asm.temp_symbol(last, end_ofs);
            seg.text_end = Some(end);

            asm.emit_expr(Expr::Symbol { symbol: beg, addend: 0 }, address_size);
            asm.emit_expr(Expr::Symbol { symbol: end, addend: 0 }, address_size);
        }

        // End of list entry.
        for _ in 0..2 * address_size {
            asm.emit_u8(0);
        }
    }

    /// Emits `.debug_aranges`: the lookup table from address ranges to the
    /// compilation unit.
    fn out_debug_aranges(
        &mut self,
        asm: &mut Assembly,
        aranges_sec: SectionId,
        info_sec: SectionId,
        segs: &mut [LineSeg],
    ) {
        let address_size = usize::from(self.config.address_size);
        let (sizeof_offset, aranges_end, mut size) = self.out_header(asm, aranges_sec);

        asm.emit_u16(2);
        size += 2;

        let info_sym = asm.section_symbol(info_sec);
        asm.emit_expr(
            Expr::Symbol {
                symbol: info_sym,
                addend: 0,
            },
            sizeof_offset,
        );
        size += sizeof_offset;

        asm.emit_u8(self.config.address_size);
        size += 1;

        // Size of a segment descriptor.
        asm.emit_u8(0);
        size += 1;

        // Align the header so the address pairs start on a natural boundary.
        while size % (2 * address_size) > 0 {
            asm.emit_u8(0);
            size += 1;
        }

        for seg in segs.iter_mut() {
            let first = asm.first_frag(seg.section).expect("line seg without code");
            let beg = asm.temp_symbol(first, 0);
            seg.text_start = Some(beg);

            let last = asm.last_frag(seg.section).expect("line seg without code");
            let end_ofs = asm.frag_fix(last);
            let end = asm.temp_symbol(last, end_ofs);
            seg.text_end = Some(end);

            asm.emit_expr(Expr::Symbol { symbol: beg, addend: 0 }, address_size);
            asm.emit_expr(
                Expr::Subtract {
                    minuend: end,
                    subtrahend: beg,
                    addend: 0,
                },
                address_size,
            );
        }

        for _ in 0..2 * address_size {
            asm.emit_u8(0);
        }
        asm.set_symbol_value_now(aranges_end);
    }

    /// Emits `.debug_abbrev`. Must be kept in sync with
    /// [`out_debug_info`](Self::out_debug_info).
    fn out_debug_abbrev(
        &mut self,
        asm: &mut Assembly,
        abbrev_sec: SectionId,
        info_sec: SectionId,
        line_sec: SectionId,
        contiguous: bool,
    ) {
        let line_format = self.config.format_for(asm.section_name(line_sec));
        let info_format = self.config.format_for(asm.section_name(info_sec));
        asm.switch_to(abbrev_sec, 0);

        asm.emit_uleb128(1);
        asm.emit_uleb128(u64::from(constants::DW_TAG_compile_unit.0));
        asm.emit_u8(constants::DW_CHILDREN_no.0);
        if line_format == DwarfFormat::Bits32 {
            self.out_abbrev(asm, constants::DW_AT_stmt_list, constants::DW_FORM_data4);
        } else {
            self.out_abbrev(asm, constants::DW_AT_stmt_list, constants::DW_FORM_data8);
        }
        if contiguous {
            self.out_abbrev(asm, constants::DW_AT_low_pc, constants::DW_FORM_addr);
            if self.config.version < 4 {
                self.out_abbrev(asm, constants::DW_AT_high_pc, constants::DW_FORM_addr);
            } else if self.config.address_size == 4 {
                self.out_abbrev(asm, constants::DW_AT_high_pc, constants::DW_FORM_data4);
            } else {
                self.out_abbrev(asm, constants::DW_AT_high_pc, constants::DW_FORM_data8);
            }
        } else if info_format == DwarfFormat::Bits32 {
            self.out_abbrev(asm, constants::DW_AT_ranges, constants::DW_FORM_data4);
        } else {
            self.out_abbrev(asm, constants::DW_AT_ranges, constants::DW_FORM_data8);
        }
        self.out_abbrev(asm, constants::DW_AT_name, constants::DW_FORM_strp);
        self.out_abbrev(asm, constants::DW_AT_comp_dir, constants::DW_FORM_strp);
        self.out_abbrev(asm, constants::DW_AT_producer, constants::DW_FORM_strp);
        self.out_abbrev(asm, constants::DW_AT_language, constants::DW_FORM_data2);
        asm.emit_uleb128(0);
        asm.emit_uleb128(0);

        // Terminate the abbreviations for this compilation unit.
        asm.emit_u8(0);
    }

    /// Emits the three strings of `.debug_str` and returns symbols to them.
    fn out_debug_str(
        &mut self,
        asm: &mut Assembly,
        str_sec: SectionId,
    ) -> (SymbolId, SymbolId, SymbolId) {
        asm.switch_to(str_sec, 0);

        // The primary file name. The command line is long gone, so take
        // file table entry 1 as the main input; at least one row was
        // emitted, so the table cannot be empty here.
        let name_sym = asm.temp_symbol_here();
        let entry = self
            .files
            .entry(1)
            .expect("no file table entry for the main input file");
        if entry.dir != 0 {
            let dir = self.config.remap_debug_filename(self.files.dir_name(entry.dir));
            let joined = dwarfline_common::join_file_path(&dir, &entry.name);
            asm.append(joined.as_bytes());
        } else {
            asm.append(entry.name.as_bytes());
        }
        asm.emit_u8(0);

        let comp_dir_sym = asm.temp_symbol_here();
        let comp_dir = self.config.remap_debug_filename(&self.config.comp_dir);
        asm.append(comp_dir.as_bytes());
        asm.emit_u8(0);

        let producer_sym = asm.temp_symbol_here();
        let producer = format!("GNU AS {}", self.config.as_version);
        asm.append(producer.as_bytes());
        asm.emit_u8(0);

        (name_sym, comp_dir_sym, producer_sym)
    }

    /// Emits the `.debug_info` compilation unit DIE.
    #[allow(clippy::too_many_arguments)]
    fn out_debug_info(
        &mut self,
        asm: &mut Assembly,
        info_sec: SectionId,
        abbrev_sec: SectionId,
        line_sec: SectionId,
        ranges_sec: Option<SectionId>,
        segs: &[LineSeg],
        name_sym: SymbolId,
        comp_dir_sym: SymbolId,
        producer_sym: SymbolId,
    ) {
        let address_size = usize::from(self.config.address_size);
        let line_format = self.config.format_for(asm.section_name(line_sec));
        let (sizeof_offset, info_end, _) = self.out_header(asm, info_sec);

        asm.emit_u16(self.config.version);

        let abbrev_sym = asm.section_symbol(abbrev_sec);
        asm.emit_expr(
            Expr::Symbol {
                symbol: abbrev_sym,
                addend: 0,
            },
            sizeof_offset,
        );

        asm.emit_u8(self.config.address_size);

        // DW_TAG_compile_unit, abbreviation code 1.
        asm.emit_uleb128(1);

        // DW_AT_stmt_list
        let line_sym = asm.section_symbol(line_sec);
        asm.emit_expr(
            Expr::Symbol {
                symbol: line_sym,
                addend: 0,
            },
            line_format.offset_size(),
        );

        if let [seg] = segs {
            // Contiguous code: DW_AT_low_pc and DW_AT_high_pc.
            let start = seg.text_start.expect("text bounds not bound");
            let end = seg.text_end.expect("text bounds not bound");
            asm.emit_expr(
                Expr::Symbol {
                    symbol: start,
                    addend: 0,
                },
                address_size,
            );
            if self.config.version < 4 {
                asm.emit_expr(Expr::Symbol { symbol: end, addend: 0 }, address_size);
            } else {
                asm.emit_expr(
                    Expr::Subtract {
                        minuend: end,
                        subtrahend: start,
                        addend: 0,
                    },
                    address_size,
                );
            }
        } else {
            // Disjoint code: DW_AT_ranges.
            let ranges_sym =
                asm.section_symbol(ranges_sec.expect("disjoint code without .debug_ranges"));
            asm.emit_expr(
                Expr::Symbol {
                    symbol: ranges_sym,
                    addend: 0,
                },
                sizeof_offset,
            );
        }

        for symbol in [name_sym, comp_dir_sym, producer_sym] {
            asm.emit_expr(Expr::Symbol { symbol, addend: 0 }, sizeof_offset);
        }

        // The DWARF 2 draft has no language code for assembler input; the
        // MIPS assembler code is the convention.
        asm.emit_u16(constants::DW_LANG_Mips_Assembler.0);

        asm.set_symbol_value_now(info_end);
    }

    /// Finishes the debug sections: emits `.debug_line` for everything the
    /// pass collected, emits the companion sections unless debug info was
    /// supplied by the compiler, and runs layout.
    ///
    /// Call exactly once, after all input was assembled. Diagnostics raised
    /// here are collected on [`diagnostics`](Self::diagnostics).
    pub fn finish(&mut self, asm: &mut Assembly) {
        assert!(!self.finished, "debug sections already finished");
        self.finished = true;

        let emit_other_sections = asm
            .section_by_name(".debug_info")
            .map_or(true, |sec| asm.section_is_empty(sec));
        let empty_debug_line = asm
            .section_by_name(".debug_line")
            .map_or(true, |sec| asm.section_is_empty(sec));

        // A pre-existing non-empty .debug_line cannot be extended.
        if !self.segs.is_empty() && !empty_debug_line {
            panic!("duplicate .debug_line sections");
        }

        // Without line information and without a compiler-supplied
        // .debug_info there is nothing to do; likewise when both a full
        // .debug_info and a full .debug_line already exist.
        if (self.segs.is_empty() && emit_other_sections)
            || (!emit_other_sections && !empty_debug_line)
        {
            return;
        }

        tracing::debug!(
            segments = self.segs.len(),
            emit_other_sections,
            "emitting debug sections"
        );

        let mut pack = LinePack::new(
            self.config.line,
            self.config.address_size,
            self.config.use_fixed_advance_pc(),
        );

        let line_sec = asm.section(".debug_line", SectionFlags::DEBUG);
        let mut segs = std::mem::take(&mut self.segs);
        self.out_debug_line(asm, &mut pack, line_sec, &mut segs);

        // If this is assembler generated line info and no debug info was
        // supplied, the minimal compilation unit sections go with it.
        if emit_other_sections {
            assert!(!segs.is_empty(), "line info without any line segments");

            let info_sec = asm.section(".debug_info", SectionFlags::DEBUG);
            let abbrev_sec = asm.section(".debug_abbrev", SectionFlags::DEBUG);
            let aranges_sec = asm.section(".debug_aranges", SectionFlags::DEBUG);
            let str_sec = asm.section(".debug_str", SectionFlags::DEBUG | SectionFlags::STRINGS);

            let ranges_sec = if segs.len() > 1 {
                let ranges_sec = asm.section(".debug_ranges", SectionFlags::DEBUG);
                self.out_debug_ranges(asm, ranges_sec, &mut segs);
                Some(ranges_sec)
            } else {
                None
            };

            self.out_debug_aranges(asm, aranges_sec, info_sec, &mut segs);
            self.out_debug_abbrev(asm, abbrev_sec, info_sec, line_sec, segs.len() == 1);
            let (name_sym, comp_dir_sym, producer_sym) = self.out_debug_str(asm, str_sec);
            self.out_debug_info(
                asm,
                info_sec,
                abbrev_sec,
                line_sec,
                ranges_sec,
                &segs,
                name_sym,
                comp_dir_sym,
                producer_sym,
            );
        }

        asm.finalize(&mut pack);
        self.diagnostics.append(&mut pack.diagnostics);
    }
}
