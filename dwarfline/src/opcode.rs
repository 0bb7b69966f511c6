//! Packing `(line delta, address delta)` pairs into line-number opcodes.
//!
//! Every pair is encoded as the shortest sequence DWARF 2 permits: a single
//! special opcode where possible, `const_add_pc` plus a special opcode next,
//! and the standard `advance_line`/`advance_pc` opcodes as the fallback.
//! Sizing and emission are separate entry points that must agree byte for
//! byte; emission asserts this on every path.
//!
//! When linker relaxation may change code offsets, the variable-length
//! encodings above cannot be used, and the packer switches to
//! `fixed_advance_pc` with a relocatable 16-bit operand, falling back to an
//! extended `set_address` for large advances.

use dwarfline_common::{sleb128_size, uleb128_size, write_sleb128, write_uleb128};
use gimli::constants;

use crate::asm::{Expr, LineVariant, SymbolId};
use crate::config::LineParams;
use crate::error::{DwarfError, DwarfErrorKind};

/// Line delta sentinel requesting an end-of-sequence row.
///
/// End of sequence cannot use special opcodes, since the extended opcode
/// itself must append the final matrix row.
pub(crate) const END_SEQUENCE: i64 = i64::MAX;

/// The escape byte introducing an extended opcode.
pub(crate) const EXTENDED_OP: u8 = 0;

/// The `fixed_advance_pc` opcode has a 2-byte operand, so it can advance the
/// address by at most 64K. Linker relaxation could change the operand by an
/// unknown amount; when the increment gets close to the limit, reset the
/// address instead.
const ADDR_DELTA_LIMIT: u64 = 50_000;

/// A fixup produced while emitting into a reserved buffer: byte offset,
/// field width, and the value expression.
pub(crate) type PendingFixup = (usize, usize, Expr);

/// The opcode packer, carrying the state machine parameters and the
/// one-shot alignment diagnostic latch.
#[derive(Debug)]
pub(crate) struct LinePack {
    params: LineParams,
    address_size: u8,
    pub fixed_advance: bool,
    unaligned_diagnosed: bool,
    pub diagnostics: Vec<DwarfError>,
}

impl LinePack {
    pub fn new(params: LineParams, address_size: u8, fixed_advance: bool) -> Self {
        Self {
            params,
            address_size,
            fixed_advance,
            unaligned_diagnosed: false,
            diagnostics: Vec::new(),
        }
    }

    /// Scales an address delta into units of the minimum instruction length,
    /// diagnosing a non-multiple once across the whole stream.
    fn scale_addr_delta(&mut self, addr_delta: u64) -> u64 {
        let min = u64::from(self.params.min_insn_length);
        if min <= 1 {
            return addr_delta;
        }
        if addr_delta % min != 0 && !self.unaligned_diagnosed {
            self.diagnostics
                .push(DwarfErrorKind::UnalignedOpcodes.into());
            self.unaligned_diagnosed = true;
        }
        addr_delta / min
    }

    /// The number of bytes [`emit_inc_line_addr`](Self::emit_inc_line_addr)
    /// will produce for this pair.
    pub fn size_inc_line_addr(&mut self, line_delta: i64, addr_delta: u64) -> usize {
        let addr_delta = self.scale_addr_delta(addr_delta);
        let max_special = self.params.max_special_addr_delta();

        if line_delta == END_SEQUENCE {
            let len = if addr_delta == max_special {
                1
            } else {
                1 + uleb128_size(addr_delta)
            };
            return len + 3;
        }

        let mut len = 0;

        // Bias the line delta by the base.
        let mut tmp = (line_delta - i64::from(self.params.line_base)) as u64;

        // A line increment out of special-opcode range needs advance_line.
        if tmp >= u64::from(self.params.line_range) {
            len = 1 + sleb128_size(line_delta);
            tmp = (-i64::from(self.params.line_base)) as u64;
        }

        tmp += u64::from(self.params.opcode_base);

        // Avoid overflow when addr_delta is large.
        if addr_delta < 256 + max_special {
            let range = u64::from(self.params.line_range);
            if tmp + addr_delta * range <= 255 {
                return len + 1;
            }
            if tmp.wrapping_add(addr_delta.wrapping_sub(max_special).wrapping_mul(range)) <= 255 {
                return len + 2;
            }
        }

        // advance_pc, then copy or the special opcode.
        len += 1 + uleb128_size(addr_delta);
        len + 1
    }

    /// Emits the pair, consuming exactly `len` bytes as computed by
    /// [`size_inc_line_addr`](Self::size_inc_line_addr).
    pub fn emit_inc_line_addr(
        &mut self,
        line_delta: i64,
        addr_delta: i64,
        out: &mut Vec<u8>,
        len: usize,
    ) {
        // Line number sequences cannot go backward in addresses. This means
        // the entries of the sequence were incorrectly ordered.
        assert!(addr_delta >= 0, "line entries not in address order");

        let start = out.len();
        self.emit_inc_inner(line_delta, addr_delta as u64, out);
        assert_eq!(out.len() - start, len, "line opcode size/emit mismatch");
    }

    fn emit_inc_inner(&mut self, line_delta: i64, addr_delta: u64, out: &mut Vec<u8>) {
        let addr_delta = self.scale_addr_delta(addr_delta);
        let max_special = self.params.max_special_addr_delta();
        let range = u64::from(self.params.line_range);

        if line_delta == END_SEQUENCE {
            if addr_delta == max_special {
                out.push(constants::DW_LNS_const_add_pc.0);
            } else {
                out.push(constants::DW_LNS_advance_pc.0);
                write_uleb128(out, addr_delta);
            }
            out.push(EXTENDED_OP);
            out.push(1);
            out.push(constants::DW_LNE_end_sequence.0);
            return;
        }

        let mut line_delta = line_delta;
        let mut tmp = (line_delta - i64::from(self.params.line_base)) as u64;
        let mut need_copy = false;

        if tmp >= u64::from(self.params.line_range) {
            out.push(constants::DW_LNS_advance_line.0);
            write_sleb128(out, line_delta);
            line_delta = 0;
            tmp = (-i64::from(self.params.line_base)) as u64;
            need_copy = true;
        }

        // Prettier to use copy than a "line +0, addr +0" special opcode.
        if line_delta == 0 && addr_delta == 0 {
            out.push(constants::DW_LNS_copy.0);
            return;
        }

        tmp += u64::from(self.params.opcode_base);

        if addr_delta < 256 + max_special {
            let opcode = tmp + addr_delta * range;
            if opcode <= 255 {
                out.push(opcode as u8);
                return;
            }

            let opcode = tmp.wrapping_add(addr_delta.wrapping_sub(max_special).wrapping_mul(range));
            if opcode <= 255 {
                out.push(constants::DW_LNS_const_add_pc.0);
                out.push(opcode as u8);
                return;
            }
        }

        out.push(constants::DW_LNS_advance_pc.0);
        write_uleb128(out, addr_delta);
        if need_copy {
            out.push(constants::DW_LNS_copy.0);
        } else {
            out.push(tmp as u8);
        }
    }

    /// The number of bytes the fixed-advance encoding of this pair occupies.
    pub fn size_fixed_inc_line_addr(&mut self, line_delta: i64, addr_delta: u64) -> usize {
        let mut len = 0;

        if line_delta != END_SEQUENCE {
            len = 1 + sleb128_size(line_delta);
        }

        if addr_delta > ADDR_DELTA_LIMIT {
            len += 1 + uleb128_size(u64::from(self.address_size) + 1);
            len += 1 + usize::from(self.address_size);
        } else {
            len += 3;
        }

        if line_delta == END_SEQUENCE {
            len + 3
        } else {
            len + 1
        }
    }

    /// Emits the fixed-advance encoding into `out`, returning fixups for the
    /// relocatable address operand.
    pub fn emit_fixed_inc_line_addr(
        &mut self,
        line_delta: i64,
        addr_delta: i64,
        addr: SymbolId,
        to: SymbolId,
        out: &mut Vec<u8>,
        len: usize,
    ) -> Vec<PendingFixup> {
        assert!(addr_delta >= 0, "line entries not in address order");
        assert_eq!(
            len,
            self.size_fixed_inc_line_addr(line_delta, addr_delta as u64),
            "line opcode size/emit mismatch"
        );

        let start = out.len();
        let mut fixups = Vec::new();

        if line_delta != END_SEQUENCE {
            out.push(constants::DW_LNS_advance_line.0);
            write_sleb128(out, line_delta);
        }

        if addr_delta as u64 > ADDR_DELTA_LIMIT {
            out.push(EXTENDED_OP);
            write_uleb128(out, u64::from(self.address_size) + 1);
            out.push(constants::DW_LNE_set_address.0);
            fixups.push((
                out.len() - start,
                usize::from(self.address_size),
                Expr::Symbol { symbol: to, addend: 0 },
            ));
            out.resize(out.len() + usize::from(self.address_size), 0);
        } else {
            out.push(constants::DW_LNS_fixed_advance_pc.0);
            fixups.push((
                out.len() - start,
                2,
                Expr::Symbol { symbol: addr, addend: 0 },
            ));
            out.resize(out.len() + 2, 0);
        }

        if line_delta == END_SEQUENCE {
            out.push(EXTENDED_OP);
            out.push(1);
            out.push(constants::DW_LNE_end_sequence.0);
        } else {
            out.push(constants::DW_LNS_copy.0);
        }

        assert_eq!(out.len() - start, len, "line opcode size/emit mismatch");
        fixups
    }

    /// Sizes a variant encoding in the active mode.
    pub fn size_variant(&mut self, line_delta: i64, addr_delta: u64) -> usize {
        if self.fixed_advance {
            self.size_fixed_inc_line_addr(line_delta, addr_delta)
        } else {
            self.size_inc_line_addr(line_delta, addr_delta)
        }
    }

    /// Emits a variant encoding in the active mode.
    pub fn emit_variant(
        &mut self,
        variant: &LineVariant,
        addr_delta: i64,
        out: &mut Vec<u8>,
    ) -> Vec<PendingFixup> {
        if self.fixed_advance {
            self.emit_fixed_inc_line_addr(
                variant.line_delta,
                addr_delta,
                variant.addr,
                variant.to,
                out,
                variant.subtype,
            )
        } else {
            self.emit_inc_line_addr(variant.line_delta, addr_delta, out, variant.subtype);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack() -> LinePack {
        LinePack::new(LineParams::default(), 8, false)
    }

    fn encode(line_delta: i64, addr_delta: u64) -> Vec<u8> {
        let mut pack = pack();
        let len = pack.size_inc_line_addr(line_delta, addr_delta);
        let mut out = Vec::new();
        pack.emit_inc_line_addr(line_delta, addr_delta as i64, &mut out, len);
        out
    }

    #[test]
    fn test_special_opcode_single_byte() {
        // (line +1, addr +1) packs into one byte.
        let bytes = encode(1, 1);
        assert_eq!(bytes.len(), 1);
        assert_eq!(bytes[0], 13 + (1 + 5) + 14);
    }

    #[test]
    fn test_copy_for_zero_deltas() {
        assert_eq!(encode(0, 0), [constants::DW_LNS_copy.0]);
    }

    #[test]
    fn test_const_add_pc_two_bytes() {
        // Encodable via const_add_pc + special: two bytes, never advance_pc.
        let max_special = LineParams::default().max_special_addr_delta();
        let bytes = encode(1, max_special + 1);
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], constants::DW_LNS_const_add_pc.0);
    }

    #[test]
    fn test_advance_line_prefix() {
        let bytes = encode(100, 0);
        assert_eq!(bytes[0], constants::DW_LNS_advance_line.0);
        // Line reset to zero afterwards, so the sequence closes with copy.
        assert_eq!(*bytes.last().unwrap(), constants::DW_LNS_copy.0);
    }

    #[test]
    fn test_end_sequence_tail() {
        for addr_delta in [0u64, 1, 17, 100_000] {
            let bytes = encode(END_SEQUENCE, addr_delta);
            let tail = &bytes[bytes.len() - 3..];
            assert_eq!(tail, [EXTENDED_OP, 1, constants::DW_LNE_end_sequence.0]);
        }
    }

    fn read_uleb(bytes: &[u8], pos: &mut usize) -> u64 {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = bytes[*pos];
            *pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return value;
            }
        }
    }

    fn read_sleb(bytes: &[u8], pos: &mut usize) -> i64 {
        let mut value = 0i64;
        let mut shift = 0;
        loop {
            let byte = bytes[*pos];
            *pos += 1;
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return value;
            }
        }
    }

    /// A reference DWARF 2 state machine over one encoded step: returns the
    /// accumulated line and address deltas and the number of matrix rows.
    fn run_reference(bytes: &[u8], params: &LineParams) -> (i64, u64, usize) {
        let min = u64::from(params.min_insn_length);
        let range = u64::from(params.line_range);
        let (mut line, mut addr, mut rows) = (0i64, 0u64, 0usize);
        let mut pos = 0;
        while pos < bytes.len() {
            let op = bytes[pos];
            pos += 1;
            if op >= params.opcode_base {
                let adjusted = u64::from(op - params.opcode_base);
                addr += adjusted / range * min;
                line += (adjusted % range) as i64 + i64::from(params.line_base);
                rows += 1;
            } else if op == EXTENDED_OP {
                let len = read_uleb(bytes, &mut pos) as usize;
                assert_eq!(bytes[pos], constants::DW_LNE_end_sequence.0);
                pos += len;
                rows += 1;
            } else if op == constants::DW_LNS_copy.0 {
                rows += 1;
            } else if op == constants::DW_LNS_advance_pc.0 {
                addr += read_uleb(bytes, &mut pos) * min;
            } else if op == constants::DW_LNS_advance_line.0 {
                line += read_sleb(bytes, &mut pos);
            } else if op == constants::DW_LNS_const_add_pc.0 {
                addr += params.max_special_addr_delta() * min;
            } else {
                panic!("unexpected opcode {op}");
            }
        }
        (line, addr, rows)
    }

    #[test]
    fn test_size_emit_agreement_and_reference_decode() {
        let mut pack = pack();
        let params = LineParams::default();
        for line_delta in -300i64..=300 {
            for addr_delta in (0u64..400).chain([1000, 4096, 1 << 20]) {
                let len = pack.size_inc_line_addr(line_delta, addr_delta);
                let mut out = Vec::new();
                pack.emit_inc_line_addr(line_delta, addr_delta as i64, &mut out, len);
                assert_eq!(
                    run_reference(&out, &params),
                    (line_delta, addr_delta, 1),
                    "wrong decode for ({line_delta}, {addr_delta})"
                );
            }
        }
    }

    #[test]
    fn test_scaled_addr_deltas_decode() {
        let params = LineParams {
            min_insn_length: 4,
            ..Default::default()
        };
        let mut pack = LinePack::new(params, 8, false);
        for line_delta in -20i64..=20 {
            for addr_delta in (0u64..64).map(|step| step * 4) {
                let len = pack.size_inc_line_addr(line_delta, addr_delta);
                let mut out = Vec::new();
                pack.emit_inc_line_addr(line_delta, addr_delta as i64, &mut out, len);
                assert_eq!(run_reference(&out, &params), (line_delta, addr_delta, 1));
            }
        }
        assert!(pack.diagnostics.is_empty());
    }

    #[test]
    fn test_end_sequence_reference_decode() {
        let params = LineParams::default();
        for addr_delta in [0u64, 1, 17, 100_000] {
            let bytes = encode(END_SEQUENCE, addr_delta);
            let (_, addr, rows) = run_reference(&bytes, &params);
            assert_eq!((addr, rows), (addr_delta, 1));
        }
    }

    #[test]
    fn test_minimality() {
        let mut pack = pack();
        let params = LineParams::default();
        let max_special = params.max_special_addr_delta();
        for line_delta in i64::from(params.line_base)
            ..i64::from(params.line_base) + i64::from(params.line_range)
        {
            // Anything a single special opcode can express takes one byte.
            for addr_delta in 0..=max_special {
                let tmp = (line_delta - i64::from(params.line_base)) as u64
                    + u64::from(params.opcode_base);
                if tmp + addr_delta * u64::from(params.line_range) <= 255 {
                    assert_eq!(pack.size_inc_line_addr(line_delta, addr_delta), 1);
                }
            }
            // One const_add_pc away takes two, never advance_pc + special.
            for addr_delta in max_special + 1..=2 * max_special {
                let tmp = (line_delta - i64::from(params.line_base)) as u64
                    + u64::from(params.opcode_base);
                if tmp + (addr_delta - max_special) * u64::from(params.line_range) <= 255 {
                    assert_eq!(pack.size_inc_line_addr(line_delta, addr_delta), 2);
                }
            }
        }
    }

    #[test]
    fn test_fixed_size_emit_agreement() {
        let mut pack = LinePack::new(LineParams::default(), 8, true);
        let mut asm = crate::Assembly::new(gimli::RunTimeEndian::Little);
        let to = asm.undefined_symbol();
        let addr = asm.undefined_symbol();
        for line_delta in [-5i64, 0, 1, 200, END_SEQUENCE] {
            for addr_delta in [0i64, 100, 50_001, 70_000] {
                let len = pack.size_fixed_inc_line_addr(line_delta, addr_delta as u64);
                let mut out = Vec::new();
                let fixups =
                    pack.emit_fixed_inc_line_addr(line_delta, addr_delta, addr, to, &mut out, len);
                assert_eq!(fixups.len(), 1);
            }
        }
    }

    #[test]
    fn test_fixed_large_advance_resets_address() {
        let mut pack = LinePack::new(LineParams::default(), 8, true);
        let mut asm = crate::Assembly::new(gimli::RunTimeEndian::Little);
        let to = asm.undefined_symbol();
        let addr = asm.undefined_symbol();
        let len = pack.size_fixed_inc_line_addr(1, 70_000);
        let mut out = Vec::new();
        pack.emit_fixed_inc_line_addr(1, 70_000, addr, to, &mut out, len);
        // advance_line +1, then an extended set_address instead of the
        // 16-bit fixed_advance_pc, then copy.
        assert_eq!(out[..2], [constants::DW_LNS_advance_line.0, 1]);
        assert_eq!(out[2..5], [EXTENDED_OP, 9, constants::DW_LNE_set_address.0]);
        assert_eq!(*out.last().unwrap(), constants::DW_LNS_copy.0);
    }

    #[test]
    #[should_panic(expected = "address order")]
    fn test_negative_addr_delta_is_fatal() {
        let mut pack = pack();
        let mut out = Vec::new();
        pack.emit_inc_line_addr(0, -1, &mut out, 1);
    }

    #[test]
    fn test_unaligned_diagnosed_once() {
        let params = LineParams {
            min_insn_length: 4,
            ..Default::default()
        };
        let mut pack = LinePack::new(params, 8, false);
        pack.size_inc_line_addr(0, 5);
        pack.size_inc_line_addr(0, 7);
        assert_eq!(pack.diagnostics.len(), 1);
        assert_eq!(
            *pack.diagnostics[0].kind(),
            DwarfErrorKind::UnalignedOpcodes
        );
    }
}
