//! The assembly state the generator works against.
//!
//! This models the slice of an assembler backend the debug info generator
//! needs: named sections split into numbered subsections, subsections split
//! into fragment chains, a symbol table with value expressions, and fixups
//! for values that are only known once layout settles.
//!
//! Fragments are byte vectors that may be closed by one variant tail, a
//! reservation whose final size depends on symbol values. Relaxation
//! re-estimates every variant until sizes converge, converts them to plain
//! bytes, and then patches fixups.

mod symbol;

use std::collections::HashMap;

use bitflags::bitflags;
use gimli::RunTimeEndian;

use dwarfline_common::{write_sleb128, write_uleb128};

use crate::opcode::LinePack;

pub use self::symbol::{Expr, SymbolId};
pub(crate) use self::symbol::{Binding, Symbol, SymbolTable};

/// Handle to a section of an [`Assembly`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SectionId(pub(crate) u32);

/// Handle to a fragment of an [`Assembly`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FragId(pub(crate) u32);

bitflags! {
    /// Properties of a section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SectionFlags: u8 {
        /// The section holds executable code.
        const CODE = 1;
        /// The section holds debugging information.
        const DEBUG = 2;
        /// The section holds mergeable NUL-terminated strings.
        const STRINGS = 4;
    }
}

/// A pending line-number encoding whose size depends on symbol values.
#[derive(Debug)]
pub(crate) struct LineVariant {
    /// The line advance to encode.
    pub line_delta: i64,
    /// Expression symbol for the address advance (`to - from`).
    pub addr: SymbolId,
    /// The label the advance ends at.
    pub to: SymbolId,
    /// Worst-case room reserved for the encoding.
    pub max_chars: usize,
    /// Current size estimate.
    pub subtype: usize,
}

#[derive(Debug)]
struct Fragment {
    section: SectionId,
    data: Vec<u8>,
    variant: Option<LineVariant>,
    address: u64,
}

#[derive(Debug)]
struct Subsection {
    number: u32,
    frags: Vec<FragId>,
}

#[derive(Debug)]
struct Section {
    name: String,
    flags: SectionFlags,
    subsections: Vec<Subsection>,
}

/// A value to patch into already-emitted bytes once symbols resolve.
///
/// Fixups that still refer to unresolvable symbols after layout are the
/// relocations a real object writer would emit; they stay queryable through
/// [`Assembly::fixups`].
#[derive(Debug)]
pub struct Fixup {
    /// Section the patched bytes live in.
    pub section: SectionId,
    pub(crate) frag: FragId,
    /// Byte offset of the patched field within its fragment.
    pub offset: usize,
    /// Width of the patched field in bytes.
    pub size: usize,
    /// The value to patch in.
    pub expr: Expr,
    /// Whether the value resolved and was written.
    pub applied: bool,
}

/// Sections, fragments and symbols of a single assembly run.
#[derive(Debug)]
pub struct Assembly {
    endian: RunTimeEndian,
    sections: Vec<Section>,
    by_name: HashMap<String, SectionId>,
    frags: Vec<Fragment>,
    symtab: SymbolTable,
    fixups: Vec<Fixup>,
    cur: Option<(SectionId, u32)>,
    addresses_valid: bool,
}

impl Assembly {
    /// Creates an empty assembly with the given byte order.
    pub fn new(endian: RunTimeEndian) -> Self {
        Self {
            endian,
            sections: Vec::new(),
            by_name: HashMap::new(),
            frags: Vec::new(),
            symtab: SymbolTable::default(),
            fixups: Vec::new(),
            cur: None,
            addresses_valid: false,
        }
    }

    /// The byte order of emitted data.
    pub fn endian(&self) -> RunTimeEndian {
        self.endian
    }

    /// Finds or creates the named section. Flags are only applied on
    /// creation.
    pub fn section(&mut self, name: &str, flags: SectionFlags) -> SectionId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            name: name.into(),
            flags,
            subsections: Vec::new(),
        });
        self.by_name.insert(name.into(), id);
        id
    }

    /// Returns the named section if it exists.
    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.by_name.get(name).copied()
    }

    /// The name of a section.
    pub fn section_name(&self, section: SectionId) -> &str {
        &self.sections[section.0 as usize].name
    }

    /// The flags of a section.
    pub fn section_flags(&self, section: SectionId) -> SectionFlags {
        self.sections[section.0 as usize].flags
    }

    /// Returns `true` if nothing has been emitted into the section.
    pub fn section_is_empty(&self, section: SectionId) -> bool {
        self.sections[section.0 as usize]
            .subsections
            .iter()
            .flat_map(|ss| &ss.frags)
            .all(|&f| {
                let frag = &self.frags[f.0 as usize];
                frag.data.is_empty() && frag.variant.is_none()
            })
    }

    /// Makes (section, subsection) the target of subsequent emission.
    pub fn switch_to(&mut self, section: SectionId, subsection: u32) {
        self.ensure_subsection(section, subsection);
        self.cur = Some((section, subsection));
    }

    /// The section currently being emitted into.
    pub fn now_seg(&self) -> Option<SectionId> {
        self.cur.map(|(section, _)| section)
    }

    /// The subsection currently being emitted into.
    pub fn now_subseg(&self) -> u32 {
        self.cur.map(|(_, subsection)| subsection).unwrap_or(0)
    }

    fn ensure_subsection(&mut self, section: SectionId, subsection: u32) {
        let subsections = &mut self.sections[section.0 as usize].subsections;
        let pos = subsections.partition_point(|ss| ss.number < subsection);
        if subsections.get(pos).map(|ss| ss.number) != Some(subsection) {
            let frag = FragId(self.frags.len() as u32);
            self.frags.push(Fragment {
                section,
                data: Vec::new(),
                variant: None,
                address: 0,
            });
            self.sections[section.0 as usize].subsections.insert(
                pos,
                Subsection {
                    number: subsection,
                    frags: vec![frag],
                },
            );
        }
    }

    fn cur_subsection(&mut self) -> &mut Subsection {
        let (section, subsection) = self.cur.expect("no current section");
        let subsections = &mut self.sections[section.0 as usize].subsections;
        let pos = subsections.partition_point(|ss| ss.number < subsection);
        &mut subsections[pos]
    }

    /// The open fragment of the current subsection.
    pub(crate) fn frag_now(&mut self) -> FragId {
        *self.cur_subsection().frags.last().expect("empty subsection")
    }

    /// The number of bytes already emitted into the current fragment.
    pub fn frag_now_fix(&mut self) -> u64 {
        let frag = self.frag_now();
        self.frags[frag.0 as usize].data.len() as u64
    }

    /// The fixed size of a fragment.
    pub(crate) fn frag_fix(&self, frag: FragId) -> u64 {
        self.frags[frag.0 as usize].data.len() as u64
    }

    /// Starts a new fragment in the current subsection.
    pub fn close_frag(&mut self) {
        let (section, _) = self.cur.expect("no current section");
        let frag = FragId(self.frags.len() as u32);
        self.frags.push(Fragment {
            section,
            data: Vec::new(),
            variant: None,
            address: 0,
        });
        self.cur_subsection().frags.push(frag);
    }

    /// Appends raw bytes to the current fragment.
    pub fn append(&mut self, bytes: &[u8]) {
        let frag = self.frag_now();
        self.frags[frag.0 as usize].data.extend_from_slice(bytes);
    }

    /// Emits a single byte.
    pub fn emit_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    /// Emits a two-byte word in target byte order.
    pub fn emit_u16(&mut self, value: u16) {
        self.emit_word(2, value as u64);
    }

    /// Emits a four-byte word in target byte order.
    pub fn emit_u32(&mut self, value: u32) {
        self.emit_word(4, value as u64);
    }

    /// Emits the low `size` bytes of `value` in target byte order.
    pub fn emit_word(&mut self, size: usize, value: u64) {
        let frag = self.frag_now();
        let data = &mut self.frags[frag.0 as usize].data;
        let start = data.len();
        data.resize(start + size, 0);
        put_word(&mut data[start..], self.endian, value);
    }

    /// Emits an unsigned LEB128 value.
    pub fn emit_uleb128(&mut self, value: u64) {
        let frag = self.frag_now();
        write_uleb128(&mut self.frags[frag.0 as usize].data, value);
    }

    /// Emits a signed LEB128 value.
    pub fn emit_sleb128(&mut self, value: i64) {
        let frag = self.frag_now();
        write_sleb128(&mut self.frags[frag.0 as usize].data, value);
    }

    /// Reserves `size` bytes for an expression value and records a fixup.
    pub fn emit_expr(&mut self, expr: Expr, size: usize) {
        let (section, _) = self.cur.expect("no current section");
        let frag = self.frag_now();
        let offset = self.frags[frag.0 as usize].data.len();
        self.frags[frag.0 as usize].data.resize(offset + size, 0);
        self.fixups.push(Fixup {
            section,
            frag,
            offset,
            size,
            expr,
            applied: false,
        });
    }

    /// Closes the current fragment with a variant line-number encoding,
    /// reserving worst-case room, and opens a fresh fragment after it.
    pub(crate) fn reserve_variant(&mut self, variant: LineVariant) {
        let frag = self.frag_now();
        let slot = &mut self.frags[frag.0 as usize];
        debug_assert!(slot.variant.is_none());
        slot.variant = Some(variant);
        self.close_frag();
    }

    // ---- Symbols ----

    /// Creates an anonymous label at the given fragment offset.
    pub(crate) fn temp_symbol(&mut self, frag: FragId, offset: u64) -> SymbolId {
        self.symtab.push(Symbol {
            name: None,
            binding: Binding::Frag { frag, offset },
            redefinable: false,
        })
    }

    /// Creates an anonymous label at the current emission point.
    pub fn temp_symbol_here(&mut self) -> SymbolId {
        let frag = self.frag_now();
        let offset = self.frag_fix(frag);
        self.temp_symbol(frag, offset)
    }

    /// Creates a named label at the given fragment offset.
    pub(crate) fn named_symbol(&mut self, name: &str, frag: FragId, offset: u64) -> SymbolId {
        self.symtab.push(Symbol {
            name: Some(name.into()),
            binding: Binding::Frag { frag, offset },
            redefinable: false,
        })
    }

    /// Creates a named label at the current emission point.
    pub fn named_symbol_here(&mut self, name: &str) -> SymbolId {
        let frag = self.frag_now();
        let offset = self.frag_fix(frag);
        self.named_symbol(name, frag, offset)
    }

    /// Creates a named symbol to be bound later.
    pub fn named_undefined_symbol(&mut self, name: &str) -> SymbolId {
        self.symtab.push(Symbol {
            name: Some(name.into()),
            binding: Binding::Undefined,
            redefinable: false,
        })
    }

    /// Creates an undefined symbol to be bound later.
    pub fn undefined_symbol(&mut self) -> SymbolId {
        self.symtab.push(Symbol {
            name: None,
            binding: Binding::Undefined,
            redefinable: false,
        })
    }

    /// Creates a symbol holding an absolute-section expression.
    pub fn expr_symbol(&mut self, expr: Expr) -> SymbolId {
        self.symtab.push(Symbol {
            name: None,
            binding: Binding::Absolute(expr),
            redefinable: false,
        })
    }

    /// Defines a name by an expression the way an equate directive does.
    /// Unlike labels, an equated symbol may be redefined later.
    pub fn equate_symbol(&mut self, name: &str, expr: Expr) -> SymbolId {
        self.symtab.push(Symbol {
            name: Some(name.into()),
            binding: Binding::Absolute(expr),
            redefinable: true,
        })
    }

    /// Finds an existing named symbol or creates an undefined one.
    pub fn find_or_make(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.symtab.lookup(name) {
            return id;
        }
        self.symtab.push(Symbol {
            name: Some(name.into()),
            binding: Binding::Undefined,
            redefinable: false,
        })
    }

    /// Looks up a symbol by name.
    pub fn lookup_symbol(&self, name: &str) -> Option<SymbolId> {
        self.symtab.lookup(name)
    }

    /// Replaces a redefinable symbol with a fresh undefined one of the same
    /// name. The old symbol keeps its value; the name now maps to the clone.
    pub(crate) fn clone_symbol_reset(&mut self, symbol: SymbolId) -> SymbolId {
        let name = self.symtab.get(symbol).name.clone();
        self.symtab.push(Symbol {
            name,
            binding: Binding::Undefined,
            redefinable: false,
        })
    }

    /// Whether the symbol has a value binding.
    pub fn symbol_is_defined(&self, symbol: SymbolId) -> bool {
        !matches!(self.symtab.get(symbol).binding, Binding::Undefined)
    }

    /// Whether a `.loc view` directive may rebind the name.
    pub(crate) fn symbol_is_redefinable(&self, symbol: SymbolId) -> bool {
        self.symtab.get(symbol).redefinable
    }

    /// The name of a symbol, if it has one.
    pub fn symbol_name(&self, symbol: SymbolId) -> Option<&str> {
        self.symtab.get(symbol).name.as_deref()
    }

    /// Gives an undefined symbol an absolute-section expression value.
    pub(crate) fn define_absolute(&mut self, symbol: SymbolId, expr: Expr) {
        let slot = self.symtab.get_mut(symbol);
        debug_assert!(matches!(slot.binding, Binding::Undefined));
        slot.binding = Binding::Absolute(expr);
    }

    /// Binds a symbol to the current emission point.
    pub fn set_symbol_value_now(&mut self, symbol: SymbolId) {
        let frag = self.frag_now();
        let offset = self.frag_fix(frag);
        self.symtab.get_mut(symbol).binding = Binding::Frag { frag, offset };
    }

    /// The fragment a label is bound to.
    pub(crate) fn symbol_frag(&self, symbol: SymbolId) -> Option<FragId> {
        match self.symtab.get(symbol).binding {
            Binding::Frag { frag, .. } => Some(frag),
            _ => None,
        }
    }

    /// The fragment offset of a label.
    pub(crate) fn symbol_offset(&self, symbol: SymbolId) -> Option<u64> {
        match self.symtab.get(symbol).binding {
            Binding::Frag { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// Changes the fragment offset of a label.
    pub(crate) fn set_symbol_offset(&mut self, symbol: SymbolId, offset: u64) {
        if let Binding::Frag { offset: slot, .. } = &mut self.symtab.get_mut(symbol).binding {
            *slot = offset;
        }
    }

    /// The section a label is bound into.
    pub fn symbol_section(&self, symbol: SymbolId) -> Option<SectionId> {
        let frag = self.symbol_frag(symbol)?;
        self.frag_section(frag)
    }

    fn frag_section(&self, frag: FragId) -> Option<SectionId> {
        Some(self.frags[frag.0 as usize].section)
    }

    /// A label at offset zero of the section, creating the section's first
    /// fragment if needed.
    pub(crate) fn section_symbol(&mut self, section: SectionId) -> SymbolId {
        self.ensure_subsection(section, 0);
        let frag = self.sections[section.0 as usize].subsections[0].frags[0];
        self.temp_symbol(frag, 0)
    }

    /// The first fragment of a section, if any bytes were emitted.
    pub(crate) fn first_frag(&self, section: SectionId) -> Option<FragId> {
        self.sections[section.0 as usize]
            .subsections
            .first()
            .and_then(|ss| ss.frags.first().copied())
    }

    /// The last fragment of a section.
    pub(crate) fn last_frag(&self, section: SectionId) -> Option<FragId> {
        self.sections[section.0 as usize]
            .subsections
            .last()
            .and_then(|ss| ss.frags.last().copied())
    }

    // ---- Resolution ----

    /// The current value of a symbol, if it can be computed.
    ///
    /// Labels only have values once layout has run; before that, only
    /// same-fragment comparisons and differences resolve.
    pub fn symbol_value(&self, symbol: SymbolId) -> Option<i64> {
        match &self.symtab.get(symbol).binding {
            Binding::Undefined => None,
            Binding::Frag { frag, offset } => self
                .addresses_valid
                .then(|| (self.frags[frag.0 as usize].address + offset) as i64),
            Binding::Absolute(expr) => self.resolve(&expr.clone()),
        }
    }

    /// Evaluates an expression to a constant if current knowledge allows.
    pub fn resolve(&self, expr: &Expr) -> Option<i64> {
        match *expr {
            Expr::Constant(value) => Some(value),
            Expr::Symbol { symbol, addend } => Some(self.symbol_value(symbol)? + addend),
            Expr::Subtract {
                minuend,
                subtrahend,
                addend,
            } => {
                let (a, b) = self.relatable_values(minuend, subtrahend)?;
                Some(a.wrapping_sub(b).wrapping_add(addend))
            }
            Expr::Gt(left, right) => {
                let (a, b) = self.relatable_values(left, right)?;
                Some((a > b) as i64)
            }
            Expr::LogicalNot(operand) => Some((self.symbol_value(operand)? == 0) as i64),
            Expr::Multiply(left, right) => {
                Some(self.symbol_value(left)?.wrapping_mul(self.symbol_value(right)?))
            }
            Expr::Add(left, right) => {
                Some(self.symbol_value(left)?.wrapping_add(self.symbol_value(right)?))
            }
        }
    }

    /// Values of two symbols in a common frame of reference, suitable for
    /// comparison or subtraction.
    fn relatable_values(&self, left: SymbolId, right: SymbolId) -> Option<(i64, i64)> {
        let (lb, rb) = (
            &self.symtab.get(left).binding,
            &self.symtab.get(right).binding,
        );
        if let (
            Binding::Frag {
                frag: lf,
                offset: lo,
            },
            Binding::Frag {
                frag: rf,
                offset: ro,
            },
        ) = (lb, rb)
        {
            if lf == rf {
                return Some((*lo as i64, *ro as i64));
            }
            if self.addresses_valid && self.frag_section(*lf) == self.frag_section(*rf) {
                return Some((
                    (self.frags[lf.0 as usize].address + lo) as i64,
                    (self.frags[rf.0 as usize].address + ro) as i64,
                ));
            }
            return None;
        }
        Some((self.symbol_value(left)?, self.symbol_value(right)?))
    }

    /// Resolves a symbol and simplifies its expression to the result.
    pub(crate) fn resolve_symbol(&mut self, symbol: SymbolId) -> Option<i64> {
        let value = self.symbol_value(symbol)?;
        let slot = self.symtab.get_mut(symbol);
        if matches!(slot.binding, Binding::Absolute(_)) {
            slot.binding = Binding::Absolute(Expr::Constant(value));
        }
        Some(value)
    }

    /// The expression a symbol is bound to, if it is expression-valued.
    pub(crate) fn symbol_expr(&self, symbol: SymbolId) -> Option<Expr> {
        match &self.symtab.get(symbol).binding {
            Binding::Absolute(expr) => Some(expr.clone()),
            _ => None,
        }
    }

    // ---- Layout ----

    fn assign_addresses(&mut self) {
        for section in &self.sections {
            let mut address = 0u64;
            for subsection in &section.subsections {
                for &frag in &subsection.frags {
                    let slot = frag.0 as usize;
                    let size = self.frags[slot].data.len()
                        + self.frags[slot].variant.as_ref().map_or(0, |v| v.subtype);
                    self.frags[slot].address = address;
                    address += size as u64;
                }
            }
        }
    }

    fn estimate_variant(&mut self, frag: FragId, pack: &mut LinePack) -> usize {
        let variant = self.frags[frag.0 as usize].variant.as_ref().unwrap();
        let (line_delta, addr) = (variant.line_delta, variant.addr);
        let addr_delta = self
            .resolve_symbol(addr)
            .expect("address delta must resolve during relaxation") as u64;
        let size = pack.size_variant(line_delta, addr_delta);
        self.frags[frag.0 as usize].variant.as_mut().unwrap().subtype = size;
        size
    }

    fn convert_variant(&mut self, frag: FragId, pack: &mut LinePack) {
        let slot = frag.0 as usize;
        let variant = self.frags[slot].variant.take().unwrap();
        let addr_delta = self
            .resolve_symbol(variant.addr)
            .expect("address delta must resolve after relaxation");

        // fr_var carries the room the fragment was created with; the final
        // length must fit in it.
        assert!(
            variant.max_chars >= variant.subtype,
            "variant line encoding grew past its reservation"
        );

        let base = self.frags[slot].data.len();
        let mut out = Vec::with_capacity(variant.subtype);
        let fixups = pack.emit_variant(&variant, addr_delta, &mut out);
        assert_eq!(out.len(), variant.subtype, "line opcode size/emit mismatch");
        self.frags[slot].data.extend_from_slice(&out);

        let section = self.frags[slot].section;
        for (offset, size, expr) in fixups {
            self.fixups.push(Fixup {
                section,
                frag,
                offset: base + offset,
                size,
                expr,
                applied: false,
            });
        }
    }

    /// Runs relaxation to convergence, converts variant fragments, freezes
    /// addresses and applies fixups.
    pub(crate) fn finalize(&mut self, pack: &mut LinePack) {
        let variants: Vec<FragId> = (0..self.frags.len() as u32)
            .map(FragId)
            .filter(|f| self.frags[f.0 as usize].variant.is_some())
            .collect();

        self.assign_addresses();
        self.addresses_valid = true;

        for &frag in &variants {
            self.estimate_variant(frag, pack);
        }

        let mut passes = 0usize;
        loop {
            self.assign_addresses();
            let mut changed = false;
            for &frag in &variants {
                let old = self.frags[frag.0 as usize].variant.as_ref().unwrap().subtype;
                if self.estimate_variant(frag, pack) != old {
                    changed = true;
                }
            }
            passes += 1;
            if !changed {
                break;
            }
        }
        tracing::debug!(variants = variants.len(), passes, "line relaxation converged");

        for &frag in &variants {
            self.convert_variant(frag, pack);
        }
        self.assign_addresses();
        self.apply_fixups();
    }

    fn apply_fixups(&mut self) {
        let mut fixups = std::mem::take(&mut self.fixups);
        for fixup in &mut fixups {
            if let Some(value) = self.resolve(&fixup.expr) {
                let data = &mut self.frags[fixup.frag.0 as usize].data;
                let field = &mut data[fixup.offset..fixup.offset + fixup.size];
                put_word(field, self.endian, value as u64);
                fixup.applied = true;
            }
        }
        self.fixups = fixups;
    }

    /// The fixups recorded so far; after layout, unapplied entries are what
    /// an object writer would emit as relocations.
    pub fn fixups(&self) -> &[Fixup] {
        &self.fixups
    }

    /// The final bytes of the named section, flattened in subsection order.
    pub fn section_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let section = self.section_by_name(name)?;
        let mut bytes = Vec::new();
        for subsection in &self.sections[section.0 as usize].subsections {
            for &frag in &subsection.frags {
                bytes.extend_from_slice(&self.frags[frag.0 as usize].data);
            }
        }
        Some(bytes)
    }
}

fn put_word(field: &mut [u8], endian: RunTimeEndian, value: u64) {
    let size = field.len();
    for (i, slot) in field.iter_mut().enumerate() {
        let shift = match endian {
            RunTimeEndian::Little => 8 * i,
            RunTimeEndian::Big => 8 * (size - 1 - i),
        };
        *slot = (value >> shift) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_frag_resolution() {
        let mut asm = Assembly::new(RunTimeEndian::Little);
        let text = asm.section(".text", SectionFlags::CODE);
        asm.switch_to(text, 0);
        asm.append(&[0; 4]);
        let a = asm.temp_symbol_here();
        asm.append(&[0; 2]);
        let b = asm.temp_symbol_here();

        assert_eq!(
            asm.resolve(&Expr::Subtract {
                minuend: b,
                subtrahend: a,
                addend: 0
            }),
            Some(2)
        );
        assert_eq!(asm.resolve(&Expr::Gt(b, a)), Some(1));
        assert_eq!(asm.resolve(&Expr::Gt(a, b)), Some(0));
        // Values on their own are unknown before layout.
        assert_eq!(asm.symbol_value(a), None);
    }

    #[test]
    fn test_cross_frag_deferral() {
        let mut asm = Assembly::new(RunTimeEndian::Little);
        let text = asm.section(".text", SectionFlags::CODE);
        asm.switch_to(text, 0);
        let a = asm.temp_symbol_here();
        asm.append(&[0; 4]);
        asm.close_frag();
        asm.append(&[0; 4]);
        let b = asm.temp_symbol_here();

        let delta = Expr::Subtract {
            minuend: b,
            subtrahend: a,
            addend: 0,
        };
        assert_eq!(asm.resolve(&delta), None);

        let mut pack = LinePack::new(crate::LineParams::default(), 8, false);
        asm.finalize(&mut pack);
        assert_eq!(asm.resolve(&delta), Some(8));
    }

    #[test]
    fn test_subsection_flattening_order() {
        let mut asm = Assembly::new(RunTimeEndian::Little);
        let sec = asm.section(".data", SectionFlags::empty());
        asm.switch_to(sec, 2);
        asm.append(b"bb");
        asm.switch_to(sec, 1);
        asm.append(b"a");
        asm.switch_to(sec, 3);
        asm.append(b"c");
        assert_eq!(asm.section_bytes(".data").unwrap(), b"abbc");
    }

    #[test]
    fn test_fixup_patching() {
        let mut asm = Assembly::new(RunTimeEndian::Little);
        let sec = asm.section(".data", SectionFlags::empty());
        asm.switch_to(sec, 0);
        let start = asm.temp_symbol_here();
        let end = asm.undefined_symbol();
        asm.emit_expr(
            Expr::Subtract {
                minuend: end,
                subtrahend: start,
                addend: 0,
            },
            4,
        );
        asm.append(&[0xaa; 3]);
        asm.set_symbol_value_now(end);

        let mut pack = LinePack::new(crate::LineParams::default(), 8, false);
        asm.finalize(&mut pack);
        assert_eq!(asm.section_bytes(".data").unwrap(), [7, 0, 0, 0, 0xaa, 0xaa, 0xaa]);
    }
}
