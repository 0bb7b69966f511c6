//! Host configuration for the debug info generator.
//!
//! The assembler backend supplies everything the target controls: address
//! size, byte order, the initial-length format of each debug section, the
//! line number state machine parameters, and the linker relaxation policy.

use gimli::RunTimeEndian;

/// The initial-length format of a DWARF debug section.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DwarfFormat {
    /// 32-bit DWARF: a plain 4-byte length field.
    Bits32,
    /// 64-bit DWARF: a 0xffffffff escape followed by an 8-byte length.
    Bits64,
    /// IRIX 64-bit DWARF: an 8-byte length field without the escape.
    Bits64Irix,
}

impl DwarfFormat {
    /// The size in bytes of offsets in a section of this format.
    pub fn offset_size(self) -> usize {
        match self {
            DwarfFormat::Bits32 => 4,
            DwarfFormat::Bits64 | DwarfFormat::Bits64Irix => 8,
        }
    }

    /// The size in bytes of the initial length field itself.
    pub(crate) fn initial_length_size(self) -> usize {
        match self {
            DwarfFormat::Bits32 => 4,
            DwarfFormat::Bits64 => 12,
            DwarfFormat::Bits64Irix => 8,
        }
    }
}

/// Parameters of the DWARF 2 line number state machine.
///
/// The defaults match what every DWARF 2 consumer expects; targets with a
/// fixed instruction size override `min_insn_length` to pack address
/// advances more densely.
#[derive(Clone, Copy, Debug)]
pub struct LineParams {
    /// Size in bytes of the smallest target instruction.
    pub min_insn_length: u8,
    /// Initial value of the `is_stmt` register.
    pub default_is_stmt: bool,
    /// Smallest line advance encodable in a special opcode.
    pub line_base: i8,
    /// Number of distinct line advances encodable in a special opcode.
    pub line_range: u8,
    /// First special opcode; everything below is a standard opcode.
    pub opcode_base: u8,
}

impl LineParams {
    /// The largest address advance encodable in a special opcode, in units
    /// of `min_insn_length`.
    pub fn max_special_addr_delta(&self) -> u64 {
        u64::from(255 - self.opcode_base) / u64::from(self.line_range)
    }
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            min_insn_length: 1,
            default_is_stmt: true,
            line_base: -5,
            line_range: 14,
            opcode_base: 13,
        }
    }
}

/// Host hooks and target policy for DWARF generation.
#[derive(Debug)]
pub struct DwarfConfig {
    /// Size of a target address in bytes.
    pub address_size: u8,
    /// Target byte order.
    pub endian: RunTimeEndian,
    /// Initial-length format used by debug sections.
    pub format: DwarfFormat,
    /// Per-section overrides of the initial-length format.
    pub section_formats: Vec<(String, DwarfFormat)>,
    /// Line number state machine parameters.
    pub line: LineParams,
    /// DWARF version of `.debug_info`; also selects the `high_pc` form.
    ///
    /// The line number program itself is always version 2.
    pub version: u16,
    /// Whether link-time relaxation may change code offsets. When set, line
    /// programs use `fixed_advance_pc` so the operands stay relocatable.
    pub linkrelax: bool,
    /// Emit per-section line tables into `.debug_line.<section>` sections.
    pub dwarf_sections: bool,
    /// Assembler version reported in the producer string.
    pub as_version: String,
    /// Compilation directory reported in `.debug_str`.
    pub comp_dir: String,
    /// Source path prefix rewrites, applied to directory strings on output.
    pub debug_prefix_map: Vec<(String, String)>,
}

impl DwarfConfig {
    /// Returns the initial-length format for the named section.
    pub fn format_for(&self, section: &str) -> DwarfFormat {
        self.section_formats
            .iter()
            .find(|(name, _)| name == section)
            .map(|&(_, format)| format)
            .unwrap_or(self.format)
    }

    /// Whether line programs must use the fixed-advance encoding.
    pub(crate) fn use_fixed_advance_pc(&self) -> bool {
        self.linkrelax
    }

    /// Applies the debug prefix map to a source directory or path.
    pub fn remap_debug_filename<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        for (from, to) in &self.debug_prefix_map {
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                return std::borrow::Cow::Owned(format!("{to}{rest}"));
            }
        }
        std::borrow::Cow::Borrowed(path)
    }
}

impl Default for DwarfConfig {
    fn default() -> Self {
        Self {
            address_size: 8,
            endian: RunTimeEndian::Little,
            format: DwarfFormat::Bits32,
            section_formats: Vec::new(),
            line: LineParams::default(),
            version: 2,
            linkrelax: false,
            dwarf_sections: false,
            as_version: "2.31.1".into(),
            comp_dir: std::env::current_dir()
                .ok()
                .and_then(|dir| dir.to_str().map(String::from))
                .unwrap_or_default(),
            debug_prefix_map: Vec::new(),
        }
    }
}
