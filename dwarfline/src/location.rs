//! The current source location as tracked between directives.

use bitflags::bitflags;

use crate::asm::SymbolId;

bitflags! {
    /// Boolean registers of a line number row.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LineFlags: u8 {
        /// The row is a recommended breakpoint location.
        const IS_STMT = 1;
        /// The row starts a basic block.
        const BASIC_BLOCK = 2;
        /// The row is where a function prologue ends.
        const PROLOGUE_END = 4;
        /// The row is where a function epilogue begins.
        const EPILOGUE_BEGIN = 8;
    }
}

/// One row of the line number matrix as the assembler sees it.
///
/// A `file` or `line` of zero marks the location as incomplete; such
/// locations are never turned into line entries. `basic_block`,
/// `prologue_end`, `epilogue_begin`, `discriminator` and `view` are one-shot
/// and reset once a row is emitted; `is_stmt` and `isa` are sticky.
#[derive(Clone, Copy, Debug)]
pub struct Location {
    /// 1-based file table index; 0 means incomplete.
    pub file: u32,
    /// 1-based source line; 0 means incomplete.
    pub line: u32,
    /// 0-based column; 0 means unknown.
    pub column: u32,
    /// Target-defined instruction set architecture.
    pub isa: u32,
    /// Discriminates multiple blocks on one source line.
    pub discriminator: u32,
    /// Boolean row registers.
    pub flags: LineFlags,
    /// The row's view number symbol, if one was requested.
    pub view: Option<SymbolId>,
}

impl Location {
    pub(crate) fn initial(default_is_stmt: bool) -> Self {
        Self {
            file: 1,
            line: 1,
            column: 0,
            isa: 0,
            discriminator: 0,
            flags: if default_is_stmt {
                LineFlags::IS_STMT
            } else {
                LineFlags::empty()
            },
            view: None,
        }
    }
}
