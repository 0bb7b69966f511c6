use std::error::Error;

use thiserror::Error;

/// The error kind for [`DwarfError`].
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DwarfErrorKind {
    /// A `.file` or `.loc` directive used a file number below one.
    #[error("file number less than one")]
    FileNumberLessThanOne,

    /// A `.file` directive targeted a slot that already holds a different file.
    #[error("file number {0} already allocated")]
    FileNumberAllocated(u32),

    /// A `.loc` directive or the emitter referenced an empty file slot.
    #[error("unassigned file number {0}")]
    UnassignedFileNumber(u32),

    /// The `is_stmt` sub-directive had a value other than 0 or 1.
    #[error("is_stmt value not 0 or 1")]
    InvalidIsStmt,

    /// The `isa` sub-directive had a negative value.
    #[error("isa number less than zero")]
    NegativeIsa,

    /// The `discriminator` sub-directive had a negative value.
    #[error("discriminator less than zero")]
    NegativeDiscriminator,

    /// A `.loc` directive carried an unrecognized sub-directive.
    #[error("unknown .loc sub-directive `{0}`")]
    UnknownLocSubDirective(String),

    /// A numeric view can only be asserted to zero.
    #[error("numeric view can only be asserted to zero")]
    NumericViewNotZero,

    /// A named view symbol is already defined and cannot be redefined.
    #[error("symbol `{0}` is already defined")]
    SymbolAlreadyDefined(String),

    /// A view number asserted to reset did not resolve to zero.
    #[error("view number mismatch")]
    ViewMismatch,

    /// An address advance was not a multiple of the minimum instruction length.
    #[error("unaligned opcodes detected in executable segment")]
    UnalignedOpcodes,

    /// A boolean directive operand was neither 0 nor 1.
    #[error("expected 0 or 1")]
    ExpectedZeroOrOne,

    /// A directive operand was not a number.
    #[error("expected a number")]
    ExpectedNumber,

    /// A directive operand was not a quoted string.
    #[error("expected a quoted string")]
    ExpectedString,

    /// A `view` sub-directive operand was not a symbol name.
    #[error("expected symbol name")]
    ExpectedSymbolName,

    /// A directive had trailing operands.
    #[error("junk at end of line")]
    JunkAtEndOfLine,
}

/// An error produced while generating DWARF debug line information.
///
/// Directive errors discard the offending directive; deferred errors are
/// reported by [`final_check`](crate::DwarfWriter::final_check).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl DwarfError {
    /// Creates a new DWARF error from a known kind of error as well as an
    /// arbitrary error payload.
    #[allow(dead_code)]
    pub(crate) fn new<E>(kind: DwarfErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`DwarfErrorKind`] for this error.
    pub fn kind(&self) -> &DwarfErrorKind {
        &self.kind
    }
}

impl From<DwarfErrorKind> for DwarfError {
    fn from(kind: DwarfErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl PartialEq for DwarfError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
