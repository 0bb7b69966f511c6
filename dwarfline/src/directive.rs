//! The `.file`, `.loc` and `.loc_mark_labels` directive handlers.
//!
//! The handlers parse the operand text of a directive and update the
//! writer's state. An error discards the directive; whatever state was
//! already committed before the offending operand stays, matching how an
//! assembler reports and continues.

use crate::asm::Assembly;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::location::LineFlags;
use crate::writer::{DebugType, DwarfWriter};

/// The outcome of a `.file` directive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileDirective {
    /// The legacy `.file "name"` form: an application-level file change the
    /// embedder forwards; no table entry is made.
    AppFile(String),
    /// `.file N "name"` assigned a file table slot.
    Entry {
        /// The assigned file number.
        number: u32,
        /// The path as written in the directive.
        path: String,
    },
}

/// Cursor over a directive's operand text.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input.trim_start() }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn is_empty(&mut self) -> bool {
        self.skip_ws();
        self.rest.is_empty()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    /// An optionally signed decimal number.
    fn number(&mut self) -> Option<i64> {
        self.skip_ws();
        let negative = self.rest.starts_with('-');
        let digits = self.rest[negative as usize..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|len| len + negative as usize)
            .unwrap_or(self.rest.len());
        let (number, rest) = self.rest.split_at(digits);
        let value: i64 = number.parse().ok()?;
        self.rest = rest;
        Some(value)
    }

    /// A double-quoted string with `\"` and `\\` escapes.
    fn string(&mut self) -> Option<String> {
        self.skip_ws();
        let mut chars = self.rest.char_indices();
        if chars.next()? != (0, '"') {
            return None;
        }
        let mut value = String::new();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &self.rest[i + 1..];
                    return Some(value);
                }
                '\\' => value.push(chars.next()?.1),
                c => value.push(c),
            }
        }
        None
    }

    /// A symbol-ish name: letters, digits, `_`, `.`, `$`.
    fn name(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (name, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(name)
    }
}

impl DwarfWriter {
    /// Handles a `.file` directive.
    ///
    /// The numbered form assigns a file table slot and switches off
    /// assembler-generated debug info; the bare-string form is returned for
    /// the embedder to treat as an application-level file change.
    pub fn directive_file(&mut self, args: &str) -> Result<FileDirective, DwarfError> {
        let mut scanner = Scanner::new(args);

        // Continue to accept a bare string and pass it on.
        if scanner.peek() == Some('"') {
            let path = scanner
                .string()
                .ok_or(DwarfErrorKind::ExpectedString)?;
            return Ok(FileDirective::AppFile(path));
        }

        let number = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
        let path = scanner.string().ok_or(DwarfErrorKind::ExpectedString)?;
        if !scanner.is_empty() {
            return Err(DwarfErrorKind::JunkAtEndOfLine.into());
        }

        if number < 1 {
            return Err(DwarfErrorKind::FileNumberLessThanOne.into());
        }
        let number = number as u32;

        // A .file directive means the compiler supplies debug information;
        // assembler-generated output stops here.
        self.debug_type = DebugType::None;

        if let Some(existing) = self.files.entry(number) {
            let (dir, base) = dwarfline_common::split_file_path(&path);
            if existing.name != base || self.files.dir_name(existing.dir) != dir.unwrap_or("") {
                return Err(DwarfErrorKind::FileNumberAllocated(number).into());
            }
            return Ok(FileDirective::Entry { number, path });
        }

        self.files.intern(&path, number);
        Ok(FileDirective::Entry { number, path })
    }

    /// Handles a `.loc` directive.
    pub fn directive_loc(&mut self, asm: &mut Assembly, args: &str) -> Result<(), DwarfError> {
        // Two .loc directives in a row force the first one out now.
        if self.loc_directive_seen {
            self.emit_insn(asm, 0);
        }

        let mut scanner = Scanner::new(args);
        let filenum = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
        let line = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;

        if filenum < 1 {
            return Err(DwarfErrorKind::FileNumberLessThanOne.into());
        }
        let filenum = filenum as u32;
        if self.files.entry(filenum).is_none() {
            return Err(DwarfErrorKind::UnassignedFileNumber(filenum).into());
        }

        self.current.file = filenum;
        self.current.line = line as u32;
        self.current.discriminator = 0;

        if scanner.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.current.column = scanner.number().unwrap_or(0) as u32;
        }

        while scanner.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            let name = scanner.name().expect("alphabetic lookahead");
            match name {
                "basic_block" => self.current.flags |= LineFlags::BASIC_BLOCK,
                "prologue_end" => self.current.flags |= LineFlags::PROLOGUE_END,
                "epilogue_begin" => self.current.flags |= LineFlags::EPILOGUE_BEGIN,
                "is_stmt" => {
                    let value = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
                    match value {
                        0 => self.current.flags &= !LineFlags::IS_STMT,
                        1 => self.current.flags |= LineFlags::IS_STMT,
                        _ => return Err(DwarfErrorKind::InvalidIsStmt.into()),
                    }
                }
                "isa" => {
                    let value = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
                    if value < 0 {
                        return Err(DwarfErrorKind::NegativeIsa.into());
                    }
                    self.current.isa = value as u32;
                }
                "discriminator" => {
                    let value = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
                    if value < 0 {
                        return Err(DwarfErrorKind::NegativeDiscriminator.into());
                    }
                    self.current.discriminator = value as u32;
                }
                "view" => self.parse_view(asm, &mut scanner)?,
                unknown => {
                    return Err(DwarfErrorKind::UnknownLocSubDirective(unknown.into()).into())
                }
            }
        }

        if !scanner.is_empty() {
            return Err(DwarfErrorKind::JunkAtEndOfLine.into());
        }

        self.loc_directive_seen = true;
        self.debug_type = DebugType::None;

        // Given a view id, the row goes out right away.
        if self.current.view.is_some() {
            self.emit_insn(asm, 0);
        }
        Ok(())
    }

    fn parse_view(&mut self, asm: &mut Assembly, scanner: &mut Scanner<'_>) -> Result<(), DwarfError> {
        let symbol = if scanner.peek().is_some_and(|c| c.is_ascii_digit() || c == '-') {
            let force_reset = scanner.peek() == Some('-');
            let value = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
            if value != 0 {
                return Err(DwarfErrorKind::NumericViewNotZero.into());
            }
            match self.view_state.force_reset {
                Some(sentinel) if force_reset => sentinel,
                _ => {
                    let symbol = asm.undefined_symbol();
                    if force_reset {
                        self.view_state.force_reset = Some(symbol);
                    }
                    symbol
                }
            }
        } else {
            let name = scanner.name().ok_or(DwarfErrorKind::ExpectedSymbolName)?;
            let symbol = asm.find_or_make(name);
            if asm.symbol_is_defined(symbol) {
                if !asm.symbol_is_redefinable(symbol) {
                    return Err(DwarfErrorKind::SymbolAlreadyDefined(name.into()).into());
                }
                asm.clone_symbol_reset(symbol)
            } else {
                symbol
            }
        };
        self.current.view = Some(symbol);
        Ok(())
    }

    /// Handles a `.loc_mark_labels` directive: turns the basic-block row
    /// per label on or off.
    pub fn directive_loc_mark_labels(&mut self, args: &str) -> Result<(), DwarfError> {
        let mut scanner = Scanner::new(args);
        let value = scanner.number().ok_or(DwarfErrorKind::ExpectedNumber)?;
        if value != 0 && value != 1 {
            return Err(DwarfErrorKind::ExpectedZeroOrOne.into());
        }
        if !scanner.is_empty() {
            return Err(DwarfErrorKind::JunkAtEndOfLine.into());
        }
        self.mark_labels = value != 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DwarfConfig;
    use gimli::RunTimeEndian;

    fn setup() -> (DwarfWriter, Assembly) {
        let mut asm = Assembly::new(RunTimeEndian::Little);
        let text = asm.section(".text", crate::SectionFlags::CODE);
        asm.switch_to(text, 0);
        (DwarfWriter::new(DwarfConfig::default()), asm)
    }

    #[test]
    fn test_file_legacy_form() {
        let (mut writer, _) = setup();
        assert_eq!(
            writer.directive_file(r#""main.s""#).unwrap(),
            FileDirective::AppFile("main.s".into())
        );
        assert!(!writer.files.seen_any());
    }

    #[test]
    fn test_file_numbered() {
        let (mut writer, _) = setup();
        writer.directive_file(r#"1 "dir/main.c""#).unwrap();
        assert_eq!(writer.files.entry(1).unwrap().name, "main.c");
    }

    #[test]
    fn test_file_number_less_than_one() {
        let (mut writer, _) = setup();
        let err = writer.directive_file(r#"0 "a.c""#).unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::FileNumberLessThanOne);
    }

    #[test]
    fn test_file_slot_conflict() {
        let (mut writer, _) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        let err = writer.directive_file(r#"1 "b.c""#).unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::FileNumberAllocated(1));
        // Re-assigning the identical path is tolerated.
        writer.directive_file(r#"1 "a.c""#).unwrap();
    }

    #[test]
    fn test_loc_unassigned_file() {
        let (mut writer, mut asm) = setup();
        let err = writer.directive_loc(&mut asm, "7 10").unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::UnassignedFileNumber(7));
    }

    #[test]
    fn test_loc_options() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        writer
            .directive_loc(&mut asm, "1 10 4 prologue_end is_stmt 0 isa 2 discriminator 3")
            .unwrap();
        let loc = writer.current_location();
        assert_eq!((loc.file, loc.line, loc.column), (1, 10, 4));
        assert!(loc.flags.contains(LineFlags::PROLOGUE_END));
        assert!(!loc.flags.contains(LineFlags::IS_STMT));
        assert_eq!(loc.isa, 2);
        assert_eq!(loc.discriminator, 3);
    }

    #[test]
    fn test_loc_unknown_sub_directive() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        let err = writer.directive_loc(&mut asm, "1 10 bogus").unwrap_err();
        assert_eq!(
            *err.kind(),
            DwarfErrorKind::UnknownLocSubDirective("bogus".into())
        );
    }

    #[test]
    fn test_loc_is_stmt_range() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        let err = writer.directive_loc(&mut asm, "1 10 is_stmt 2").unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::InvalidIsStmt);
    }

    #[test]
    fn test_loc_numeric_view_must_be_zero() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        let err = writer.directive_loc(&mut asm, "1 10 view 1").unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::NumericViewNotZero);
    }

    #[test]
    fn test_loc_view_rejects_defined_symbol() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        writer.directive_loc(&mut asm, "1 10 view .LVU1").unwrap();
        // The algebra defined .LVU1; binding it again is an error.
        let err = writer
            .directive_loc(&mut asm, "1 11 view .LVU1")
            .unwrap_err();
        assert_eq!(
            *err.kind(),
            DwarfErrorKind::SymbolAlreadyDefined(".LVU1".into())
        );
    }

    #[test]
    fn test_loc_view_clones_redefinable_symbol() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        let equated = asm.equate_symbol(".LVE", crate::Expr::Constant(7));
        writer.directive_loc(&mut asm, "1 10 view .LVE").unwrap();
        // The name was taken over by a fresh symbol; the old value stays.
        let clone = asm.lookup_symbol(".LVE").unwrap();
        assert_ne!(clone, equated);
        assert_eq!(asm.symbol_value(equated), Some(7));
        assert_eq!(asm.symbol_value(clone), Some(0));
    }

    #[test]
    fn test_loc_view_emits_row_immediately() {
        let (mut writer, mut asm) = setup();
        writer.directive_file(r#"1 "a.c""#).unwrap();
        writer.directive_loc(&mut asm, "1 10 view .LVU1").unwrap();
        // The row went out: the pending flag was consumed again.
        assert!(!writer.loc_directive_seen);
        assert!(asm.lookup_symbol(".LVU1").is_some());
    }

    #[test]
    fn test_mark_labels_validation() {
        let (mut writer, _) = setup();
        writer.directive_loc_mark_labels(" 1").unwrap();
        assert!(writer.mark_labels);
        let err = writer.directive_loc_mark_labels("2").unwrap_err();
        assert_eq!(*err.kind(), DwarfErrorKind::ExpectedZeroOrOne);
    }
}
