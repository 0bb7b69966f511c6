//! Common functionality for the `dwarfline` crates.
//!
//! This crate exposes the low-level helpers shared by the debug-line
//! generator:
//!
//!  - Path handling for source file names coming out of compiler-generated
//!    assembly, which may use UNIX or Windows conventions regardless of the
//!    host platform.
//!  - LEB128 sizing and encoding, the variable-length integer format used
//!    throughout DWARF.

#![warn(missing_docs)]

mod leb128;
mod path;

pub use crate::leb128::*;
pub use crate::path::*;
