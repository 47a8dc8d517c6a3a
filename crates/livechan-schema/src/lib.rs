//! Per-channel column schemas ("bonds") and record formatting.
//!
//! Row payloads arrive as positional arrays. A channel's bond, received once
//! during its `init` phase, names each position. Until a channel has a bond
//! its rows cannot be formatted.

pub mod error;
pub mod formatter;
pub mod record;
pub mod registry;

pub use error::{FormatError, Result};
pub use formatter::{format_row, LegRule, LEG_RULES, MISSING_LABEL};
pub use record::Record;
pub use registry::{Bond, BondRegistry};
