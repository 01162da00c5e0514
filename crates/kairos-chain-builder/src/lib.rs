//! Chain builder: parses a markdown document into ordered step records with
//! per-step proof definitions.
//!
//! The parser is a line-oriented state machine tracking fence and heading
//! state; it deliberately avoids a general-purpose markdown AST.

mod headings;
mod parser;
mod pow;
mod tags;

pub use headings::sanitize_heading;
pub use parser::{parse_document, ChainDoc, StepDraft};
pub use pow::parse_pow_line;
