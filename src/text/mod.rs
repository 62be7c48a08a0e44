//! The line-oriented text-format parser (§4.D–§4.F): reassembling
//! hard-wrapped logical lines, the indent-driven plan tree parser, and the
//! attribute sub-parsers it delegates to.

pub mod attrs;
pub mod parser;
pub mod reassemble;
