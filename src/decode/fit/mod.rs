//! Binary recording format support
//!
//! This module provides framing, field decoding, and the pull decoder for
//! the binary activity format produced by head units and watches.

pub mod decoder;
pub mod format;

pub use decoder::FitDecoder;
