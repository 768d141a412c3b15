//! Shared protocol definitions for the `LineChat` wire format.
//!
//! - [`cipher`]: the keyed letter substitution applied to chat bodies.
//! - [`frame`]: parsing and rendering of the newline-delimited frames.

pub mod cipher;
pub mod frame;
