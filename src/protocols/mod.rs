//! Protocol implementations.
//!
//! - `echo`: tagged echo with a per-connection shutdown keyword

pub mod echo;
