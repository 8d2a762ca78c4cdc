//! Common functionality shared by the statsite relay crates.
#![warn(missing_docs)]

mod macros;
