//! Rigsync
//!
//! Front-ends for the sync core: the reference counterpart server lives here
//! so both binaries and the tests can reach it.

pub mod server;
