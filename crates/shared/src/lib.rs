//! Tessera shared library — types, IDs, and wire contracts shared between
//! the crypto core and the client crate.

pub mod constants;
pub mod error;
pub mod ids;
pub mod model;
pub mod wire;
