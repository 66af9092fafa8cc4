//! # grid-id
//!
//! Typed identifiers for the resources the grid ledger and directory hand out.
//!
//! ## Design Principles
//!
//! - IDs are assigned by the ledger or the directory, never generated locally
//! - IDs are positive integers; zero is reserved as "unset" on the wire
//! - IDs are typed so a node id can never be passed where a contract id is expected
//!
//! ## ID Format
//!
//! IDs display as their bare number. Parsing also accepts the prefixed form
//! `{prefix}_{number}` used in logs and CLI arguments:
//!
//! - `12` or `node_12`
//! - `4021` or `contract_4021`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
