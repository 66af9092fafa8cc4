//! Typed ID definitions for grid resources.
//!
//! Node, farm and twin IDs are 32-bit as assigned by the directory; contract
//! IDs are 64-bit ledger sequence numbers.

use crate::define_id;

// =============================================================================
// Directory
// =============================================================================

define_id!(NodeId, u32, "node");
define_id!(FarmId, u32, "farm");
define_id!(TwinId, u32, "twin");

// =============================================================================
// Ledger
// =============================================================================

define_id!(ContractId, u64, "contract");

// =============================================================================
// Tests
// =============================================================================
