//! OpLog Store - Object store collaborator contract
//!
//! The queue core drives a storage fabric through the [`ObjectStore`] trait:
//! atomic per-object header compare-and-swap, exclusive create, append-only
//! content writes, and time-leased exclusive locks. Production embedders
//! implement the trait against their fabric; [`MemoryStore`] is an
//! in-process implementation with the same semantics.

pub mod memory;
pub mod object_store;

pub use memory::MemoryStore;
pub use object_store::ObjectStore;
