//! Service implementations
//!
//! Real implementations of the collaborator traits. These are the only
//! parts of the engine that touch the file system.

pub mod diversity;
pub mod item_store;
pub mod labeler;
pub mod snapshot_store;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use diversity::PassthroughDiversity;
pub use item_store::{Item, JsonlItemStore};
pub use labeler::{SimulatedLabeler, parse_label_response};
pub use snapshot_store::FileSnapshotStore;
