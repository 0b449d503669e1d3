//! Manifest-indirection layer (spec.md §4.5): the pointer-object plus
//! epoch minting that lets multiple writers safely coexist on a shared
//! object-storage prefix.

pub mod coordinator;
pub mod epoch;

pub use coordinator::{CloudManifestCoordinator, ReaderOpen, WriterOpen, CLOUDMANIFEST_KEY};
pub use epoch::Epoch;
