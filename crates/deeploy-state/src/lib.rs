//! Shared-state backends for the Deeploy control plane.
//!
//! Two concerns live here:
//!
//! - [`KvBackend`]: the chainstore, a multi-writer key/value store with plain
//!   and hash keys. Nodes write confirmation results into it and the control
//!   plane indexes deployed jobs in it.
//! - [`BlobBackend`]: content-addressed storage for immutable pipeline
//!   snapshots.
//!
//! Backends are selected with cargo features (`memory`, `valkey`,
//! `objectstore`) and, with the `config` feature, built from a
//! [`StateConfig`] by [`StateProvider`].

mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

#[cfg(feature = "objectstore")]
mod objectstore;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{BlobError, KvError, StateError};
pub use traits::{BlobBackend, KvBackend};
pub use types::ContentAddress;

#[cfg(feature = "memory")]
pub use memory::{MemoryBlob, MemoryKv};

#[cfg(feature = "valkey")]
pub use valkey::ValkeyKv;

#[cfg(feature = "objectstore")]
pub use objectstore::ObjectStoreBlob;

#[cfg(feature = "config")]
pub use config::{BlobConfig, KvConfig, StateConfig};

#[cfg(feature = "config")]
pub use provider::StateProvider;
