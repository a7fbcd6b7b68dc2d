//! Generalized data store (GDS) component backed by shared memory.
//!
//! A privileged server process materializes a namespace's job metadata once
//! into a file-backed shared-memory segment; unprivileged local clients
//! attach the same file at the same virtual address and read keys directly,
//! with no RPC round trip and no copy. [`gds_shmem_core`] owns the arena
//! allocator and segment lifecycle this crate builds on; this crate adds
//! the namespace-level protocol: sizing, publishing, attaching, and the
//! post-fence modex store.
//!
//! Start at [`component::GdsShmemComponent`] for the per-process entry
//! point, or at [`publisher::Publisher`] / [`attacher::Attacher`] /
//! [`modex::ModexStore`] for the individual roles.

pub mod attacher;
pub mod blob;
pub mod collaborators;
pub mod component;
pub mod config;
pub mod error;
pub mod kv;
pub mod modex;
pub mod publisher;
pub mod registry;
pub mod sizing;

pub use attacher::Attacher;
pub use component::GdsShmemComponent;
pub use config::Config;
pub use error::{Error, Result};
pub use kv::{Kv, KvValue};
pub use modex::ModexStore;
pub use publisher::Publisher;
pub use registry::Registry;
