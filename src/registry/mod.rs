//! Entity registry for liveness tracking
//!
//! The registry tracks every device and streaming session the engine has
//! heard from, keyed by entity id. Handlers touch entries on every inbound
//! message; the statistics aggregator sweeps the registry periodically to
//! flip silent entities offline and to evict ones stale beyond retention.
//!
//! # Lifecycle
//!
//! ```text
//!   register / touch          sweep(timeout)            evict(retention)
//!  ─────────────────► online ────────────────► offline ──────────────────► removed
//!                       ▲                         │        (skipped while
//!                       └──────── touch ──────────┘         attached > 0)
//! ```
//!
//! All mutation is serialized through one `RwLock`; readers get cloned
//! snapshots and never observe a half-updated entity.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{Entity, EntityCounts, EntityKind};
pub use error::RegistryError;
pub use store::EntityRegistry;
