//! vibe-data - local data layer for the vibe events client
//!
//! Two independent pieces sit between page components and the backend:
//!
//! - **Cache**: TTL response cache with per-key request coalescing and a
//!   global dispatch throttle
//! - **Simulated store**: mode-scoped records over durable and session
//!   key/value storage, used when the client runs in demo or admin-bypass mode
//!
//! Both are constructed explicitly and passed to whoever needs them; there is
//! no process-wide state.

pub mod cache;
pub mod cli;
pub mod config;
pub mod remote;
pub mod simulated;
pub mod storage;
pub mod types;

pub use cache::{FetchError, Invalidation, RequestCoalescer, ResponseCache};
pub use config::{Args, CacheConfig};
pub use simulated::{SimulatedStore, StoreMode};
pub use types::{Result, VibeError};
