//! Response caching for remote fetches
//!
//! - `ResponseCache`: TTL key/value store of fetched JSON
//! - `RequestCoalescer`: one in-flight fetch per key, globally throttled
//! - `FetchError` / `HttpFetcher`: fetch outcomes and a JSON GET helper

pub mod coalescer;
pub mod fetch;
pub mod response;

pub use coalescer::RequestCoalescer;
pub use fetch::{FetchError, HttpFetcher};
pub use response::{CacheStatsSnapshot, Invalidation, ResponseCache};
