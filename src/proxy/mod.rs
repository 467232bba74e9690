//! Collaborators around the router
//!
//! The transport that talks to upstreams, plus the response cache and the
//! CORS layer that may answer a request before it is routed.

pub mod cache;
pub mod cors;
pub mod upstream;

pub use cache::{CacheKey, CachedResponse, ResponseCache};
pub use cors::Cors;
pub use upstream::{ProxyTransport, UpstreamTransport};
