//! Tollgate - multi-tenant reverse proxy
//!
//! Requests are mapped to configured upstream sites and forwarded no faster
//! than each upstream host's configured interval allows.

pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;
pub mod server;
