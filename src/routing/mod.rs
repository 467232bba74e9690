//! Site selection and per-upstream throttling.
//!
//! - **`host_key`**: canonical `hostname:port` identity of an upstream
//! - **`site`**: configured upstreams and their lookup by name or host
//! - **`auth`**: credentials attached to forwarded requests
//! - **`queue`**: interval-spaced FIFO admission for one host
//! - **`registry`**: one queue per host, created on demand
//! - **`router`**: ties the above together for each request

pub mod auth;
pub mod host_key;
pub mod queue;
pub mod registry;
pub mod router;
pub mod site;

pub use auth::Auth;
pub use host_key::{HostKey, Scheme};
pub use queue::{Admission, DispatchQueue};
pub use registry::QueueRegistry;
pub use router::{Outcome, Route, RouteError, Router, Target};
pub use site::{Site, SiteRegistry};
