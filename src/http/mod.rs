//! HTTP/1.1 wire layer.
//!
//! Only message heads are parsed into memory. Bodies stay on the socket and
//! are streamed through when a request is forwarded, which is what lets a
//! queued request hold back its body until it is admitted.
//!
//! - **`connection`**: per-connection state machine with keep-alive
//! - **`exchange`**: one request/response pair as seen by the router
//! - **`parser`**: request and response head parsing
//! - **`headers`**: ordered, case-insensitive header list
//! - **`body`**: body framing and streaming copy
//! - **`request`** / **`response`**: head types and proxy-generated responses
//! - **`writer`**: serializes proxy-generated responses
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a request head
//!        └──────┬──────┘
//!               │ Head parsed          Malformed head
//!               ▼                             │
//!        ┌──────────────────┐          ┌──────▼──────┐
//!        │     Routing      │          │   Writing   │ ← 400, then close
//!        └──────┬───────────┘          └──────┬──────┘
//!               │ Response relayed            │
//!               ├─ Keep-Alive → Reading       │
//!               └─ Close → Closed ◄───────────┘
//! ```

pub mod body;
pub mod connection;
pub mod exchange;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
