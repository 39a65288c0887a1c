//! Lattice core engine.
//!
//! Turns directed acyclic workflow graphs into executable SQL, dispatches
//! to the appropriate analytical store, memoizes results under content
//! fingerprints with tenant isolation, and fans status and data deltas out
//! across client connections via a shared message bus.
//!
//! # Pipeline
//!
//! ```text
//! WorkflowGraph
//!     ↓ schema::SchemaEngine      (validate, propagate column schemas)
//!     ↓ compile::WorkflowCompiler (merge operators into SQL segments)
//!     ↓ cache::QueryCache         (fingerprint, read-through, single-flight)
//!     ↓ route::QueryRouter        (dispatch per segment target)
//!     ↓ store::*                  (analytical / live / point clients)
//! ```
//!
//! Execution requests additionally stream status transitions through
//! [`channel::ChannelHub`]; live-mode widgets are served by
//! [`live::LiveDataPoller`].

pub mod cache;
pub mod channel;
pub mod compile;
pub mod config;
pub mod exec;
pub mod formula;
pub mod graph;
pub mod live;
pub mod ratelimit;
pub mod route;
pub mod schema;
pub mod sql;
pub mod store;

pub use lattice_error::{CompileError, CompileErrorKind, CoreError, Result, RouterError};
