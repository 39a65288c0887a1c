//! Backing-store clients.
//!
//! Four stores, four clients:
//! - [`AnalyticalStore`]: SQL over HTTP, JSON result format, read-only;
//! - [`LiveStore`]: PostgreSQL wire protocol pool, read-only;
//! - [`PointStore`]: exact-key lookups in the fast store;
//! - [`FastStore`]: cache entries, counters, execution records, pub/sub.
//!
//! The query router is the only caller of the first three; everything else
//! goes through the fast store.

mod analytical;
mod fast;
mod live;
mod point;

pub use analytical::AnalyticalStore;
pub use fast::{BusMessage, FastStore};
pub use live::LiveStore;
pub use point::PointStore;
