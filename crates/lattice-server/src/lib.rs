//! Lattice HTTP and WebSocket surface.
//!
//! The thin request layer over `lattice-core`: validate inputs, resolve
//! widgets to workflows, derive tenant scope from the authenticated
//! principal, and map errors to response codes. All state flows through
//! one [`state::AppContext`] built at startup — no globals.

pub mod auth;
pub mod logging;
pub mod repo;
pub mod routes;
pub mod server;
pub mod state;
pub mod widget_service;
