//! Mock API Server
//!
//! A small persistent mock-API server: register fake HTTP routes
//! (method, path, status, body) over a CRUD API, then replay them on
//! request. Registered mocks live in a SQLite store; dispatch goes
//! through an in-memory route index rebuilt from the store after every
//! mutation. A secondary event store overlays a presence flag onto
//! static JSON fixtures.
//!
//! # Example
//!
//! ```text
//! POST /api/add-mock   {"route": "users", "method": "GET",
//!                       "status": 200, "response": {"name": "Ada"}}
//! GET  /mock/users     -> 200 {"name": "Ada"}
//! GET  /mock/missing   -> 404
//! ```
//!
//! All API routes are gated on an exact-match `Authorization` header.

pub mod config;
pub mod error;
pub mod index;
pub mod registry;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use registry::Registry;
pub use server::{router, AppState};
pub use store::MockStore;
