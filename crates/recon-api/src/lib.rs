//! The HTTP surface for the reconciliation engine: an axum router over
//! `recon-db`, permission-checked at every handler via the `X-User` header.

pub mod actor;
pub mod api_types;
pub mod error_map;
pub mod routes;
pub mod state;
