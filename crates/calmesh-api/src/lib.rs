//! CalMesh API - Actor RPC surface
//!
//! Pathname-dispatched JSON over HTTP: every actor operation is a route
//! under `/accounts/{account_id}/...` or `/users/{user_id}/...`. Unknown
//! pathnames return 404 plain text; every other failure returns 500 with
//! `{"error": message}`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::api_router;
pub use state::AppState;
