//! CalMesh Provider - Google and Microsoft calendar clients
//!
//! Everything the core needs from the outside world: token refresh and
//! revocation, event listing with cursor paging, mirror writes, watch
//! channels, and Graph subscriptions. The [`TokenClient`] and
//! [`CalendarApi`] traits are the seams; [`http::HttpProviderClient`] is the
//! production implementation and [`testing`] carries in-memory doubles.

pub mod api;
pub mod google;
pub mod http;
pub mod microsoft;
pub mod normalize;
pub mod testing;
pub mod types;

pub use api::{CalendarApi, TokenClient};
pub use http::HttpProviderClient;
pub use types::*;
