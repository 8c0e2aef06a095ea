//! The axum HTTP boundary for the auth subsystem (§6): routes, extractors,
//! `kh-auth` cookie handling, and the environment-driven state that ties
//! them to [`fuzzly_auth::AuthState`].

pub mod cookie;
pub mod extract;
pub mod routes;
pub mod state;
