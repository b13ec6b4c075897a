//! Policy-driven HTTP output caching for axum.
//!
//! The [`cache`] module holds the engine: key building, the policy chain,
//! the store, request coalescing and conditional revalidation. [`config`]
//! and [`infra`] carry the settings and wiring used by the `outcache`
//! demonstration server.

pub mod cache;
pub mod config;
pub mod infra;
