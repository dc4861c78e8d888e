//! HTTP handler modules for the rpgen API.
//!
//! Handlers are thin: they parse the request, call into rpgen-core or the
//! generation controller, and return JSON.

pub mod builds;
pub mod graphs;
