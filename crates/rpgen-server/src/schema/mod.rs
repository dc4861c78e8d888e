//! API schema types for request/response definitions.
//!
//! Each sub-module defines the request and response types for a specific
//! API domain. Graph documents travel as [`GraphSnapshot`](rpgen_core::GraphSnapshot)
//! JSON, the same format the checkpoint store persists.

pub mod builds;
pub mod graphs;
