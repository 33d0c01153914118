//! HTTP helpers for federation metadata retrieval.

pub mod client;
