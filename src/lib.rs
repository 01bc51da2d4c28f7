//! reqflow runs trees of remote requests.
//!
//! Requests are organised in groups; sibling groups and the requests inside a
//! group run concurrently, and a group's children start once all of its
//! requests have settled. Every request and response is kept in a shared
//! execution context that later requests read to build their own input.

pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod request;
pub mod transport;
pub mod tree;
