//! Generic HTTP remote storage backend.
//!
//! Talks to an on-premise or custom storage server exposing a small REST
//! surface under `base_url`:
//! - `GET /health`
//! - `PUT|GET|DELETE|HEAD /files/{key}`
//! - `GET /files/{key}/metadata`
//! - `GET /files?prefix=&max_results=`
//! - `POST /files/{key}/presigned`

mod adapter;
mod client;

pub use adapter::RemoteAdapter;
pub use client::{RemoteClient, RetryConfig};
