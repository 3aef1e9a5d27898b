//! Network access for the worker: the request/response model and the
//! fetcher used on cache misses and during install.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Request, RequestKey, RequestMode, Response, ResponseKind};
