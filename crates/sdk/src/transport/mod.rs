//! Transport layer for the toolgate SDK.

pub mod http;

pub use http::HttpTransport;
