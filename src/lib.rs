pub mod config;
pub mod cors;
pub mod error;
pub mod extractor;
pub mod metering;
pub mod ratelimit;
pub mod routes;
