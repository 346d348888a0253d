#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    clippy::pedantic,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::unnecessary_wraps
)]
#![doc = include_str!("../README.md")]

pub mod backoff;
pub mod bucket;
pub mod error;
pub mod headers;
pub mod manager;
pub mod manual;
pub mod route;
pub mod windowed;

pub use self::{
    backoff::Backoff,
    bucket::{BucketLease, RestBucket},
    error::{RatelimitError, RatelimitErrorType},
    headers::{RatelimitHeaders, RatelimitScope},
    manager::BucketManager,
    manual::ManualLimiter,
    route::{CompiledRoute, Method, RouteTemplate},
    windowed::{Acquire, WindowedLimiter},
};

/// Name prefix of a bucket whose hash the API has not yet revealed.
pub const UNKNOWN_HASH: &str = "UNKNOWN";
