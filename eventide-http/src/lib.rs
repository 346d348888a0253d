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

pub mod api_error;
pub mod client;
pub mod error;
pub mod request;
pub mod routing;
pub mod strategy;
pub mod transport;

mod json;

/// Discord API version used by this crate.
pub const API_VERSION: u8 = 10;

pub use crate::{
    client::Client,
    error::{Error, ErrorType},
    request::Request,
};
