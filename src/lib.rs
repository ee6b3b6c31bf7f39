#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unused_crate_dependencies,
    unreachable_pub,
    missing_docs
)]

mod errors;
pub use errors::Error;

mod value;
pub use value::{Map, Value};

mod message;
pub use message::{read_frame, write_frame, Message, SerialiseMode, FRAME_VERSION};

pub mod auth;

mod client;
pub use client::{
    ClientBuilder, Response, ResponseValue, RndcClient, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
    DEFAULT_TIMEOUT,
};

mod config;
pub use config::{parse_max_retries, parse_port, parse_retry_delay, parse_timeout, Config};

// Unused crate lint workaround for binary-target dependencies.
use clap as _;
use env_logger as _;

// Unused crate lint workaround for dev dependency.
#[cfg(test)]
use criterion as _;
