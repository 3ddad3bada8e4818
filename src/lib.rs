#![forbid(unsafe_code)]

//! Library half of the tubestats backend.
//!
//! The server binary in `src/bin/backend.rs` wires these modules together:
//! [`config`] resolves runtime settings, [`extract`] turns user input into a
//! canonical video id, [`youtube`] talks to the YouTube Data API, and
//! [`proxy`] forwards requests to a second deployment of the same API.

pub mod config;
pub mod extract;
pub mod proxy;
pub mod youtube;
