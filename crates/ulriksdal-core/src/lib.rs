#![forbid(unsafe_code)]

//! Core types shared by the Ulriksdal crates: the error type, namespace
//! and element name constants, and algorithm URIs.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
