//! Configurations for the PnP core.
//! The module is divided as a library for better organization and independence.
//!
//! Values come from `flags.json` at the workspace root, keyed by target architecture
//! with a `default` fallback, and are baked in as constants by the build script.

#![no_std]
#![deny(missing_docs)]
#![deny(warnings)]

/// Constants generated from `flags.json`.
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;
