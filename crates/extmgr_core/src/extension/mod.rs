//! Extension manager.
//!
//! Discovers packaged extensions, loads each one into its own isolated load
//! context, drives the `load()`/`unload()` lifecycle, and tears everything
//! down with per-item failure isolation.

pub mod capability;
pub mod context;
pub mod entry_point;
pub mod error;
pub mod kernel;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod package;
