//! CLI command implementations
//!
//! ## Image commands
//!
//! The `image` module works on record files and wire images only and never
//! opens a port.
//!
//! ## Device commands
//!
//! The `device` module drives a programmer through a `ProgrammerHandle`,
//! rendering upload progress from the handle's published snapshot.

pub mod device;
pub mod image;
