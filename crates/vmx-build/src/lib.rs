//! The build driver (§4.6): discovers a package graph, lays it out
//! deterministically, compiles each node through its language plugin,
//! links `main`-declaring packages, and runs package tests.

pub mod driver;
pub mod error;
pub mod graph;
pub mod home;
pub mod lang;

pub use driver::{build_pkgs, plan, BuildReport, Flags, Options, TestOutcome, LINK_BASE_ADDR};
pub use error::BuildError;
pub use home::{is_parent_pkg, select_pkgs, DirHome, Home, MemHome};
