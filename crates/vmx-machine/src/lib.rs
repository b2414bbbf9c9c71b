//! The multi-core machine simulator: paged physical memory (from
//! `vmx-memory`), a small register ISA, the VPC service bus, the
//! standard device set, and the machine that ticks them all together.

pub mod core;
pub mod devices;
pub mod machine;
pub mod vpc;

pub use crate::core::{CoreException, ExceptionKind, Instr};
pub use crate::devices::{Clock, Console, Device, Rand, Rom, Screen, ScreenRender, Table, Ticker};
pub use crate::machine::{Config, Machine};
pub use crate::vpc::{Bus, Service, VpcError};
