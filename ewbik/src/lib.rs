//! Constraint-aware iterative inverse kinematics for bone trees.
//!
//! A [`Skeleton`] owns a graph of transform nodes, the bones hanging from it and the pins pulling
//! on them. Solving splits the bone tree into segments bounded by pins and branch points, then
//! rotates each bone toward the weighted least-squares best fit of the pins beneath it, keeping
//! every joint inside its [`Kusudama`] limits.

#![forbid(unsafe_code)]

mod arena;
mod config;
mod error;
mod kusudama;
mod node;
mod qcp;
mod runtime;
mod transform;

#[cfg(feature = "json")]
pub mod json;

pub use config::*;
pub use error::*;
pub use kusudama::*;
pub use node::*;
pub use qcp::*;
pub use runtime::*;
pub use transform::*;

#[cfg(test)]
mod node_tests;

#[cfg(test)]
mod qcp_tests;
