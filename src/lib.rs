//! k3s-bootstrap - forms k3s clusters on already-provisioned machines
//!
//! Given a cluster description (machines with assigned roles), the bootstrapper
//! installs prerequisites on every machine, forms the cluster on the primary
//! master, harvests its join token and enrolls every remaining machine.
//!
//! # Modules
//!
//! - [`bootstrap`] - Deploy orchestration and the [`bootstrap::Bootstrapper`] trait
//! - [`cluster`] - Cluster description and install options
//! - [`config`] - Runtime settings and the YAML cluster manifest
//! - [`node`] - Node model and the [`node::NodeManager`] seam
//! - [`remote`] - Remote command execution (SSH)
//! - [`retry`] - Capped exponential backoff
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod error;
pub mod node;
pub mod remote;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
