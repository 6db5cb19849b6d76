//! Swimlane Daemon (swimlaned)
//!
//! Runs a single swimlane membership node and logs every membership change.
//!
//! ## Quick Start
//!
//! ```bash
//! # First node founds the cluster
//! swimlaned --port 11000
//!
//! # Joining nodes
//! swimlaned --port 11001 --seeds 10.0.0.1:11000
//! ```

pub mod cli;

pub use cli::Cli;
