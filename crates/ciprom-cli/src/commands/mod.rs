//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`collect`] - Collect metrics for configured runs and write CSV
//! - [`validate`] - Check a configuration file
//! - [`init`] - Write a sample configuration file

pub mod collect;
pub mod init;
pub mod validate;

pub use collect::CollectCommand;
pub use init::InitConfigCommand;
pub use validate::ValidateCommand;
