//! CLI command implementations.

pub mod dbs;
pub mod del;
pub mod get;
pub mod keys;
pub mod set;
pub mod shell;
pub mod status;
