//! Test runner adapters.

pub mod shell;

pub use shell::ShellTestRunner;
