//! Built-in remediation strategies, in priority order.

pub mod config_syntax;
pub mod dependency_install;
pub mod directory_structure;
pub mod import_path;
pub mod proposal;

pub use config_syntax::ConfigSyntaxStrategy;
pub use dependency_install::DependencyInstallStrategy;
pub use directory_structure::DirectoryStructureStrategy;
pub use import_path::ImportPathStrategy;
pub use proposal::ProposalStrategy;

use crate::domain::ports::RemediationStrategy;

/// The default strategy list: dependency install, config syntax, import
/// path, directory structure, then negotiated proposals.
pub fn default_strategies() -> Vec<Box<dyn RemediationStrategy>> {
    vec![
        Box::new(DependencyInstallStrategy::new()),
        Box::new(ConfigSyntaxStrategy::new()),
        Box::new(ImportPathStrategy),
        Box::new(DirectoryStructureStrategy),
        Box::new(ProposalStrategy),
    ]
}
