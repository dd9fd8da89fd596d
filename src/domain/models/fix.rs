//! Fix records and agent fix proposals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::IssueCategory;

/// Kind of remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    InstallDependency,
    RepairConfigSyntax,
    NormalizeImportPath,
    CreateDirectory,
    AgentEdit,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstallDependency => "install_dependency",
            Self::RepairConfigSyntax => "repair_config_syntax",
            Self::NormalizeImportPath => "normalize_import_path",
            Self::CreateDirectory => "create_directory",
            Self::AgentEdit => "agent_edit",
        }
    }
}

/// One recorded remediation attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub kind: FixKind,
    /// Target files, relative to the project root
    pub targets: Vec<PathBuf>,
    pub description: String,
    pub success: bool,
    /// Strategy or agent that produced this fix
    pub origin: String,
    /// Issue category the fix addressed
    pub addresses: IssueCategory,
    pub recorded_at: DateTime<Utc>,
}

impl Fix {
    pub fn succeeded(
        kind: FixKind,
        origin: impl Into<String>,
        addresses: IssueCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            targets: Vec::new(),
            description: description.into(),
            success: true,
            origin: origin.into(),
            addresses,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        kind: FixKind,
        origin: impl Into<String>,
        addresses: IssueCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            ..Self::succeeded(kind, origin, addresses, description)
        }
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.targets.push(target.into());
        self
    }
}

/// A file edit proposed by an escalation agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProposedEdit {
    /// Write the full file content (creating the file if needed)
    Write { path: PathBuf, content: String },
    /// Replace every occurrence of `find` with `replace`
    Replace {
        path: PathBuf,
        find: String,
        replace: String,
    },
}

impl ProposedEdit {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Write { path, .. } | Self::Replace { path, .. } => path,
        }
    }
}

/// A candidate fix produced during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixProposal {
    pub addresses: IssueCategory,
    pub description: String,
    pub edits: Vec<ProposedEdit>,
    /// Agent that produced the proposal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl FixProposal {
    /// Stable identity used to refuse re-attempting the same proposal.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(&(self.addresses, &self.edits)).unwrap_or_else(|_| self.description.clone())
    }
}
