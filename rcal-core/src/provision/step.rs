//! Provisioning step descriptors.
//!
//! Each step is one instruction of the image definition. What used to be
//! implicit script ordering is a data structure here, so the ordering
//! invariants can be validated and unit-tested step by step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single provisioning step: a position in the sequence plus the action
/// to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStep {
    /// Position in the sequence; strictly increasing.
    pub ordinal: u32,
    /// The action to perform.
    pub action: StepAction,
}

/// The action performed by a provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StepAction {
    /// Install OS packages (run-time and build-time sets together).
    InstallPackages { packages: Vec<String> },

    /// Remove unwanted packages pre-existing in the base image.
    RemovePackages { packages: Vec<String> },

    /// Install language-level dependencies from a requirements file.
    InstallLanguageDeps { requirements: String },

    /// Fully remove the build-time-only packages installed earlier.
    /// Must run after `InstallLanguageDeps`: the build tools are needed
    /// to compile dependencies before they can go.
    CleanupBuildDeps { packages: Vec<String> },

    /// Create writable runtime directories inside the application tree.
    CreateDirectories { directories: Vec<String> },

    /// Create the non-root service account with a fixed numeric identity.
    CreateServiceAccount { user: String, uid: u32, gid: u32, home_dir: String },

    /// Recursively transfer ownership of the application tree. Applied
    /// exactly once, after all files are in place.
    ChownTree { path: String, user: String, uid: u32, gid: u32 },

    /// Irreversibly drop to the service account. No later step may
    /// require elevated rights.
    DropPrivileges { user: String },

    /// Declare the network port (metadata only, no filesystem effect).
    DeclarePort { port: u16 },

    /// Declare the entrypoint and default command (metadata only).
    DeclareEntrypoint { entrypoint: Vec<String>, cmd: Vec<String> },
}

impl StepAction {
    /// Stable action name, used in error reporting and logs.
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::InstallPackages { .. } => "install-packages",
            StepAction::RemovePackages { .. } => "remove-packages",
            StepAction::InstallLanguageDeps { .. } => "install-language-deps",
            StepAction::CleanupBuildDeps { .. } => "cleanup-build-deps",
            StepAction::CreateDirectories { .. } => "create-directories",
            StepAction::CreateServiceAccount { .. } => "create-service-account",
            StepAction::ChownTree { .. } => "chown-tree",
            StepAction::DropPrivileges { .. } => "drop-privileges",
            StepAction::DeclarePort { .. } => "declare-port",
            StepAction::DeclareEntrypoint { .. } => "declare-entrypoint",
        }
    }

    /// True if the step changes the image filesystem. Metadata-only steps
    /// configure how the artifact is started, not how it is built.
    pub fn mutates_filesystem(&self) -> bool {
        !matches!(
            self,
            StepAction::DeclarePort { .. }
                | StepAction::DeclareEntrypoint { .. }
                | StepAction::DropPrivileges { .. }
        )
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "step {} ({})", self.ordinal, self.action.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_steps_do_not_mutate() {
        assert!(!StepAction::DeclarePort { port: 8000 }.mutates_filesystem());
        assert!(!StepAction::DeclareEntrypoint { entrypoint: vec![], cmd: vec![] }
            .mutates_filesystem());
        assert!(!StepAction::DropPrivileges { user: "svc".into() }.mutates_filesystem());
    }

    #[test]
    fn test_filesystem_steps_mutate() {
        assert!(StepAction::InstallPackages { packages: vec![] }.mutates_filesystem());
        assert!(StepAction::ChownTree {
            path: "/srv/app".into(),
            user: "svc".into(),
            uid: 1000,
            gid: 1000
        }
        .mutates_filesystem());
    }

    #[test]
    fn test_step_display() {
        let step = ProvisioningStep {
            ordinal: 6,
            action: StepAction::CreateServiceAccount {
                user: "rcalendar".into(),
                uid: 1000,
                gid: 1000,
                home_dir: "/home/rcalendar".into(),
            },
        };
        assert_eq!(step.to_string(), "step 6 (create-service-account)");
    }
}
