//! The ordered provisioning sequence and its static validation.

use crate::config::Config;
use crate::error::{RcalError, Result};
use crate::provision::step::{ProvisioningStep, StepAction};

/// An ordered list of provisioning steps.
///
/// The canonical sequence is linear with no branches:
/// install-packages → remove-packages → install-language-deps →
/// cleanup-build-deps → create-directories → create-service-account →
/// chown-tree → drop-privileges → declare-port → declare-entrypoint.
#[derive(Debug, Clone)]
pub struct ProvisioningSequence {
    steps: Vec<ProvisioningStep>,
}

impl ProvisioningSequence {
    /// Create a sequence from an explicit step list.
    pub fn new(steps: Vec<ProvisioningStep>) -> Self {
        Self { steps }
    }

    /// Build the canonical sequence for a release configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut packages = config.runtime_packages.clone();
        packages.extend(config.build_packages.iter().cloned());

        let steps = vec![
            ProvisioningStep {
                ordinal: 1,
                action: StepAction::InstallPackages { packages },
            },
            ProvisioningStep {
                ordinal: 2,
                action: StepAction::RemovePackages {
                    packages: config.unwanted_packages.clone(),
                },
            },
            ProvisioningStep {
                ordinal: 3,
                action: StepAction::InstallLanguageDeps {
                    requirements: config.requirements_file.clone(),
                },
            },
            ProvisioningStep {
                ordinal: 4,
                action: StepAction::CleanupBuildDeps {
                    packages: config.build_packages.clone(),
                },
            },
            ProvisioningStep {
                ordinal: 5,
                action: StepAction::CreateDirectories {
                    directories: config
                        .runtime_dirs
                        .iter()
                        .map(|d| format!("{}/{}", config.app_dir, d))
                        .collect(),
                },
            },
            ProvisioningStep {
                ordinal: 6,
                action: StepAction::CreateServiceAccount {
                    user: config.service_user.clone(),
                    uid: config.service_uid,
                    gid: config.service_gid,
                    home_dir: config.home_dir.clone(),
                },
            },
            ProvisioningStep {
                ordinal: 7,
                action: StepAction::ChownTree {
                    path: config.app_dir.clone(),
                    user: config.service_user.clone(),
                    uid: config.service_uid,
                    gid: config.service_gid,
                },
            },
            ProvisioningStep {
                ordinal: 8,
                action: StepAction::DropPrivileges { user: config.service_user.clone() },
            },
            ProvisioningStep {
                ordinal: 9,
                action: StepAction::DeclarePort { port: config.service_port },
            },
            ProvisioningStep {
                ordinal: 10,
                action: StepAction::DeclareEntrypoint {
                    entrypoint: config.entrypoint.clone(),
                    cmd: config.cmd.clone(),
                },
            },
        ];

        Self { steps }
    }

    /// The steps in execution order.
    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Statically validate the ordering invariants before executing
    /// anything.
    ///
    /// Rejected sequences:
    /// - ordinals not strictly increasing
    /// - cleanup-build-deps at or before install-language-deps
    /// - any filesystem-mutating step after drop-privileges
    /// - declare-entrypoint missing, not last, or without a preceding
    ///   drop-privileges
    /// - more than one chown-tree, drop-privileges, or
    ///   create-service-account
    /// - chown-tree before create-service-account or before any
    ///   create-directories
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(invalid("sequence is empty"));
        }

        let mut last_ordinal: Option<u32> = None;
        for step in &self.steps {
            if let Some(prev) = last_ordinal {
                if step.ordinal <= prev {
                    return Err(invalid(&format!(
                        "ordinals must be strictly increasing: {} follows {}",
                        step.ordinal, prev
                    )));
                }
            }
            last_ordinal = Some(step.ordinal);
        }

        let ordinal_of = |pred: fn(&StepAction) -> bool| -> Vec<u32> {
            self.steps.iter().filter(|s| pred(&s.action)).map(|s| s.ordinal).collect()
        };

        let language_deps = ordinal_of(|a| matches!(a, StepAction::InstallLanguageDeps { .. }));
        let cleanups = ordinal_of(|a| matches!(a, StepAction::CleanupBuildDeps { .. }));
        for cleanup in &cleanups {
            match language_deps.iter().max() {
                Some(deps) if cleanup > deps => {}
                _ => {
                    return Err(invalid(
                        "cleanup-build-deps must run after install-language-deps",
                    ))
                }
            }
        }

        let drops = ordinal_of(|a| matches!(a, StepAction::DropPrivileges { .. }));
        if drops.len() > 1 {
            return Err(invalid("drop-privileges must appear exactly once"));
        }
        if let Some(&drop_ordinal) = drops.first() {
            for step in &self.steps {
                if step.action.mutates_filesystem() && step.ordinal > drop_ordinal {
                    return Err(invalid(&format!(
                        "{} mutates the filesystem after drop-privileges (ordinal {})",
                        step, drop_ordinal
                    )));
                }
            }
        }

        let chowns = ordinal_of(|a| matches!(a, StepAction::ChownTree { .. }));
        if chowns.len() > 1 {
            return Err(invalid("chown-tree must be applied exactly once"));
        }
        let accounts = ordinal_of(|a| matches!(a, StepAction::CreateServiceAccount { .. }));
        if accounts.len() > 1 {
            return Err(invalid("create-service-account must appear exactly once"));
        }
        if let (Some(&chown), Some(&account)) = (chowns.first(), accounts.first()) {
            if chown < account {
                return Err(invalid("chown-tree must follow create-service-account"));
            }
        }
        // Ownership transfer must cover every directory created this run,
        // so no create-directories may come after the chown.
        if let Some(&chown) = chowns.first() {
            let dir_creates = ordinal_of(|a| matches!(a, StepAction::CreateDirectories { .. }));
            if dir_creates.iter().any(|&d| d > chown) {
                return Err(invalid("chown-tree must follow create-directories"));
            }
        }

        // Entrypoint declaration terminates the sequence and requires a
        // completed privilege drop: the artifact never runs its default
        // command as the build-time identity.
        match self.steps.iter().position(|s| {
            matches!(s.action, StepAction::DeclareEntrypoint { .. })
        }) {
            None => return Err(invalid("sequence must end with declare-entrypoint")),
            Some(pos) => {
                if pos != self.steps.len() - 1 {
                    return Err(invalid("declare-entrypoint must be the last step"));
                }
                let entry_ordinal = self.steps[pos].ordinal;
                match drops.first() {
                    Some(&drop_ordinal) if drop_ordinal < entry_ordinal => {}
                    _ => {
                        return Err(invalid(
                            "declare-entrypoint requires a preceding drop-privileges",
                        ))
                    }
                }
            }
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> RcalError {
    RcalError::InvalidSequence { reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn canonical() -> ProvisioningSequence {
        ProvisioningSequence::from_config(&Config::default())
    }

    fn swap_steps(seq: &ProvisioningSequence, a: usize, b: usize) -> ProvisioningSequence {
        let mut steps = seq.steps().to_vec();
        let (ord_a, ord_b) = (steps[a].ordinal, steps[b].ordinal);
        steps.swap(a, b);
        // Keep ordinals increasing so only the action order changes.
        steps[a].ordinal = ord_a;
        steps[b].ordinal = ord_b;
        ProvisioningSequence::new(steps)
    }

    #[test]
    fn test_canonical_sequence_is_valid() {
        let seq = canonical();
        assert_eq!(seq.len(), 10);
        seq.validate().unwrap();
    }

    #[test]
    fn test_canonical_step_order() {
        let names: Vec<&str> = canonical().steps().iter().map(|s| s.action.name()).collect();
        assert_eq!(
            names,
            vec![
                "install-packages",
                "remove-packages",
                "install-language-deps",
                "cleanup-build-deps",
                "create-directories",
                "create-service-account",
                "chown-tree",
                "drop-privileges",
                "declare-port",
                "declare-entrypoint",
            ]
        );
    }

    #[test]
    fn test_rejects_non_increasing_ordinals() {
        let mut steps = canonical().steps().to_vec();
        steps[3].ordinal = steps[2].ordinal;
        assert!(ProvisioningSequence::new(steps).validate().is_err());
    }

    #[test]
    fn test_rejects_cleanup_before_language_deps() {
        // Swap install-language-deps (idx 2) and cleanup-build-deps (idx 3).
        let seq = swap_steps(&canonical(), 2, 3);
        assert!(seq.validate().is_err());
    }

    #[test]
    fn test_rejects_mutating_step_after_privilege_drop() {
        // Move create-directories (idx 4) after drop-privileges (idx 7).
        let mut steps = canonical().steps().to_vec();
        let mut dirs = steps.remove(4);
        dirs.ordinal = 11;
        steps.push(dirs);
        // Re-number so ordinals stay increasing and entrypoint stays last.
        let entry = steps.remove(steps.len() - 2);
        let mut entry = entry;
        entry.ordinal = 12;
        steps.push(entry);
        let seq = ProvisioningSequence::new(steps);
        assert!(seq.validate().is_err());
    }

    #[test]
    fn test_rejects_entrypoint_without_privilege_drop() {
        let steps: Vec<_> = canonical()
            .steps()
            .iter()
            .filter(|s| !matches!(s.action, StepAction::DropPrivileges { .. }))
            .cloned()
            .collect();
        assert!(ProvisioningSequence::new(steps).validate().is_err());
    }

    #[test]
    fn test_rejects_entrypoint_not_last() {
        // Swap declare-port (idx 8) and declare-entrypoint (idx 9).
        let seq = swap_steps(&canonical(), 8, 9);
        assert!(seq.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_chown() {
        let mut steps = canonical().steps().to_vec();
        let chown = steps[6].clone();
        let mut duplicate = chown;
        duplicate.ordinal = 7;
        // Renumber the tail to keep ordinals increasing.
        for (i, step) in steps.iter_mut().enumerate().skip(6) {
            step.ordinal = 8 + i as u32;
        }
        steps.insert(6, duplicate);
        assert!(ProvisioningSequence::new(steps).validate().is_err());
    }

    #[test]
    fn test_rejects_directories_created_after_chown() {
        // Move create-directories (idx 4) between chown-tree and
        // drop-privileges: the transferred tree would miss it.
        let mut steps = canonical().steps().to_vec();
        let mut dirs = steps.remove(4);
        dirs.ordinal = 8;
        for step in steps.iter_mut().skip(6) {
            step.ordinal += 1;
        }
        steps.insert(6, dirs);
        let seq = ProvisioningSequence::new(steps);
        let err = seq.validate().unwrap_err();
        assert!(err.to_string().contains("chown-tree must follow create-directories"));
    }

    #[test]
    fn test_rejects_chown_before_account_creation() {
        // Swap create-service-account (idx 5) and chown-tree (idx 6).
        let seq = swap_steps(&canonical(), 5, 6);
        assert!(seq.validate().is_err());
    }

    #[test]
    fn test_canonical_directories_include_static_and_media() {
        let seq = canonical();
        let dirs = seq
            .steps()
            .iter()
            .find_map(|s| match &s.action {
                StepAction::CreateDirectories { directories } => Some(directories.clone()),
                _ => None,
            })
            .unwrap();
        assert!(dirs.iter().any(|d| d.ends_with("/static")));
        assert!(dirs.iter().any(|d| d.ends_with("/media")));
    }
}
