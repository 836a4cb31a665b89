//! Provisioning step execution.
//!
//! A linear interpreter walks the validated sequence, delegating side
//! effects to a [`StepRunner`] and keeping the bookkeeping (installed
//! package set, runtime identity, image config, layer chain) in
//! [`ProvisionState`]. The first failing step aborts the run with its
//! ordinal and action name.

use crate::config::Config;
use crate::error::{RcalError, Result};
use crate::provision::sequence::ProvisioningSequence;
use crate::provision::step::{ProvisioningStep, StepAction};
use crate::types::{ImageManifest, Layer, RuntimeIdentity};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Mutable state threaded through one provisioning run.
#[derive(Debug)]
pub struct ProvisionState {
    /// Directory the image filesystem is assembled in.
    pub build_root: PathBuf,

    /// Packages currently present in the image. The final set is recorded
    /// in the manifest, so build-time-only packages must be gone by then.
    pub installed_packages: BTreeSet<String>,

    /// Directories created inside the application tree this run.
    pub created_dirs: Vec<PathBuf>,

    /// Service identity, once created.
    pub identity: Option<RuntimeIdentity>,

    /// True until drop-privileges completes. Never set back to true.
    pub elevated: bool,

    /// Layer chain, one entry per completed step.
    pub layers: Vec<Layer>,

    name: String,
    image_version: String,
    workdir: String,
    env: BTreeMap<String, String>,
    exposed_port: Option<u16>,
    entrypoint: Vec<String>,
    cmd: Vec<String>,
}

impl ProvisionState {
    /// Create a fresh state for one build.
    pub fn new(build_root: PathBuf, config: &Config) -> Self {
        Self {
            build_root,
            installed_packages: BTreeSet::new(),
            created_dirs: Vec::new(),
            identity: None,
            elevated: true,
            layers: Vec::new(),
            name: config.base_name.clone(),
            image_version: config.version.clone(),
            workdir: config.app_dir.clone(),
            env: config.baked_env.clone(),
            exposed_port: None,
            entrypoint: Vec::new(),
            cmd: Vec::new(),
        }
    }

    /// Image ID derived from the ordered layer digest chain.
    pub fn image_id(&self) -> String {
        let mut hasher = Sha256::new();
        for layer in &self.layers {
            hasher.update(layer.digest.as_bytes());
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    /// Build the final manifest. Fails if the sequence never declared an
    /// entrypoint or never dropped privileges.
    pub fn manifest(&self) -> Result<ImageManifest> {
        if self.entrypoint.is_empty() {
            return Err(RcalError::InvalidManifest {
                reason: "no entrypoint declared".to_string(),
            });
        }
        if self.elevated {
            return Err(RcalError::InvalidManifest {
                reason: "privileges were never dropped".to_string(),
            });
        }
        Ok(ImageManifest {
            version: "1".to_string(),
            name: self.name.clone(),
            image_version: self.image_version.clone(),
            architecture: std::env::consts::ARCH.to_string(),
            os: "linux".to_string(),
            entrypoint: self.entrypoint.clone(),
            cmd: self.cmd.clone(),
            env: self.env.clone(),
            workdir: self.workdir.clone(),
            identity: self.identity.clone(),
            exposed_port: self.exposed_port,
            installed_packages: self.installed_packages.iter().cloned().collect(),
            history: self.layers.clone(),
        })
    }

    /// Record the bookkeeping effects of a completed step and append its
    /// layer.
    fn apply(&mut self, step: &ProvisioningStep) {
        match &step.action {
            StepAction::InstallPackages { packages } => {
                self.installed_packages.extend(packages.iter().cloned());
            }
            StepAction::RemovePackages { packages }
            | StepAction::CleanupBuildDeps { packages } => {
                for package in packages {
                    self.installed_packages.remove(package);
                }
            }
            StepAction::InstallLanguageDeps { .. } => {}
            StepAction::CreateDirectories { directories } => {
                self.created_dirs.extend(directories.iter().map(PathBuf::from));
            }
            StepAction::CreateServiceAccount { user, uid, gid, home_dir } => {
                self.identity = Some(RuntimeIdentity {
                    user: user.clone(),
                    uid: *uid,
                    gid: *gid,
                    home_dir: PathBuf::from(home_dir),
                    owned_paths: Vec::new(),
                });
            }
            StepAction::ChownTree { path, .. } => {
                // Ownership is computed here, after directory creation, so
                // the owned set includes everything made earlier this run.
                let mut owned = vec![PathBuf::from(path)];
                owned.extend(self.created_dirs.iter().cloned());
                if let Some(identity) = &mut self.identity {
                    owned.push(identity.home_dir.clone());
                    identity.owned_paths = owned;
                }
            }
            StepAction::DropPrivileges { .. } => {
                self.elevated = false;
            }
            StepAction::DeclarePort { port } => {
                self.exposed_port = Some(*port);
            }
            StepAction::DeclareEntrypoint { entrypoint, cmd } => {
                self.entrypoint = entrypoint.clone();
                self.cmd = cmd.clone();
            }
        }

        let parent = self.layers.last().map(|l| l.digest.clone()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(parent.as_bytes());
        hasher.update(format!("{:?}", step.action).as_bytes());
        self.layers.push(Layer {
            digest: format!("sha256:{:x}", hasher.finalize()),
            created_by: step.to_string(),
            empty_layer: !step.action.mutates_filesystem(),
        });
    }
}

/// Performs the side effects of one step.
///
/// Returns a plain reason string on failure; the interpreter attaches the
/// failing ordinal and action name.
pub trait StepRunner {
    fn run(
        &mut self,
        step: &ProvisioningStep,
        state: &ProvisionState,
    ) -> std::result::Result<(), String>;
}

/// Execute the sequence in ordinal order, aborting on the first failure.
///
/// The sequence should already have passed [`ProvisioningSequence::validate`];
/// the runtime guards here are a second line of defense for handcrafted
/// sequences.
pub fn execute_sequence(
    sequence: &ProvisioningSequence,
    runner: &mut dyn StepRunner,
    state: &mut ProvisionState,
) -> Result<()> {
    for step in sequence.steps() {
        if !state.elevated && step.action.mutates_filesystem() {
            return Err(step_failed(step, "filesystem mutation after drop-privileges"));
        }
        if matches!(step.action, StepAction::DeclareEntrypoint { .. }) && state.elevated {
            return Err(step_failed(step, "entrypoint declared before drop-privileges"));
        }

        debug!("Executing {}", step);
        runner.run(step, state).map_err(|reason| step_failed(step, &reason))?;
        state.apply(step);
        info!("Completed {}", step);
    }
    Ok(())
}

fn step_failed(step: &ProvisioningStep, reason: &str) -> RcalError {
    RcalError::ProvisioningFailed {
        ordinal: step.ordinal,
        action: step.action.name().to_string(),
        reason: reason.to_string(),
    }
}

/// The real runner: operates on the build root directory, shelling out to
/// the configured package tool and dependency installer.
pub struct SystemRunner {
    package_tool: String,
    pip_command: String,
}

impl SystemRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            package_tool: config.package_tool.clone(),
            pip_command: config.pip_command.clone(),
        }
    }

    fn package_command(
        &self,
        root: &Path,
        args: &[&str],
        packages: &[String],
    ) -> std::result::Result<(), String> {
        let mut full_args = vec!["--root".to_string(), root.to_string_lossy().to_string()];
        full_args.extend(args.iter().map(|a| a.to_string()));
        full_args.extend(packages.iter().cloned());
        run_tool(&self.package_tool, &full_args)
    }

    fn package_installed(&self, root: &Path, package: &str) -> bool {
        Command::new(&self.package_tool)
            .arg("--root")
            .arg(root)
            .arg("info")
            .arg("-e")
            .arg(package)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

impl StepRunner for SystemRunner {
    fn run(
        &mut self,
        step: &ProvisioningStep,
        state: &ProvisionState,
    ) -> std::result::Result<(), String> {
        let root = &state.build_root;

        match &step.action {
            StepAction::InstallPackages { packages } => {
                if packages.is_empty() {
                    return Ok(());
                }
                self.package_command(root, &["add", "--no-cache"], packages)
            }

            StepAction::RemovePackages { packages } => {
                if packages.is_empty() {
                    return Ok(());
                }
                self.package_command(root, &["del", "--purge"], packages)
            }

            StepAction::InstallLanguageDeps { requirements } => {
                if !Path::new(requirements).exists() {
                    return Err(format!("requirements file not found: {}", requirements));
                }
                let root_arg = root.to_string_lossy().to_string();
                run_tool(
                    &self.pip_command,
                    &[
                        "install".to_string(),
                        "--root".to_string(),
                        root_arg,
                        "--requirement".to_string(),
                        requirements.clone(),
                    ],
                )
            }

            StepAction::CleanupBuildDeps { packages } => {
                if packages.is_empty() {
                    return Ok(());
                }
                self.package_command(root, &["del", "--purge"], packages)?;
                // Removal must be actual, not merely marked: verify each
                // package is gone from the package manifest.
                for package in packages {
                    if self.package_installed(root, package) {
                        return Err(format!(
                            "build-time package still present after cleanup: {}",
                            package
                        ));
                    }
                }
                Ok(())
            }

            StepAction::CreateDirectories { directories } => {
                for dir in directories {
                    let target = rooted(root, dir);
                    std::fs::create_dir_all(&target)
                        .map_err(|e| format!("failed to create {}: {}", target.display(), e))?;
                }
                Ok(())
            }

            StepAction::CreateServiceAccount { user, uid, gid, home_dir } => {
                create_account(root, user, *uid, *gid, home_dir)
            }

            StepAction::ChownTree { path, uid, gid, .. } => {
                let tree = rooted(root, path);
                chown_recursive(&tree, *uid, *gid)?;
                // The home directory transfers with the tree so the
                // account owns everything it will ever write to.
                if let Some(identity) = &state.identity {
                    let home = rooted(root, &identity.home_dir.to_string_lossy());
                    if home.exists() {
                        chown_recursive(&home, *uid, *gid)?;
                    }
                }
                Ok(())
            }

            // Metadata-only steps: recorded by the state, no side effects.
            StepAction::DropPrivileges { .. }
            | StepAction::DeclarePort { .. }
            | StepAction::DeclareEntrypoint { .. } => Ok(()),
        }
    }
}

/// Map an absolute in-image path under the build root.
fn rooted(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Write deterministic passwd/group entries and create the home directory.
fn create_account(
    root: &Path,
    user: &str,
    uid: u32,
    gid: u32,
    home_dir: &str,
) -> std::result::Result<(), String> {
    use std::io::Write;

    let etc = root.join("etc");
    std::fs::create_dir_all(&etc).map_err(|e| format!("failed to create {}: {}", etc.display(), e))?;

    let passwd_line = format!("{}:x:{}:{}::{}:/sbin/nologin\n", user, uid, gid, home_dir);
    let group_line = format!("{}:x:{}:\n", user, gid);

    for (file, line) in [("passwd", passwd_line), ("group", group_line)] {
        let path = etc.join(file);
        let mut handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
        handle
            .write_all(line.as_bytes())
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    }

    let home = rooted(root, home_dir);
    std::fs::create_dir_all(&home)
        .map_err(|e| format!("failed to create {}: {}", home.display(), e))?;

    Ok(())
}

/// Recursively change ownership of a tree.
#[cfg(unix)]
fn chown_recursive(path: &Path, uid: u32, gid: u32) -> std::result::Result<(), String> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .map_err(|e| format!("chown {} failed: {}", path.display(), e))?;

    if path.is_dir() {
        let entries = std::fs::read_dir(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {}", e))?;
            chown_recursive(&entry.path(), uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn chown_recursive(_path: &Path, _uid: u32, _gid: u32) -> std::result::Result<(), String> {
    Err("ownership transfer is only supported on unix hosts".to_string())
}

/// Run an external tool, capturing stderr for the failure reason.
fn run_tool(program: &str, args: &[String]) -> std::result::Result<(), String> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        format!(
            "failed to run {}: {}. Check that it is installed and on PATH",
            program, e
        )
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} failed: {}", program, stderr.trim()));
    }
    Ok(())
}

/// Test runner that records the action trace and can inject a failure at
/// a named action.
#[cfg(test)]
pub(crate) struct RecordingRunner {
    pub executed: Vec<String>,
    pub fail_on: Option<&'static str>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new() -> Self {
        Self { executed: Vec::new(), fail_on: None }
    }

    pub fn failing_at(action: &'static str) -> Self {
        Self { executed: Vec::new(), fail_on: Some(action) }
    }
}

#[cfg(test)]
impl StepRunner for RecordingRunner {
    fn run(
        &mut self,
        step: &ProvisioningStep,
        _state: &ProvisionState,
    ) -> std::result::Result<(), String> {
        if self.fail_on == Some(step.action.name()) {
            return Err("injected failure".to_string());
        }
        self.executed.push(step.action.name().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn run_canonical(runner: &mut dyn StepRunner) -> (ProvisionState, Result<()>) {
        let config = Config::default();
        let sequence = ProvisioningSequence::from_config(&config);
        sequence.validate().unwrap();
        let mut state = ProvisionState::new(PathBuf::from("/tmp/unused"), &config);
        let result = execute_sequence(&sequence, runner, &mut state);
        (state, result)
    }

    #[test]
    fn test_full_run_produces_manifest() {
        let mut runner = RecordingRunner::new();
        let (state, result) = run_canonical(&mut runner);
        result.unwrap();
        assert_eq!(runner.executed.len(), 10);
        assert!(!state.elevated);

        let manifest = state.manifest().unwrap();
        assert_eq!(manifest.exposed_port, Some(8000));
        assert_eq!(manifest.entrypoint, vec!["python3", "manage.py"]);
        assert_eq!(manifest.name, "msa_rcalendar");
    }

    #[test]
    fn test_build_packages_absent_from_final_manifest() {
        let config = Config::default();
        let mut runner = RecordingRunner::new();
        let (state, result) = run_canonical(&mut runner);
        result.unwrap();

        let manifest = state.manifest().unwrap();
        for package in &config.build_packages {
            assert!(
                !manifest.installed_packages.contains(package),
                "build-time package {} leaked into the final artifact",
                package
            );
        }
        for package in &config.runtime_packages {
            assert!(manifest.installed_packages.contains(package));
        }
    }

    #[test]
    fn test_failing_language_deps_aborts_before_account_creation() {
        let mut runner = RecordingRunner::failing_at("install-language-deps");
        let (state, result) = run_canonical(&mut runner);

        let err = result.unwrap_err();
        match err {
            RcalError::ProvisioningFailed { ordinal, action, .. } => {
                assert_eq!(ordinal, 3);
                assert_eq!(action, "install-language-deps");
            }
            other => panic!("expected ProvisioningFailed, got {:?}", other),
        }

        assert!(!runner.executed.contains(&"create-service-account".to_string()));
        assert!(state.identity.is_none());
    }

    #[test]
    fn test_chown_covers_directories_created_this_run() {
        let mut runner = RecordingRunner::new();
        let (state, result) = run_canonical(&mut runner);
        result.unwrap();

        let identity = state.identity.unwrap();
        let owned: Vec<String> =
            identity.owned_paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
        assert!(owned.iter().any(|p| p.ends_with("/static")));
        assert!(owned.iter().any(|p| p.ends_with("/media")));
        assert!(owned.iter().any(|p| p.ends_with("/log")));
        assert!(owned.iter().any(|p| p.ends_with("/run")));
    }

    #[test]
    fn test_entrypoint_guard_without_privilege_drop() {
        // Handcrafted sequence that skips validation: the interpreter's
        // runtime guard must still refuse the entrypoint declaration.
        let config = Config::default();
        let sequence = ProvisioningSequence::new(vec![ProvisioningStep {
            ordinal: 1,
            action: StepAction::DeclareEntrypoint {
                entrypoint: vec!["python3".into()],
                cmd: vec![],
            },
        }]);
        let mut state = ProvisionState::new(PathBuf::from("/tmp/unused"), &config);
        let mut runner = RecordingRunner::new();
        let err = execute_sequence(&sequence, &mut runner, &mut state).unwrap_err();
        assert!(matches!(err, RcalError::ProvisioningFailed { ordinal: 1, .. }));
        assert!(runner.executed.is_empty());
    }

    #[test]
    fn test_layer_digests_chain() {
        let mut runner = RecordingRunner::new();
        let (state, result) = run_canonical(&mut runner);
        result.unwrap();

        assert_eq!(state.layers.len(), 10);
        let mut digests: Vec<&String> = state.layers.iter().map(|l| &l.digest).collect();
        digests.sort();
        digests.dedup();
        assert_eq!(digests.len(), 10, "layer digests must be unique");

        // Metadata steps are empty layers.
        assert!(state.layers[8].empty_layer); // declare-port
        assert!(state.layers[9].empty_layer); // declare-entrypoint
        assert!(!state.layers[0].empty_layer); // install-packages
    }

    #[test]
    fn test_image_id_deterministic_for_same_sequence() {
        let mut runner_a = RecordingRunner::new();
        let (state_a, _) = run_canonical(&mut runner_a);
        let mut runner_b = RecordingRunner::new();
        let (state_b, _) = run_canonical(&mut runner_b);
        assert_eq!(state_a.image_id(), state_b.image_id());
    }

    #[test]
    fn test_system_runner_creates_directories_and_account() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let config = Config::default();
        let mut runner = SystemRunner::new(&config);
        let state = ProvisionState::new(root.clone(), &config);

        let dirs_step = ProvisioningStep {
            ordinal: 5,
            action: StepAction::CreateDirectories {
                directories: vec![
                    "/srv/msa_rcalendar/static".to_string(),
                    "/srv/msa_rcalendar/media".to_string(),
                ],
            },
        };
        runner.run(&dirs_step, &state).unwrap();
        assert!(root.join("srv/msa_rcalendar/static").is_dir());
        assert!(root.join("srv/msa_rcalendar/media").is_dir());

        let account_step = ProvisioningStep {
            ordinal: 6,
            action: StepAction::CreateServiceAccount {
                user: "rcalendar".to_string(),
                uid: 1000,
                gid: 1000,
                home_dir: "/home/rcalendar".to_string(),
            },
        };
        runner.run(&account_step, &state).unwrap();

        let passwd = std::fs::read_to_string(root.join("etc/passwd")).unwrap();
        assert!(passwd.contains("rcalendar:x:1000:1000::/home/rcalendar:/sbin/nologin"));
        let group = std::fs::read_to_string(root.join("etc/group")).unwrap();
        assert!(group.contains("rcalendar:x:1000:"));
        assert!(root.join("home/rcalendar").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_chown_recursive_walks_the_tree() {
        use std::os::unix::fs::MetadataExt;

        let tmp = tempfile::tempdir().unwrap();
        let tree = tmp.path().join("app");
        std::fs::create_dir_all(tree.join("static")).unwrap();
        std::fs::write(tree.join("static/site.css"), "body {}").unwrap();

        // Re-owning to the current owner is a no-op the walk must still
        // perform without error.
        let meta = std::fs::metadata(&tree).unwrap();
        chown_recursive(&tree, meta.uid(), meta.gid()).unwrap();
    }
}
