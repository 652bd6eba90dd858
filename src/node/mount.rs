//! Mount Orchestrator
//!
//! Composes assignment, device resolution and filesystem handling into the
//! attach, mount, unmount and detach flows. Every call is idempotent: a
//! resource already in the requested state is left alone.
//!
//! Nothing is rolled back on failure; a partially completed mount is picked
//! up again by the next call.

use crate::config::{AgentConfig, MountConfig, RetryConfig};
use crate::controlplane::convergence::AssignmentConvergence;
use crate::domain::ports::{command_line, CommandRunnerRef, ControlPlaneRef};
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result, Step};
use crate::node::filesystem::{FilesystemGuard, FormatOptions};
use crate::node::resolver::DevicePathResolver;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything needed to mount a resource
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub spec: ResourceSpec,
    pub node: String,
    pub target: PathBuf,
    /// Filesystem to create on a blank device; an empty type means the default
    pub format: FormatOptions,
    /// Empty for the configured defaults
    pub mount_options: String,
    pub read_only: bool,
    pub diskless: bool,
}

impl MountRequest {
    pub fn new(spec: ResourceSpec, node: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            node: node.into(),
            target: target.into(),
            format: FormatOptions::default(),
            mount_options: String::new(),
            read_only: false,
            diskless: false,
        }
    }
}

/// Attaches, formats and mounts resources on this node
pub struct MountOrchestrator {
    convergence: AssignmentConvergence,
    resolver: DevicePathResolver,
    filesystem: FilesystemGuard,
    runner: CommandRunnerRef,
    mount: MountConfig,
    retry: RetryConfig,
    default_fs_type: String,
    local_node: String,
}

impl MountOrchestrator {
    pub fn new(
        config: &AgentConfig,
        control_plane: ControlPlaneRef,
        runner: CommandRunnerRef,
        local_node: impl Into<String>,
    ) -> Self {
        Self {
            convergence: AssignmentConvergence::new(control_plane.clone(), config.retry.clone()),
            resolver: DevicePathResolver::new(
                control_plane,
                config.device.path_prefix.clone(),
                config.retry.clone(),
            ),
            filesystem: FilesystemGuard::new(runner.clone(), config.filesystem.clone()),
            runner,
            mount: config.mount.clone(),
            retry: config.retry.clone(),
            default_fs_type: config.filesystem.default_fs_type.clone(),
            local_node: local_node.into(),
        }
    }

    pub fn convergence(&self) -> &AssignmentConvergence {
        &self.convergence
    }

    pub fn resolver(&self) -> &DevicePathResolver {
        &self.resolver
    }

    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Assign `spec` to `node` and wait for its device path
    pub async fn attach(&self, spec: &ResourceSpec, node: &str, diskless: bool) -> Result<String> {
        self.convergence
            .assign(spec, node, diskless)
            .await
            .map_err(|e| e.at(Step::Assign))?;

        // Promotion runs drbdadm on this host, so it only applies locally
        if node == self.local_node {
            self.convergence
                .control_plane()
                .promote(&spec.name)
                .await
                .map_err(|e| e.at(Step::Promote))?;
        }

        self.resolver
            .wait_for_device_path(&spec.name, self.retry.device_path_attempts)
            .await
            .map_err(|e| e.at(Step::ResolveDevice))
    }

    /// Attach the resource, make sure it has a filesystem and mount it
    pub async fn mount(&self, req: &MountRequest) -> Result<()> {
        let device = self.attach(&req.spec, &req.node, req.diskless).await?;

        let mut format = req.format.clone();
        if format.fs_type.is_empty() {
            format.fs_type = self.default_fs_type.clone();
        }
        self.filesystem
            .ensure_filesystem(&device, &format)
            .await
            .map_err(|e| e.at(Step::EnsureFilesystem))?;

        tokio::fs::create_dir_all(&req.target)
            .await
            .map_err(|e| Error::from(e).at(Step::CreateTarget))?;

        let target = req.target.to_string_lossy().into_owned();
        match self.mounted_source(&req.target).await? {
            Some(source) if source == device => {
                debug!("{} already mounted at {}", device, target);
                return Ok(());
            }
            Some(source) => {
                return Err(Error::MountpointBusy {
                    target,
                    existing: source,
                }
                .at(Step::Mount));
            }
            None => {}
        }

        let mut options = if req.mount_options.is_empty() {
            self.mount.default_options.clone()
        } else {
            req.mount_options.clone()
        };
        if req.read_only {
            options.push_str(",ro");
        }

        let args = vec!["-o".to_string(), options, device.clone(), target.clone()];
        self.host_command(&self.mount.mount_binary, &args)
            .await
            .map_err(|e| e.at(Step::Mount))?;

        info!("Mounted {} ({}) at {}", req.spec.name, device, target);
        Ok(())
    }

    /// Unmount `target` and release a client-only assignment behind it
    pub async fn unmount(&self, target: &Path) -> Result<()> {
        let is_dir = tokio::fs::metadata(target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!("{} is not a directory, nothing mounted", target.display());
            return Ok(());
        }

        let Some(source) = self.mounted_source(target).await? else {
            debug!("Nothing mounted at {}", target.display());
            return Ok(());
        };

        // Resolved while still mounted, so a failed lookup can be retried
        let resource = match self.resolver.resolve_resource_from_device(&source).await {
            Ok(Some(resource)) => Some(resource),
            Ok(None) => {
                warn!("No resource owns {}, leaving assignments alone", source);
                None
            }
            Err(e @ Error::UnsupportedDeviceNaming { .. }) => {
                warn!("{}, leaving assignments alone", e);
                None
            }
            Err(e) => return Err(e.at(Step::ResolveResource)),
        };

        let target_arg = target.to_string_lossy().into_owned();
        self.host_command(&self.mount.umount_binary, &[target_arg])
            .await
            .map_err(|e| e.at(Step::Unmount))?;
        info!("Unmounted {} from {}", source, target.display());

        match resource {
            Some(resource) => self.detach(&resource, &self.local_node).await,
            None => Ok(()),
        }
    }

    /// Remove the assignment of `resource` from `node` if it holds no data there.
    ///
    /// Assignments with local storage are kept, removing them could lose the
    /// only replica.
    pub async fn detach(&self, resource: &str, node: &str) -> Result<()> {
        let client = self
            .convergence
            .is_client(resource, node)
            .await
            .map_err(|e| e.at(Step::Unassign))?;
        if !client {
            debug!("{} keeps local storage on {}, not unassigning", resource, node);
            return Ok(());
        }

        if node == self.local_node {
            self.convergence
                .control_plane()
                .demote(resource)
                .await
                .map_err(|e| e.at(Step::Unassign))?;
        }

        self.convergence
            .unassign(resource, node)
            .await
            .map_err(|e| e.at(Step::Unassign))?;
        info!("Unassigned client {} from {}", resource, node);
        Ok(())
    }

    /// Source currently mounted at `target`
    async fn mounted_source(&self, target: &Path) -> Result<Option<String>> {
        let args = vec![
            "-n".to_string(),
            "-o".to_string(),
            "SOURCE".to_string(),
            "--mountpoint".to_string(),
            target.to_string_lossy().into_owned(),
        ];
        let output = self.runner.run(&self.mount.findmnt_binary, &args).await?;
        if !output.success() {
            return Ok(None);
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(String::from))
    }

    async fn host_command(&self, program: &str, args: &[String]) -> Result<()> {
        let output = self.runner.run(program, args).await?;
        if !output.success() {
            return Err(Error::HostCommand {
                command: command_line(program, args),
                output: output.combined(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::test_support::{assignment, FakeControlPlane, ScriptedRunner};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const NODE: &str = "kubelet-a";

    struct Fixture {
        dir: tempfile::TempDir,
        fake: Arc<FakeControlPlane>,
        runner: Arc<ScriptedRunner>,
        orchestrator: MountOrchestrator,
        device: String,
    }

    /// Device r0 (minor 5) exists; `blkid` and `findmnt` print the given text
    fn fixture(fake: FakeControlPlane, blkid: &'static str, findmnt: Option<&'static str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("drbd").to_string_lossy().into_owned();
        let device = format!("{}5", prefix);
        std::fs::write(&device, b"").unwrap();

        let mounted = findmnt.map(|s| s.replace("{dev}", &device));
        let runner = Arc::new(ScriptedRunner::new(move |cmd| {
            if cmd.starts_with("blkid") {
                Ok(CommandOutput::ok(blkid))
            } else if cmd.starts_with("findmnt") {
                Ok(match &mounted {
                    Some(source) => CommandOutput::ok(format!("{}\n", source)),
                    None => CommandOutput::failed(1, ""),
                })
            } else {
                Ok(CommandOutput::ok(""))
            }
        }));

        let mut config = AgentConfig::default();
        config.device.path_prefix = prefix;
        config.retry = RetryConfig::immediate();

        let fake = Arc::new(fake.with_volume("r0", Some(5)));
        let orchestrator = MountOrchestrator::new(&config, fake.clone(), runner.clone(), NODE);

        Fixture {
            dir,
            fake,
            runner,
            orchestrator,
            device,
        }
    }

    fn settled() -> FakeControlPlane {
        FakeControlPlane::new()
            .defined()
            .with_assignment(assignment("r0", NODE, "connect|deploy", "connect|deploy"))
    }

    fn client() -> FakeControlPlane {
        FakeControlPlane::new().defined().with_assignment(assignment(
            "r0",
            NODE,
            "connect|deploy|diskless",
            "connect|deploy|diskless",
        ))
    }

    impl Fixture {
        fn request(&self) -> MountRequest {
            MountRequest::new(ResourceSpec::named("r0"), NODE, self.dir.path().join("mnt"))
        }

        fn target(&self) -> String {
            self.dir.path().join("mnt").to_string_lossy().into_owned()
        }
    }

    #[tokio::test]
    async fn test_mount_blank_device() {
        let f = fixture(settled(), "", None);

        f.orchestrator.mount(&f.request()).await.unwrap();

        assert!(f.runner.ran(&format!("mkfs -t ext4 {}", f.device)));
        assert!(f
            .runner
            .ran(&format!("mount -o defaults {} {}", f.device, f.target())));
        assert!(f.dir.path().join("mnt").is_dir());
        assert!(f.fake.state().created.is_empty());
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let f = fixture(settled(), "ID_FS_TYPE=ext4\n", Some("{dev}"));

        f.orchestrator.mount(&f.request()).await.unwrap();

        assert!(!f.runner.ran("mkfs"));
        assert!(!f.runner.ran("mount"));
    }

    #[tokio::test]
    async fn test_mountpoint_busy() {
        let f = fixture(settled(), "ID_FS_TYPE=ext4\n", Some("/dev/sdb1"));

        let err = f.orchestrator.mount(&f.request()).await.unwrap_err();
        assert_matches!(err, Error::Step { step: Step::Mount, .. });
        assert_matches!(err.root(), Error::MountpointBusy { existing, .. } if existing == "/dev/sdb1");
    }

    #[tokio::test]
    async fn test_read_only_mount_options() {
        let f = fixture(settled(), "ID_FS_TYPE=xfs\n", None);
        let mut req = f.request();
        req.format = FormatOptions::new("xfs");
        req.mount_options = "noatime".into();
        req.read_only = true;

        f.orchestrator.mount(&req).await.unwrap();
        assert!(f
            .runner
            .ran(&format!("mount -o noatime,ro {} {}", f.device, f.target())));
    }

    #[tokio::test]
    async fn test_mount_refuses_foreign_filesystem() {
        let f = fixture(settled(), "ID_FS_TYPE=xfs\n", None);
        let mut req = f.request();
        req.format = FormatOptions {
            force: true,
            ..FormatOptions::new("ext4")
        };

        let err = f.orchestrator.mount(&req).await.unwrap_err();
        assert_matches!(err, Error::Step { step: Step::EnsureFilesystem, .. });
        assert_matches!(err.root(), Error::FilesystemConflict { .. });
        assert!(!f.runner.ran("mkfs"));
        assert!(!f.runner.ran("mount"));
    }

    #[tokio::test]
    async fn test_attach_timeout_is_assign_step() {
        let fake = FakeControlPlane::new().defined();
        fake.state().never_settles = true;
        let f = fixture(fake, "", None);

        let err = f
            .orchestrator
            .attach(&ResourceSpec::named("r0"), NODE, false)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Step { step: Step::Assign, .. });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_attach_promotes_locally() {
        let f = fixture(settled(), "", None);

        let device = f
            .orchestrator
            .attach(&ResourceSpec::named("r0"), NODE, false)
            .await
            .unwrap();
        assert_eq!(device, f.device);
        assert_eq!(f.fake.state().promoted, vec!["r0".to_string()]);
    }

    #[tokio::test]
    async fn test_unmount_missing_target() {
        let f = fixture(client(), "", Some("{dev}"));

        f.orchestrator
            .unmount(&f.dir.path().join("nothing-here"))
            .await
            .unwrap();
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_not_mounted() {
        let f = fixture(client(), "", None);
        std::fs::create_dir(f.dir.path().join("mnt")).unwrap();

        f.orchestrator.unmount(&f.dir.path().join("mnt")).await.unwrap();
        assert!(!f.runner.ran("umount"));
        assert!(f.fake.state().deleted.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_releases_client() {
        let f = fixture(client(), "", Some("{dev}"));
        std::fs::create_dir(f.dir.path().join("mnt")).unwrap();

        f.orchestrator.unmount(&f.dir.path().join("mnt")).await.unwrap();

        assert!(f.runner.ran(&format!("umount {}", f.target())));
        let state = f.fake.state();
        assert_eq!(state.deleted, vec![("r0".to_string(), NODE.to_string())]);
        assert_eq!(state.demoted, vec!["r0".to_string()]);
    }

    #[tokio::test]
    async fn test_unmount_keeps_storage_assignment() {
        let f = fixture(settled(), "", Some("{dev}"));
        std::fs::create_dir(f.dir.path().join("mnt")).unwrap();

        f.orchestrator.unmount(&f.dir.path().join("mnt")).await.unwrap();

        assert!(f.runner.ran("umount"));
        assert!(f.fake.state().deleted.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_keeps_mount_when_owner_lookup_fails() {
        let f = fixture(client(), "", Some("{dev}"));
        std::fs::create_dir(f.dir.path().join("mnt")).unwrap();
        f.fake.state().fail_volumes = true;

        let result = f.orchestrator.unmount(&f.dir.path().join("mnt")).await;

        assert_matches!(
            result,
            Err(Error::Step { step: Step::ResolveResource, .. })
        );
        assert!(!f.runner.ran("umount"));
        assert!(f.fake.state().deleted.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_foreign_device() {
        let f = fixture(client(), "", Some("/dev/sda1"));
        std::fs::create_dir(f.dir.path().join("mnt")).unwrap();

        f.orchestrator.unmount(&f.dir.path().join("mnt")).await.unwrap();

        assert!(f.runner.ran("umount"));
        assert!(f.fake.state().deleted.is_empty());
    }

    #[tokio::test]
    async fn test_detach_remote_client_skips_demotion() {
        let fake = FakeControlPlane::new().with_assignment(assignment(
            "r0",
            "kubelet-b",
            "connect|deploy|diskless",
            "connect|deploy|diskless",
        ));
        let f = fixture(fake, "", None);

        f.orchestrator.detach("r0", "kubelet-b").await.unwrap();

        let state = f.fake.state();
        assert_eq!(state.deleted.len(), 1);
        assert!(state.demoted.is_empty());
    }
}
