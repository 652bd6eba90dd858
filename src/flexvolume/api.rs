//! FlexVolume call handling
//!
//! Maps each kubelet call onto the mount orchestrator and turns the outcome
//! into a [`Reply`].

use crate::config::AgentConfig;
use crate::controlplane::deployer::Deployer;
use crate::domain::ports::{CommandRunnerRef, ControlPlaneRef};
use crate::error::Result;
use crate::flexvolume::options::FlexOptions;
use crate::flexvolume::response::{Capabilities, Reply, Response};
use crate::flexvolume::FlexCall;
use crate::node::mount::{MountOrchestrator, MountRequest};
use std::path::Path;
use tracing::{debug, info};

/// Driver answering kubelet calls on one node
pub struct FlexVolumeApi {
    config: AgentConfig,
    orchestrator: MountOrchestrator,
    deployer: Deployer,
}

impl FlexVolumeApi {
    pub fn new(
        config: AgentConfig,
        control_plane: ControlPlaneRef,
        runner: CommandRunnerRef,
        local_node: impl Into<String>,
    ) -> Self {
        let orchestrator =
            MountOrchestrator::new(&config, control_plane.clone(), runner, local_node);
        Self {
            config,
            orchestrator,
            deployer: Deployer::new(control_plane),
        }
    }

    /// Answer to `init`, which needs no control plane
    pub fn init() -> Reply {
        Reply::ok(Response::capabilities(Capabilities { attach: true }))
    }

    /// Run one call
    pub async fn call(&self, call: &FlexCall) -> Reply {
        let verb = call.verb();
        info!("Handling {}", verb);

        let result = match call {
            FlexCall::Init => return Self::init(),
            FlexCall::Attach { options, node } => self.attach(options, node).await,
            FlexCall::WaitForAttach { device, options } => {
                self.wait_for_attach(device, options).await
            }
            FlexCall::IsAttached { options, node } => self.is_attached(options, node).await,
            FlexCall::Detach { volume, node } => self.detach(volume, node).await,
            FlexCall::MountDevice {
                target,
                device,
                options,
            } => self.mount_device(target, device, options).await,
            FlexCall::UnmountDevice { target } | FlexCall::Unmount { target } => {
                self.unmount(target).await
            }
            FlexCall::GetVolumeName { options } => Self::volume_name(options),
        };

        match result {
            Ok(response) => Reply::ok(response),
            Err(e) => Reply::from_error(verb, &e),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    async fn attach(&self, options: &str, node: &str) -> Result<Response> {
        let opts = FlexOptions::parse(options)?;
        let mut spec = opts.resource_spec(&self.config.linstor)?;

        // Placement options mean the volume may not exist yet
        if spec.wants_definition() {
            spec = self.deployer.deploy(spec).await?;
        }

        let device = self
            .orchestrator
            .attach(&spec, node, opts.diskless()?)
            .await?;
        Ok(Response::device(device))
    }

    async fn wait_for_attach(&self, device: &str, options: &str) -> Result<Response> {
        let resource = FlexOptions::parse(options)?.resource_name()?;
        let path = self
            .orchestrator
            .resolver()
            .wait_for_device_path(&resource, self.config.retry.device_path_attempts)
            .await?;
        if path != device {
            debug!("kubelet expected {}, {} is at {}", device, resource, path);
        }
        Ok(Response::device(path))
    }

    async fn is_attached(&self, options: &str, node: &str) -> Result<Response> {
        let resource = FlexOptions::parse(options)?.resource_name()?;
        let attached = self
            .orchestrator
            .convergence()
            .wait_for_assignment(&resource, node)
            .await?;
        Ok(Response::attached(attached))
    }

    async fn detach(&self, volume: &str, node: &str) -> Result<Response> {
        self.orchestrator.detach(volume, node).await?;
        Ok(Response::success())
    }

    async fn mount_device(&self, target: &Path, device: &str, options: &str) -> Result<Response> {
        let opts = FlexOptions::parse(options)?;
        let spec = opts.resource_spec(&self.config.linstor)?;
        debug!("Mounting {} from kubelet device {}", spec.name, device);

        let request = MountRequest {
            spec,
            node: self.orchestrator.local_node().to_string(),
            target: target.to_path_buf(),
            format: opts.format_options(&self.config.filesystem.default_fs_type)?,
            mount_options: opts.mount_options(),
            read_only: opts.read_only(),
            diskless: opts.diskless()?,
        };
        self.orchestrator.mount(&request).await?;
        Ok(Response::success())
    }

    async fn unmount(&self, target: &Path) -> Result<Response> {
        self.orchestrator.unmount(target).await?;
        Ok(Response::success())
    }

    fn volume_name(options: &str) -> Result<Response> {
        let resource = FlexOptions::parse(options)?.resource_name()?;
        Ok(Response::volume_name(resource))
    }
}
