//! Resource deployment
//!
//! Creates a resource across the cluster from a placement request, as
//! opposed to attaching it to a single node.

use crate::controlplane::convergence::reserve_definition;
use crate::domain::ports::ControlPlaneRef;
use crate::domain::resource::ResourceSpec;
use crate::error::Result;
use tracing::{debug, info};

/// Places resources according to their spec
pub struct Deployer {
    control_plane: ControlPlaneRef,
}

impl Deployer {
    pub fn new(control_plane: ControlPlaneRef) -> Self {
        Self { control_plane }
    }

    /// Define `spec` and create every assignment it asks for.
    ///
    /// Diskful nodes come first, then diskless clients, then auto-placement.
    /// Nodes that already hold the resource are skipped, and auto-placement
    /// only happens for a resource that was not defined yet. Returns the
    /// normalized spec, whose name may have been generated.
    pub async fn deploy(&self, spec: ResourceSpec) -> Result<ResourceSpec> {
        let spec = spec.normalized();
        info!("Deploying resource {}", spec.name);

        // A complete definition means an earlier call already placed it
        let existing = self.control_plane.definition(&spec.name).await?.is_complete();
        reserve_definition(self.control_plane.as_ref(), &spec).await?;

        let placements = spec
            .node_list
            .iter()
            .map(|n| (n, false))
            .chain(spec.client_list.iter().map(|n| (n, true)));

        for (node, diskless) in placements {
            if self.control_plane.assignment(&spec.name, node).await?.is_some() {
                debug!("{} already present on {}", spec.name, node);
                continue;
            }
            self.control_plane
                .create_assignment(&spec.name, node, spec.pool_for(diskless), diskless)
                .await?;
        }

        if spec.is_auto_placed() {
            if existing {
                debug!("{} already defined, not auto-placing again", spec.name);
            } else {
                self.control_plane.auto_place(&spec).await?;
            }
        }

        Ok(spec)
    }
}
