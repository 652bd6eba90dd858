//! Assignment Convergence
//!
//! The control plane applies assignments asynchronously. These loops poll it
//! until the current state of an assignment matches its target, nudging
//! stalled actions along between polls, and give up after a fixed number of
//! attempts.

use crate::config::RetryConfig;
use crate::domain::ports::{ControlPlane, ControlPlaneRef};
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Make sure `spec` has a definition with volume 0.
///
/// Missing parts are only created when the caller asked for placement;
/// attaching to a resource nobody defined is an error.
pub async fn reserve_definition(control_plane: &dyn ControlPlane, spec: &ResourceSpec) -> Result<()> {
    let state = control_plane.definition(&spec.name).await?;
    if state.is_complete() {
        return Ok(());
    }

    if !spec.wants_definition() {
        return Err(Error::ResourceNotDefined {
            resource: spec.name.clone(),
        });
    }

    info!(
        "Creating definition of {} (defined: {}, volume 0: {})",
        spec.name, state.defined, state.volume_zero
    );
    control_plane.create_definition(spec, state).await
}

/// Drives assignments to a settled state
pub struct AssignmentConvergence {
    control_plane: ControlPlaneRef,
    retry: RetryConfig,
}

impl AssignmentConvergence {
    pub fn new(control_plane: ControlPlaneRef, retry: RetryConfig) -> Self {
        Self {
            control_plane,
            retry,
        }
    }

    pub fn control_plane(&self) -> &ControlPlaneRef {
        &self.control_plane
    }

    /// Best effort, failures are only logged
    async fn resume(&self) {
        if let Err(e) = self.control_plane.resume_failed_actions().await {
            warn!("Unable to resume failed actions: {}", e);
        }
    }

    async fn pause(&self) {
        let interval = self.retry.interval();
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    /// Assign `spec` to `node` and wait until the assignment has settled
    pub async fn assign(&self, spec: &ResourceSpec, node: &str, diskless: bool) -> Result<()> {
        let resource = spec.name.as_str();
        reserve_definition(self.control_plane.as_ref(), spec).await?;

        match self.control_plane.assignment(resource, node).await? {
            Some(existing) if existing.is_settled() => {
                debug!("{} already settled", existing);
                return Ok(());
            }
            Some(existing) => {
                info!("Waiting on pending assignment {}", existing);
            }
            None => {
                self.control_plane
                    .create_assignment(resource, node, spec.pool_for(diskless), diskless)
                    .await?;
            }
        }

        if self.wait_for_assignment(resource, node).await? {
            info!("Resource {} settled on {}", resource, node);
            Ok(())
        } else {
            Err(Error::AssignmentTimeout {
                resource: resource.to_string(),
                node: node.to_string(),
                attempts: self.retry.assign_attempts,
            })
        }
    }

    /// Poll until the assignment of `resource` to `node` has settled.
    ///
    /// Returns whether it settled within the attempt budget. Between polls
    /// the control plane is asked to resume failed actions; failures of that
    /// request are logged and otherwise ignored.
    pub async fn wait_for_assignment(&self, resource: &str, node: &str) -> Result<bool> {
        for attempt in 1..=self.retry.assign_attempts {
            if let Some(assignment) = self.control_plane.assignment(resource, node).await? {
                if assignment.is_settled() {
                    return Ok(true);
                }
                debug!("Attempt {}: {} not settled", attempt, assignment);
            } else {
                debug!("Attempt {}: {} not yet assigned to {}", attempt, resource, node);
            }

            self.resume().await;
            self.pause().await;
        }

        Ok(self
            .control_plane
            .assignment(resource, node)
            .await?
            .map_or(false, |a| a.is_settled()))
    }

    /// Remove the assignment of `resource` from `node` and wait until it is gone
    pub async fn unassign(&self, resource: &str, node: &str) -> Result<()> {
        self.control_plane.delete_assignment(resource, node).await?;

        for attempt in 1..=self.retry.unassign_attempts {
            if self.control_plane.assignment(resource, node).await?.is_none() {
                return Ok(());
            }
            debug!("Attempt {}: {} still assigned to {}", attempt, resource, node);
            self.resume().await;
            self.pause().await;
        }

        if self.control_plane.assignment(resource, node).await?.is_none() {
            return Ok(());
        }

        Err(Error::UnassignmentTimeout {
            resource: resource.to_string(),
            node: node.to_string(),
            attempts: self.retry.unassign_attempts,
        })
    }

    /// Whether `node` holds `resource` without local storage
    pub async fn is_client(&self, resource: &str, node: &str) -> Result<bool> {
        Ok(self
            .control_plane
            .assignment(resource, node)
            .await?
            .map_or(false, |a| a.is_client_only()))
    }
}
