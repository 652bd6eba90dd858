//! LINSTOR Control Plane Adapter
//!
//! Drives the LINSTOR controller through `linstor -m`, which answers every
//! call with JSON: listings for queries and an array of return statuses for
//! mutations.

use crate::config::LinstorConfig;
use crate::domain::assignment::{Assignment, StateFlag, StateFlags};
use crate::domain::device::{VolumeRecord, PRIMARY_VOLUME};
use crate::domain::ports::{command_line, CommandRunnerRef, ControlPlane, DefinitionState};
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Return codes with any of these bits set are warnings, infos or errors
const RET_CODE_MASK: u64 = 0xC000_0000_0000_0000;

const FLAG_DELETE: &str = "DELETE";
const FLAG_DISKLESS: &str = "DISKLESS";
const DISK_STATE_DISKLESS: &str = "Diskless";

// =============================================================================
// Wire Types
// =============================================================================

/// `linstor -m resource list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceList {
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
    #[serde(default)]
    pub resource_states: Vec<ResourceState>,
}

/// A resource as placed on one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    pub node_name: String,
    #[serde(default)]
    pub vlms: Vec<VolumeInfo>,
    #[serde(default)]
    pub rsc_flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub vlm_nr: u32,
    #[serde(default)]
    pub stor_pool_name: String,
    #[serde(default)]
    pub vlm_minor_nr: Option<u32>,
}

/// Observed state of a resource on one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub rsc_name: String,
    pub node_name: String,
    #[serde(default)]
    pub is_present: bool,
    #[serde(default)]
    pub vlm_states: Vec<VolumeState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeState {
    pub vlm_nr: u32,
    #[serde(default)]
    pub disk_state: String,
    #[serde(default)]
    pub is_present: bool,
    #[serde(default)]
    pub vlm_minor_nr: Option<u32>,
}

/// `linstor -m resource-definition list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DefinitionList {
    #[serde(default)]
    rsc_dfns: Vec<ResourceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResourceDefinition {
    rsc_name: String,
    #[serde(default)]
    vlm_dfns: Vec<VolumeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeDefinition {
    vlm_nr: u32,
}

/// One entry of the status array answered to a mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReturnStatus {
    ret_code: u64,
    #[serde(default)]
    message_format: String,
}

/// A return code reports success only with no warning or error bits set
pub fn is_success(ret_code: u64) -> bool {
    ret_code & RET_CODE_MASK == 0
}

// =============================================================================
// LINSTOR Adapter
// =============================================================================

/// Adapter for the LINSTOR client
pub struct LinstorBackend {
    config: LinstorConfig,
    runner: CommandRunnerRef,
}

impl LinstorBackend {
    /// Create a new LINSTOR adapter
    pub fn new(config: LinstorConfig, runner: CommandRunnerRef) -> Self {
        Self { config, runner }
    }

    /// Machine-readable flag and controller list ahead of the subcommand
    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = vec!["-m".to_string()];
        if let Some(controllers) = self.config.controllers.as_deref().filter(|c| !c.is_empty()) {
            full.push("--controllers".to_string());
            full.push(controllers.to_string());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// Run a listing and decode its JSON
    async fn query<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let args = self.args(args);
        let command = command_line(&self.config.binary, &args);
        let output = self.runner.run(&self.config.binary, &args).await?;

        if !output.success() {
            return Err(Error::ControlPlaneCommand {
                command,
                output: output.combined(),
            });
        }

        serde_json::from_str(&output.stdout).map_err(|e| Error::ControlPlaneParse {
            command,
            reason: e.to_string(),
        })
    }

    /// Run a mutation and check every returned status
    async fn execute(&self, args: &[&str]) -> Result<()> {
        let args = self.args(args);
        let command = command_line(&self.config.binary, &args);
        let output = self.runner.run(&self.config.binary, &args).await?;

        if !output.success() {
            return Err(Error::ControlPlaneCommand {
                command,
                output: output.combined(),
            });
        }

        let statuses: Vec<ReturnStatus> =
            serde_json::from_str(&output.stdout).map_err(|e| Error::ControlPlaneParse {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if let Some(failed) = statuses.iter().find(|s| !is_success(s.ret_code)) {
            debug!("{} reported: {}", command, failed.message_format);
            return Err(Error::ControlPlaneCommand {
                command,
                output: output.stdout.trim().to_string(),
            });
        }

        Ok(())
    }

    /// Resources and their per-node state
    pub async fn list_resources(&self) -> Result<ResourceList> {
        let lists: Vec<ResourceList> = self.query(&["resource", "list"]).await?;
        Ok(lists.into_iter().next().unwrap_or_default())
    }

    async fn list_definitions(&self) -> Result<Vec<ResourceDefinition>> {
        let lists: Vec<DefinitionList> = self.query(&["resource-definition", "list"]).await?;
        Ok(lists
            .into_iter()
            .next()
            .map(|l| l.rsc_dfns)
            .unwrap_or_default())
    }

    /// Derive the assignment of `resource` on `node` from a listing
    pub fn assignment_from(&self, list: &ResourceList, resource: &str, node: &str) -> Option<Assignment> {
        let info = list
            .resources
            .iter()
            .find(|r| r.name == resource && r.node_name == node)?;
        let state = list
            .resource_states
            .iter()
            .find(|s| s.rsc_name == resource && s.node_name == node);
        let primary_state = state.and_then(|s| s.vlm_states.iter().find(|v| v.vlm_nr == PRIMARY_VOLUME));
        let reports_diskless = primary_state.map_or(false, |v| v.disk_state == DISK_STATE_DISKLESS);

        let diskless = info.rsc_flags.iter().any(|f| f == FLAG_DISKLESS)
            || info
                .vlms
                .iter()
                .any(|v| v.vlm_nr == PRIMARY_VOLUME && v.stor_pool_name == self.config.diskless_storage_pool)
            || reports_diskless;

        let mut target = StateFlags::new();
        if !info.rsc_flags.iter().any(|f| f == FLAG_DELETE) {
            target.insert(StateFlag::Connect);
            target.insert(StateFlag::Deploy);
            if diskless {
                target.insert(StateFlag::Diskless);
            }
        }

        let mut current = StateFlags::new();
        if let Some(state) = state {
            if state.is_present {
                current.insert(StateFlag::Connect);
            }
            if primary_state.map_or(false, |v| v.is_present) {
                current.insert(StateFlag::Deploy);
            }
            if reports_diskless {
                current.insert(StateFlag::Diskless);
            }
        }

        Some(Assignment {
            resource: resource.to_string(),
            node: node.to_string(),
            current,
            target,
        })
    }
}

/// Volume inventory of a listing; minors come from placements or states
fn volumes_from(list: &ResourceList, resource: Option<&str>) -> Vec<VolumeRecord> {
    let wanted = |name: &str| resource.map_or(true, |r| r == name);

    let placed = list
        .resources
        .iter()
        .filter(|r| wanted(&r.name))
        .flat_map(|r| {
            r.vlms.iter().map(move |v| VolumeRecord {
                resource: r.name.clone(),
                volume_number: v.vlm_nr,
                minor: v.vlm_minor_nr,
            })
        });

    let observed = list
        .resource_states
        .iter()
        .filter(|s| wanted(&s.rsc_name))
        .flat_map(|s| {
            s.vlm_states.iter().map(move |v| VolumeRecord {
                resource: s.rsc_name.clone(),
                volume_number: v.vlm_nr,
                minor: v.vlm_minor_nr,
            })
        });

    placed.chain(observed).collect()
}

#[async_trait]
impl ControlPlane for LinstorBackend {
    fn backend_name(&self) -> &str {
        "linstor"
    }

    async fn definition(&self, resource: &str) -> Result<DefinitionState> {
        let definitions = self.list_definitions().await?;
        Ok(definitions
            .iter()
            .find(|d| d.rsc_name == resource)
            .map(|d| DefinitionState {
                defined: true,
                volume_zero: d.vlm_dfns.iter().any(|v| v.vlm_nr == PRIMARY_VOLUME),
            })
            .unwrap_or_default())
    }

    async fn create_definition(&self, spec: &ResourceSpec, state: DefinitionState) -> Result<()> {
        if !state.defined {
            info!("Reserving resource name {}", spec.name);
            self.execute(&["resource-definition", "create", &spec.name]).await?;
        }

        if !state.volume_zero {
            let size = format!("{}kib", spec.size_kib);
            let mut args = vec!["volume-definition", "create", spec.name.as_str(), size.as_str()];
            if spec.encryption {
                args.push("--encrypt");
            }
            info!("Defining volume 0 of {} ({})", spec.name, size);
            self.execute(&args).await?;
        }

        Ok(())
    }

    async fn assignment(&self, resource: &str, node: &str) -> Result<Option<Assignment>> {
        let list = self.list_resources().await?;
        Ok(self.assignment_from(&list, resource, node))
    }

    async fn create_assignment(
        &self,
        resource: &str,
        node: &str,
        storage_pool: &str,
        diskless: bool,
    ) -> Result<()> {
        info!(
            "Assigning {} to {} from pool {} (diskless: {})",
            resource, node, storage_pool, diskless
        );
        self.execute(&["resource", "create", node, resource, "-s", storage_pool])
            .await
    }

    async fn auto_place(&self, spec: &ResourceSpec) -> Result<()> {
        let count = spec.auto_place.to_string();
        let mut args = vec!["resource", "create", spec.name.as_str(), "--auto-place", count.as_str()];
        if !spec.do_not_place_with_regex.is_empty() {
            args.push("--do-not-place-with-regex");
            args.push(&spec.do_not_place_with_regex);
        }

        info!("Auto-placing {} replicas of {}", count, spec.name);
        self.execute(&args).await
    }

    async fn delete_assignment(&self, resource: &str, node: &str) -> Result<()> {
        info!("Unassigning {} from {}", resource, node);
        self.execute(&["resource", "delete", node, resource]).await
    }

    async fn volumes(&self, resource: Option<&str>) -> Result<Vec<VolumeRecord>> {
        let list = self.list_resources().await?;
        Ok(volumes_from(&list, resource))
    }
}
