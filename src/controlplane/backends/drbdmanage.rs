//! drbdmanage Control Plane Adapter
//!
//! Legacy DRBD 8/9 clusters managed by drbdmanage. Listings are requested
//! with `--machine-readable` and come back as comma separated lines.

use crate::config::DrbdmanageConfig;
use crate::domain::assignment::{Assignment, StateFlags};
use crate::domain::device::VolumeRecord;
use crate::domain::ports::{command_line, CommandRunnerRef, ControlPlane, DefinitionState};
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

const FIELD_SEP: char = ',';

/// `node,resource,volume,current,target`
const ASSIGNMENT_FIELDS: usize = 5;

/// `resource,,volume,size,port,minor,`
const VOLUME_FIELDS: usize = 7;

// =============================================================================
// Output Parsing
// =============================================================================

fn lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// `list-resources --resources R`: a line starting with R, or nothing
pub fn parse_definition(command: &str, resource: &str, output: &str) -> Result<bool> {
    let Some(line) = lines(output).next() else {
        return Ok(false);
    };

    match line.split(FIELD_SEP).next() {
        Some(name) if name == resource => Ok(true),
        _ => Err(Error::ControlPlaneParse {
            command: command.to_string(),
            reason: format!("expected resource {}, got {:?}", resource, line),
        }),
    }
}

/// `list-assignments --resources R --nodes N`: at most one line
pub fn parse_assignment(command: &str, output: &str) -> Result<Option<Assignment>> {
    let parse_error = |reason: String| Error::ControlPlaneParse {
        command: command.to_string(),
        reason,
    };

    let found: Vec<&str> = lines(output).collect();
    let line = match found.as_slice() {
        [] => return Ok(None),
        [line] => *line,
        more => return Err(parse_error(format!("expected one assignment, got {}", more.len()))),
    };

    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() != ASSIGNMENT_FIELDS {
        return Err(parse_error(format!("malformed assignment {:?}", line)));
    }

    Ok(Some(Assignment {
        node: fields[0].trim().to_string(),
        resource: fields[1].trim().to_string(),
        current: StateFlags::parse(fields[3]),
        target: StateFlags::parse(fields[4]),
    }))
}

/// `list-volumes`: malformed lines are skipped, the next one might be fine
pub fn parse_volumes(output: &str) -> Vec<VolumeRecord> {
    lines(output)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            if fields.len() != VOLUME_FIELDS {
                warn!("Skipping malformed volume line {:?}", line);
                return None;
            }

            let volume_number = match fields[2].trim().parse() {
                Ok(n) => n,
                Err(_) => {
                    warn!("Skipping volume line with bad volume number {:?}", line);
                    return None;
                }
            };

            let minor = match fields[5].trim() {
                "" => None,
                digits => match digits.parse() {
                    Ok(m) => Some(m),
                    Err(_) => {
                        warn!("Skipping volume line with bad minor {:?}", line);
                        return None;
                    }
                },
            };

            Some(VolumeRecord {
                resource: fields[0].trim().to_string(),
                volume_number,
                minor,
            })
        })
        .collect()
}

// =============================================================================
// drbdmanage Adapter
// =============================================================================

/// Adapter for the drbdmanage client
pub struct DrbdmanageBackend {
    config: DrbdmanageConfig,
    runner: CommandRunnerRef,
}

impl DrbdmanageBackend {
    /// Create a new drbdmanage adapter
    pub fn new(config: DrbdmanageConfig, runner: CommandRunnerRef) -> Self {
        Self { config, runner }
    }

    /// Run `program` and return stdout, failing on a non-zero exit
    async fn invoke(&self, program: &str, args: &[&str]) -> Result<(String, String)> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let command = command_line(program, &args);
        let output = self.runner.run(program, &args).await?;

        if !output.success() {
            return Err(Error::ControlPlaneCommand {
                command,
                output: output.combined(),
            });
        }
        Ok((command, output.stdout))
    }

    async fn drbdmanage(&self, args: &[&str]) -> Result<(String, String)> {
        self.invoke(&self.config.binary, args).await
    }

    fn unsupported(&self, operation: &str) -> Error {
        Error::BackendOperationFailed {
            backend: self.backend_name().to_string(),
            operation: operation.to_string(),
            reason: "resource definitions are managed outside the agent".into(),
        }
    }
}

#[async_trait]
impl ControlPlane for DrbdmanageBackend {
    fn backend_name(&self) -> &str {
        "drbdmanage"
    }

    async fn definition(&self, resource: &str) -> Result<DefinitionState> {
        let (command, out) = self
            .drbdmanage(&["list-resources", "--resources", resource, "--machine-readable"])
            .await?;
        let defined = parse_definition(&command, resource, &out)?;

        // Resources are always defined together with their volumes
        Ok(DefinitionState {
            defined,
            volume_zero: defined,
        })
    }

    async fn create_definition(&self, _spec: &ResourceSpec, _state: DefinitionState) -> Result<()> {
        Err(self.unsupported("create-definition"))
    }

    async fn assignment(&self, resource: &str, node: &str) -> Result<Option<Assignment>> {
        let (command, out) = self
            .drbdmanage(&[
                "list-assignments",
                "--resources",
                resource,
                "--nodes",
                node,
                "--machine-readable",
            ])
            .await?;
        parse_assignment(&command, &out)
    }

    async fn create_assignment(
        &self,
        resource: &str,
        node: &str,
        _storage_pool: &str,
        diskless: bool,
    ) -> Result<()> {
        info!("Assigning {} to {} (diskless: {})", resource, node, diskless);

        let mut args = vec!["assign-resource", resource, node];
        if diskless {
            args.push("--client");
        }
        self.drbdmanage(&args).await.map(|_| ())
    }

    async fn auto_place(&self, spec: &ResourceSpec) -> Result<()> {
        let count = spec.auto_place.to_string();
        info!("Deploying {} replicas of {}", count, spec.name);
        self.drbdmanage(&["deploy-resource", spec.name.as_str(), count.as_str()])
            .await
            .map(|_| ())
    }

    async fn delete_assignment(&self, resource: &str, node: &str) -> Result<()> {
        info!("Unassigning {} from {}", resource, node);
        self.drbdmanage(&["unassign-resource", resource, node, "--quiet"])
            .await
            .map(|_| ())
    }

    async fn volumes(&self, resource: Option<&str>) -> Result<Vec<VolumeRecord>> {
        let mut args = vec!["list-volumes"];
        if let Some(resource) = resource {
            args.push("--resources");
            args.push(resource);
        }
        args.push("--machine-readable");

        let (command, out) = self.drbdmanage(&args).await?;
        let volumes = parse_volumes(&out);

        if resource.is_some() && volumes.is_empty() && lines(&out).next().is_some() {
            return Err(Error::ControlPlaneParse {
                command,
                reason: format!("no well-formed volume in {:?}", out.trim()),
            });
        }
        Ok(volumes)
    }

    async fn resume_failed_actions(&self) -> Result<()> {
        debug!("Resuming failed drbdmanage actions");
        self.drbdmanage(&["resume-all"]).await.map(|_| ())
    }

    async fn promote(&self, resource: &str) -> Result<()> {
        if !self.config.promote {
            return Ok(());
        }

        tokio::time::sleep(self.config.promotion_delay()).await;
        info!("Promoting {}", resource);
        self.invoke(&self.config.drbdadm_binary, &["primary", resource])
            .await
            .map(|_| ())
    }

    async fn demote(&self, resource: &str) -> Result<()> {
        if !self.config.promote {
            return Ok(());
        }

        info!("Demoting {}", resource);
        self.invoke(&self.config.drbdadm_binary, &["secondary", resource])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assignment::StateFlag;
    use crate::domain::device::{primary_minor, resource_for_minor};
    use crate::domain::ports::CommandOutput;
    use crate::test_support::ScriptedRunner;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const CMD: &str = "drbdmanage list-assignments";

    fn backend(runner: Arc<ScriptedRunner>, promote: bool) -> DrbdmanageBackend {
        let config = DrbdmanageConfig {
            promote,
            promotion_delay_ms: 0,
            ..Default::default()
        };
        DrbdmanageBackend::new(config, runner)
    }

    #[test]
    fn test_parse_definition() {
        assert!(parse_definition(CMD, "test0", "test0,7001,\n").unwrap());
        assert!(parse_definition(CMD, "test1", "test1,7002,\n").unwrap());
        assert!(!parse_definition(CMD, "test3", "").unwrap());
        assert_matches!(
            parse_definition(CMD, "test2", "test9,7003,\n"),
            Err(Error::ControlPlaneParse { .. })
        );
    }

    #[test]
    fn test_parse_assignment() {
        let a = parse_assignment(CMD, "node0,test0,0,connect|deploy,connect|deploy\n")
            .unwrap()
            .unwrap();
        assert_eq!(a.node, "node0");
        assert_eq!(a.resource, "test0");
        assert!(a.is_settled());

        let a = parse_assignment(CMD, "node1,test1,0,connect|deploy|diskless,connect|deploy|diskless\n")
            .unwrap()
            .unwrap();
        assert!(a.is_settled());
        assert!(a.is_client_only());

        let a = parse_assignment(CMD, "node0,test0,0,,connect|deploy\n").unwrap().unwrap();
        assert!(!a.is_settled());
        assert!(a.target.contains(&StateFlag::Deploy));

        assert!(parse_assignment(CMD, "").unwrap().is_none());
    }

    #[test]
    fn test_parse_assignment_rejects_malformed_output() {
        assert_matches!(
            parse_assignment(CMD, "node0,test0,connect|deploy\n"),
            Err(Error::ControlPlaneParse { .. })
        );
        assert_matches!(
            parse_assignment(
                CMD,
                "node0,test0,0,connect,connect\nnode1,test0,0,connect,connect\n"
            ),
            Err(Error::ControlPlaneParse { .. })
        );
    }

    #[test]
    fn test_parse_volumes() {
        let volumes = parse_volumes(
            "test0,,0,102400,7001,100,\n\
             test1,,0,102400,7002,101,\n\
             test2,,0,102400,7003,102,\n\
             test3,,0,102400,7004,103,\n\
             test4,,0,102400,7004,104,\n",
        );
        assert_eq!(resource_for_minor(&volumes, 102).as_deref(), Some("test2"));
        assert_eq!(resource_for_minor(&volumes, 7001), None);
        assert_eq!(primary_minor(&volumes, "test0"), Some(100));

        let volumes = parse_volumes(
            "a bad line\n\
             test0,,0,102400,7001,100,\n\
             1,2,3,4,5,6,7,8,9,10\n\
             test1,,0,102400,7002,101,\n\
             test2,,0,102400,7003,,\n",
        );
        assert_eq!(volumes.len(), 3);
        assert_eq!(resource_for_minor(&volumes, 101).as_deref(), Some("test1"));
        assert_eq!(primary_minor(&volumes, "test2"), None);

        assert!(parse_volumes("").is_empty());
    }

    #[tokio::test]
    async fn test_volume_minor_lookup() {
        let runner = Arc::new(ScriptedRunner::replying("test0,,0,102400,7001,130,\n"));
        let backend = backend(runner.clone(), false);

        let volumes = backend.volumes(Some("test0")).await.unwrap();
        assert_eq!(primary_minor(&volumes, "test0"), Some(130));
        assert_eq!(
            runner.calls(),
            vec!["drbdmanage list-volumes --resources test0 --machine-readable"]
        );
    }

    #[tokio::test]
    async fn test_volume_listing_without_usable_lines() {
        let backend = backend(Arc::new(ScriptedRunner::replying("garbage\n")), false);

        assert_matches!(
            backend.volumes(Some("test0")).await,
            Err(Error::ControlPlaneParse { .. })
        );
        assert!(backend.volumes(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutation_commands() {
        let runner = Arc::new(ScriptedRunner::replying(""));
        let backend = backend(runner.clone(), false);
        let spec = ResourceSpec {
            name: "r1".into(),
            auto_place: 3,
            ..Default::default()
        };

        backend.create_assignment("r1", "node0", "", true).await.unwrap();
        backend.create_assignment("r1", "node1", "", false).await.unwrap();
        backend.auto_place(&spec).await.unwrap();
        backend.delete_assignment("r1", "node0").await.unwrap();
        backend.resume_failed_actions().await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "drbdmanage assign-resource r1 node0 --client",
                "drbdmanage assign-resource r1 node1",
                "drbdmanage deploy-resource r1 3",
                "drbdmanage unassign-resource r1 node0 --quiet",
                "drbdmanage resume-all",
            ]
        );
    }

    #[tokio::test]
    async fn test_promotion_only_when_enabled() {
        let runner = Arc::new(ScriptedRunner::replying(""));

        backend(runner.clone(), false).promote("r1").await.unwrap();
        assert!(runner.calls().is_empty());

        let enabled = backend(runner.clone(), true);
        enabled.promote("r1").await.unwrap();
        enabled.demote("r1").await.unwrap();
        assert_eq!(runner.calls(), vec!["drbdadm primary r1", "drbdadm secondary r1"]);
    }

    #[tokio::test]
    async fn test_definitions_are_unsupported() {
        let backend = backend(Arc::new(ScriptedRunner::replying("")), false);

        assert_matches!(
            backend
                .create_definition(&ResourceSpec::named("r1"), DefinitionState::default())
                .await,
            Err(Error::BackendOperationFailed { backend, .. }) if backend == "drbdmanage"
        );
    }

    #[tokio::test]
    async fn test_failed_listing() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Ok(CommandOutput::failed(1, "Error: Cannot connect to the drbdmanage process"))
        }));
        let backend = backend(runner, false);

        assert_matches!(
            backend.assignment("r1", "node0").await,
            Err(Error::ControlPlaneCommand { .. })
        );
    }
}
