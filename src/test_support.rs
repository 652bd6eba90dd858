//! Test doubles for the ports

use crate::domain::assignment::{Assignment, StateFlag, StateFlags};
use crate::domain::device::VolumeRecord;
use crate::domain::ports::{command_line, CommandOutput, CommandRunner, ControlPlane, DefinitionState};
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Scripted Command Runner
// =============================================================================

type Handler = Box<dyn Fn(&str) -> Result<CommandOutput> + Send + Sync>;

/// Answers commands from a closure keyed on the rendered command line
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(handler: impl Fn(&str) -> Result<CommandOutput> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with the same stdout
    pub fn replying(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::new(move |_| Ok(CommandOutput::ok(stdout.clone())))
    }

    /// Command lines run so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any command line started with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());
        (self.handler)(&line)
    }
}

// =============================================================================
// In-Memory Control Plane
// =============================================================================

/// Observable state of [`FakeControlPlane`]
#[derive(Debug, Default)]
pub struct FakeState {
    pub definition: DefinitionState,
    pub assignments: HashMap<(String, String), Assignment>,
    pub volumes: Vec<VolumeRecord>,
    /// Queries answered unsettled before a pending assignment settles
    pub pending_polls: u32,
    /// Pending assignments never settle
    pub never_settles: bool,
    /// Deleted assignments stay listed
    pub sticky: bool,
    pub fail_resume: bool,
    /// Volume listings fail
    pub fail_volumes: bool,
    pub queries: u32,
    pub definitions_created: u32,
    /// (resource, node, pool, diskless)
    pub created: Vec<(String, String, String, bool)>,
    pub deleted: Vec<(String, String)>,
    pub auto_placed: Vec<(String, u64)>,
    pub resumes: u32,
    pub promoted: Vec<String>,
    pub demoted: Vec<String>,
}

/// Control plane kept in memory
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
}

pub fn flags(s: &str) -> StateFlags {
    StateFlags::parse(s)
}

pub fn assignment(resource: &str, node: &str, current: &str, target: &str) -> Assignment {
    Assignment {
        resource: resource.into(),
        node: node.into(),
        current: flags(current),
        target: flags(target),
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource definition with volume 0 exists
    pub fn defined(self) -> Self {
        self.state().definition = DefinitionState {
            defined: true,
            volume_zero: true,
        };
        self
    }

    pub fn with_assignment(self, assignment: Assignment) -> Self {
        self.state().assignments.insert(
            (assignment.resource.clone(), assignment.node.clone()),
            assignment,
        );
        self
    }

    pub fn with_volume(self, resource: &str, minor: Option<u32>) -> Self {
        self.state().volumes.push(VolumeRecord {
            resource: resource.into(),
            volume_number: 0,
            minor,
        });
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn backend_name(&self) -> &str {
        "fake"
    }

    async fn definition(&self, _resource: &str) -> Result<DefinitionState> {
        Ok(self.state().definition)
    }

    async fn create_definition(&self, _spec: &ResourceSpec, _state: DefinitionState) -> Result<()> {
        let mut state = self.state();
        state.definitions_created += 1;
        state.definition = DefinitionState {
            defined: true,
            volume_zero: true,
        };
        Ok(())
    }

    async fn assignment(&self, resource: &str, node: &str) -> Result<Option<Assignment>> {
        let mut state = self.state();
        state.queries += 1;

        let key = (resource.to_string(), node.to_string());
        let pending = state
            .assignments
            .get(&key)
            .map_or(false, |a| !a.is_settled());

        let mut settle = false;
        if pending && !state.never_settles {
            if state.pending_polls == 0 {
                settle = true;
            } else {
                state.pending_polls -= 1;
            }
        }

        if settle {
            if let Some(a) = state.assignments.get_mut(&key) {
                a.current = a.target.clone();
            }
        }
        Ok(state.assignments.get(&key).cloned())
    }

    async fn create_assignment(
        &self,
        resource: &str,
        node: &str,
        storage_pool: &str,
        diskless: bool,
    ) -> Result<()> {
        let mut state = self.state();
        state
            .created
            .push((resource.into(), node.into(), storage_pool.into(), diskless));

        let mut target: StateFlags = [StateFlag::Connect, StateFlag::Deploy].into_iter().collect();
        if diskless {
            target.insert(StateFlag::Diskless);
        }
        state.assignments.insert(
            (resource.into(), node.into()),
            Assignment {
                resource: resource.into(),
                node: node.into(),
                current: StateFlags::new(),
                target,
            },
        );
        Ok(())
    }

    async fn auto_place(&self, spec: &ResourceSpec) -> Result<()> {
        self.state()
            .auto_placed
            .push((spec.name.clone(), spec.auto_place));
        Ok(())
    }

    async fn delete_assignment(&self, resource: &str, node: &str) -> Result<()> {
        let mut state = self.state();
        state.deleted.push((resource.into(), node.into()));
        if !state.sticky {
            state
                .assignments
                .remove(&(resource.to_string(), node.to_string()));
        }
        Ok(())
    }

    async fn volumes(&self, resource: Option<&str>) -> Result<Vec<VolumeRecord>> {
        let state = self.state();
        if state.fail_volumes {
            return Err(Error::ControlPlaneCommand {
                command: "list-volumes".into(),
                output: "controller unreachable".into(),
            });
        }
        let volumes = state
            .volumes
            .iter()
            .filter(|v| resource.map_or(true, |r| v.resource == r))
            .cloned()
            .collect();
        Ok(volumes)
    }

    async fn resume_failed_actions(&self) -> Result<()> {
        let mut state = self.state();
        state.resumes += 1;
        if state.fail_resume {
            return Err(Error::ControlPlaneCommand {
                command: "resume-all".into(),
                output: "controller unreachable".into(),
            });
        }
        Ok(())
    }

    async fn promote(&self, resource: &str) -> Result<()> {
        self.state().promoted.push(resource.into());
        Ok(())
    }

    async fn demote(&self, resource: &str) -> Result<()> {
        self.state().demoted.push(resource.into());
        Ok(())
    }
}
