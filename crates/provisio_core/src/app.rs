//! Ordered stack construction and cloud assembly synthesis.
//!
//! An [`App`] owns the deployment context and the parameter store. Stacks
//! are constructed one at a time, in call order; the first failing stack
//! aborts the composition and no later stack can be added.

use std::collections::BTreeSet;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::DeployContext;
use crate::environment::DeployEnvironment;
use crate::error::{CoreError, CoreResult};
use crate::parameters::{
    InMemoryParameterStore, ParameterManifest, ParameterStore, PublishedParameter,
};
use crate::stack::Stack;
use crate::token::Token;

/// File name of the assembly manifest.
pub const ASSEMBLY_MANIFEST_FILE: &str = "manifest.json";

/// Default assembly output directory.
pub const DEFAULT_ASSEMBLY_DIR: &str = "cdk.out";

/// Synthesis state of a run or a stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SynthState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Log entry for one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLogEntry {
    pub name: String,
    pub stack_id: String,
    pub state: SynthState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resources: usize,
    pub error: Option<String>,
}

/// Record of the stacks constructed during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthLog {
    pub run_id: Uuid,
    pub environment: String,
    pub state: SynthState,
    pub stacks: Vec<StackLogEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SynthLog {
    fn new(run_id: Uuid, environment: impl Into<String>) -> Self {
        Self {
            run_id,
            environment: environment.into(),
            state: SynthState::Pending,
            stacks: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Name of the stack that aborted the run, if any.
    pub fn failed_stack(&self) -> Option<&str> {
        self.stacks
            .iter()
            .find(|s| s.state == SynthState::Failed)
            .map(|s| s.name.as_str())
    }

    /// Names of the constructed stacks, in order.
    pub fn attempted(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Manifest entry for one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackManifest {
    pub id: String,
    pub name: String,
    pub template_file: String,
    pub dependencies: Vec<String>,
    pub parameters: Vec<String>,
}

/// Description of a synthesized cloud assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub version: String,
    pub run_id: Uuid,
    pub environment: DeployEnvironment,
    pub synthesized_at: DateTime<Utc>,
    /// Stacks in deployment order
    pub stacks: Vec<StackManifest>,
}

impl AssemblyManifest {
    pub fn load(assembly_dir: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(assembly_dir.join(ASSEMBLY_MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// In-memory result of synthesis.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub manifest: AssemblyManifest,
    /// `(stack id, template)` in deployment order
    pub templates: Vec<(String, Value)>,
    pub parameters: ParameterManifest,
}

impl Assembly {
    pub fn template(&self, stack_id: &str) -> Option<&Value> {
        self.templates
            .iter()
            .find(|(id, _)| id == stack_id)
            .map(|(_, t)| t)
    }

    /// Write templates and manifests into `out_dir`.
    pub fn write(&self, out_dir: &Path) -> CoreResult<()> {
        fs::create_dir_all(out_dir)?;
        for (entry, (_, template)) in self.manifest.stacks.iter().zip(&self.templates) {
            let json = serde_json::to_string_pretty(template)?;
            fs::write(out_dir.join(&entry.template_file), json)?;
        }
        fs::write(
            out_dir.join(ASSEMBLY_MANIFEST_FILE),
            serde_json::to_string_pretty(&self.manifest)?,
        )?;
        self.parameters.save(out_dir)?;
        info!(
            "Wrote {} templates to {:?}",
            self.templates.len(),
            out_dir
        );
        Ok(())
    }
}

/// Construction scope for a single stack.
///
/// Dereferences to the [`Stack`] being built and gives access to the
/// deployment context and the parameter store.
pub struct StackScope<'a> {
    stack: &'a mut Stack,
    context: &'a DeployContext,
    store: &'a mut dyn ParameterStore,
    names: &'a mut BTreeSet<(String, String)>,
}

impl<'a> StackScope<'a> {
    pub fn context(&self) -> &DeployContext {
        self.context
    }

    /// Identifier of `resource_name` for this deployment.
    pub fn physical_name(&self, resource_name: &str) -> String {
        self.context.id(resource_name)
    }

    /// Reserve a physical name. Two resources of the same kind cannot share
    /// a name within an assembly.
    pub fn claim_name(&mut self, kind: &str, name: &str) -> CoreResult<()> {
        if !self.names.insert((kind.to_string(), name.to_string())) {
            return Err(CoreError::DuplicatePhysicalName {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Publish `value` under the identifier of `resource_name`.
    ///
    /// Declares a string parameter resource in the stack and records the
    /// value in the parameter store. Returns the full parameter name.
    pub fn publish(
        &mut self,
        construct_id: &str,
        resource_name: &str,
        value: Token,
        description: Option<&str>,
    ) -> CoreResult<String> {
        let name = self.context.id(resource_name);
        let rendered = self.stack.resolve(&value);
        let mut properties = json!({
            "Name": name,
            "Type": "String",
            "Value": rendered,
        });
        if let Some(description) = description {
            properties["Description"] = json!(description);
        }
        self.stack
            .add_resource(construct_id, "AWS::SSM::Parameter", properties)?;

        let mut parameter = PublishedParameter::new(&name, value, self.stack.id());
        if let Some(description) = description {
            parameter = parameter.with_description(description);
        }
        self.store.put(parameter)?;
        debug!("Stack {} published {}", self.stack.name(), name);
        Ok(name)
    }

    /// Read back a parameter published earlier in this run.
    ///
    /// The returned token resolves at deploy time, so external updates to
    /// the parameter are picked up by the consuming stack.
    pub fn read_parameter(&mut self, resource_name: &str) -> CoreResult<Token> {
        let name = self.context.id(resource_name);
        let parameter = self
            .store
            .get(&name)
            .ok_or_else(|| CoreError::ParameterNotFound(name.clone()))?;
        self.stack.add_dependency(parameter.stack);
        Ok(Token::Parameter { name })
    }
}

impl Deref for StackScope<'_> {
    type Target = Stack;

    fn deref(&self) -> &Stack {
        self.stack
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut Stack {
        self.stack
    }
}

/// The root of a composition.
pub struct App {
    context: DeployContext,
    store: Box<dyn ParameterStore>,
    stacks: Vec<Stack>,
    names: BTreeSet<(String, String)>,
    log: SynthLog,
}

impl App {
    /// Create an app with an in-memory parameter store.
    pub fn new(context: DeployContext) -> Self {
        Self::with_store(context, Box::new(InMemoryParameterStore::new()))
    }

    pub fn with_store(context: DeployContext, store: Box<dyn ParameterStore>) -> Self {
        let log = SynthLog::new(context.run_id, &context.environment.name);
        Self {
            context,
            store,
            stacks: Vec::new(),
            names: BTreeSet::new(),
            log,
        }
    }

    pub fn context(&self) -> &DeployContext {
        &self.context
    }

    pub fn store(&self) -> &dyn ParameterStore {
        self.store.as_ref()
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Look up a constructed stack by its short name.
    pub fn stack_named(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name() == name)
    }

    pub fn log(&self) -> &SynthLog {
        &self.log
    }

    /// Construct the stack `name` (deployed as `{prefix}-{env}-{name}`).
    ///
    /// `build` declares the stack's resources and returns its output
    /// handles. On error the run is marked failed and every later call
    /// returns [`CoreError::Aborted`].
    pub fn stack<T, F>(&mut self, name: &str, build: F) -> CoreResult<T>
    where
        F: FnOnce(&mut StackScope<'_>) -> CoreResult<T>,
    {
        if let Some(failed) = self.log.failed_stack() {
            return Err(CoreError::Aborted(failed.to_string()));
        }

        let stack_id = self.context.id(name);
        if self.stacks.iter().any(|s| s.id() == stack_id) {
            return Err(CoreError::DuplicateStack(stack_id));
        }

        if self.log.started_at.is_none() {
            self.log.started_at = Some(Utc::now());
        }
        self.log.state = SynthState::Running;
        let index = self.log.stacks.len();
        self.log.stacks.push(StackLogEntry {
            name: name.to_string(),
            stack_id: stack_id.clone(),
            state: SynthState::Running,
            started_at: Utc::now(),
            completed_at: None,
            resources: 0,
            error: None,
        });

        info!("Constructing stack [{}]: {}", index + 1, stack_id);

        let mut stack = Stack::new(&stack_id, name);
        let result = {
            let mut scope = StackScope {
                stack: &mut stack,
                context: &self.context,
                store: self.store.as_mut(),
                names: &mut self.names,
            };
            build(&mut scope)
        };

        let entry = &mut self.log.stacks[index];
        entry.completed_at = Some(Utc::now());
        entry.resources = stack.resource_count();

        match result {
            Ok(outputs) => {
                entry.state = SynthState::Completed;
                info!("Stack '{}' declared {} resources", name, stack.resource_count());
                self.stacks.push(stack);
                Ok(outputs)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Stack '{}' failed: {}", name, message);
                entry.state = SynthState::Failed;
                entry.error = Some(message.clone());
                self.log.state = SynthState::Failed;
                self.log.error = Some(message);
                self.log.completed_at = Some(Utc::now());
                Err(CoreError::StackFailed {
                    stack: stack_id,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Add exports for every cross-stack reference.
    fn link(&mut self) -> CoreResult<()> {
        let imports: Vec<(usize, Token)> = self
            .stacks
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.imports().iter().cloned().map(move |t| (i, t)))
            .collect();

        for (consumer, token) in imports {
            let owner = token.owner().unwrap_or_default().to_string();
            let producer = self
                .stacks
                .iter()
                .position(|s| s.id() == owner)
                .ok_or_else(|| {
                    CoreError::InvalidReference(format!("unknown stack {owner} in {token}"))
                })?;
            if producer >= consumer {
                return Err(CoreError::InvalidReference(format!(
                    "{} references {} which is constructed later",
                    self.stacks[consumer].id(),
                    owner
                )));
            }
            self.stacks[producer].add_export(&token)?;
        }
        Ok(())
    }

    /// Synthesize every constructed stack without touching the filesystem.
    pub fn assemble(&mut self) -> CoreResult<Assembly> {
        if let Some(failed) = self.log.failed_stack() {
            return Err(CoreError::Aborted(failed.to_string()));
        }
        self.link()?;

        let parameters = ParameterManifest::from_store(self.context.namer(), self.store());
        let stacks = self
            .stacks
            .iter()
            .map(|s| StackManifest {
                id: s.id().to_string(),
                name: s.name().to_string(),
                template_file: format!("{}.template.json", s.id()),
                dependencies: s.dependencies().iter().cloned().collect(),
                parameters: parameters
                    .parameters
                    .iter()
                    .filter(|p| p.stack == s.id())
                    .map(|p| p.name.clone())
                    .collect(),
            })
            .collect();
        let templates = self
            .stacks
            .iter()
            .map(|s| (s.id().to_string(), s.template()))
            .collect();

        self.log.state = SynthState::Completed;
        self.log.completed_at = Some(Utc::now());

        Ok(Assembly {
            manifest: AssemblyManifest {
                version: env!("CARGO_PKG_VERSION").to_string(),
                run_id: self.context.run_id,
                environment: self.context.environment.clone(),
                synthesized_at: Utc::now(),
                stacks,
            },
            templates,
            parameters,
        })
    }

    /// Synthesize and write the cloud assembly into `out_dir`.
    pub fn synth(&mut self, out_dir: impl Into<PathBuf>) -> CoreResult<Assembly> {
        let out_dir = out_dir.into();
        let assembly = self.assemble()?;
        assembly.write(&out_dir)?;
        Ok(assembly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_config::{CommonProperties, PropertiesLoader};
    use tempfile::tempdir;

    fn context() -> DeployContext {
        let common = CommonProperties {
            product_prefix: "acme".to_string(),
            vpc_default_cidr: "10.0.0.0/16".to_string(),
            subnet_cidr_mask: 24,
            ecr_assume_role_expiration_min: 60,
            cd_user_arn: "arn:aws:iam::123456789012:user/cd".to_string(),
        };
        let env = PropertiesLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf"))
            .load_env("dev")
            .unwrap();
        DeployContext::new(
            DeployEnvironment::new("staging", "123456789012", "eu-west-1").unwrap(),
            common,
            env,
        )
    }

    #[test]
    fn test_stack_ids_use_naming_convention() {
        let mut app = App::new(context());
        app.stack("db", |_| Ok(())).unwrap();
        assert_eq!(app.stacks()[0].id(), "acme-staging-db");
    }

    #[test]
    fn test_publish_and_read_back() {
        let mut app = App::new(context());
        let bucket = app
            .stack("s3", |scope| {
                let bucket = scope.add_resource("data", "AWS::S3::Bucket", json!({}))?;
                scope.publish("ssm-data", "ssm-s3-data-bucket-name", bucket.ref_token(), None)?;
                Ok(bucket)
            })
            .unwrap();

        let token = app
            .stack("consumer", |scope| scope.read_parameter("ssm-s3-data-bucket-name"))
            .unwrap();

        assert_eq!(
            token,
            Token::Parameter {
                name: "acme-staging-ssm-s3-data-bucket-name".to_string()
            }
        );
        let published = app.store().get("acme-staging-ssm-s3-data-bucket-name").unwrap();
        assert_eq!(published.value, bucket.ref_token());
        assert_eq!(published.stack, "acme-staging-s3");
        assert!(app
            .stack_named("consumer")
            .unwrap()
            .dependencies()
            .contains("acme-staging-s3"));
    }

    #[test]
    fn test_read_missing_parameter_fails() {
        let mut app = App::new(context());
        let err = app
            .stack("consumer", |scope| scope.read_parameter("nothing"))
            .unwrap_err();
        assert!(matches!(err.root(), CoreError::ParameterNotFound(_)));
    }

    #[test]
    fn test_failure_aborts_later_stacks() {
        let mut app = App::new(context());
        let err = app
            .stack::<(), _>("foundation", |_| {
                Err(CoreError::InvalidReference("boom".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::StackFailed { .. }));

        let mut called = false;
        let err = app
            .stack("db", |_| {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(!called);
        assert!(matches!(err, CoreError::Aborted(ref s) if s == "foundation"));
        assert_eq!(app.log().attempted(), vec!["foundation"]);
        assert_eq!(app.log().state, SynthState::Failed);
        assert!(app.assemble().is_err());
    }

    #[test]
    fn test_cross_stack_reference_exports_and_writes() {
        let mut app = App::new(context());
        let vpc = app
            .stack("foundation", |scope| {
                scope.add_resource("vpc", "AWS::EC2::VPC", json!({}))
            })
            .unwrap();
        app.stack("db", |scope| {
            let v = scope.resolve(&vpc.ref_token());
            scope.add_resource("sg", "AWS::EC2::SecurityGroup", json!({ "VpcId": v }))
        })
        .unwrap();

        let dir = tempdir().unwrap();
        let assembly = app.synth(dir.path()).unwrap();

        let foundation = assembly.template("acme-staging-foundation").unwrap();
        assert_eq!(
            foundation["Outputs"]["ExportsOutputRefVpc"]["Export"]["Name"],
            json!("acme-staging-foundation:ExportsOutputRefVpc")
        );
        assert_eq!(
            assembly.manifest.stacks[1].dependencies,
            vec!["acme-staging-foundation".to_string()]
        );
        assert!(dir.path().join("acme-staging-db.template.json").exists());
        assert!(dir.path().join(ASSEMBLY_MANIFEST_FILE).exists());

        let manifest = AssemblyManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.stacks.len(), 2);
    }

    #[test]
    fn test_duplicate_physical_name() {
        let mut app = App::new(context());
        let err = app
            .stack("s3", |scope| {
                scope.claim_name("bucket", "acme-staging-data")?;
                scope.claim_name("bucket", "acme-staging-data")
            })
            .unwrap_err();
        assert!(matches!(err.root(), CoreError::DuplicatePhysicalName { .. }));
    }
}
