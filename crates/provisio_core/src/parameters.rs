//! Parameter store used to publish resource identifiers across stacks.
//!
//! Stacks publish selected identifiers (ARNs, endpoints, names) under
//! names produced by [`crate::naming`]. Downstream stacks and external
//! tooling read them back by name. Within one run, a name is written once.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::naming::ResourceNamer;
use crate::token::Token;

/// A parameter published by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedParameter {
    /// Parameter name
    pub name: String,
    /// Published value
    pub value: Token,
    /// Id of the stack that owns the parameter
    pub stack: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PublishedParameter {
    pub fn new(name: impl Into<String>, value: Token, stack: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            stack: stack.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Key/value store for published parameters.
pub trait ParameterStore {
    /// Publish a parameter. Fails if the name was already published.
    fn put(&mut self, parameter: PublishedParameter) -> CoreResult<()>;

    /// Look up a parameter by name.
    fn get(&self, name: &str) -> Option<PublishedParameter>;

    /// All parameters, ordered by name.
    fn list(&self) -> Vec<PublishedParameter>;
}

/// Process-local parameter store scoped to one run.
#[derive(Debug, Default, Clone)]
pub struct InMemoryParameterStore {
    parameters: BTreeMap<String, PublishedParameter>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

}

impl ParameterStore for InMemoryParameterStore {
    fn put(&mut self, parameter: PublishedParameter) -> CoreResult<()> {
        if self.parameters.contains_key(&parameter.name) {
            return Err(CoreError::ParameterAlreadyPublished(parameter.name));
        }
        debug!("Publishing parameter {} from {}", parameter.name, parameter.stack);
        self.parameters.insert(parameter.name.clone(), parameter);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<PublishedParameter> {
        self.parameters.get(name).cloned()
    }

    fn list(&self) -> Vec<PublishedParameter> {
        self.parameters.values().cloned().collect()
    }
}

/// File name of the parameter manifest inside an assembly directory.
pub const PARAMETER_MANIFEST_FILE: &str = "parameters.json";

/// Serialized snapshot of a parameter store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterManifest {
    pub prefix: String,
    pub environment: String,
    pub parameters: Vec<PublishedParameter>,
}

impl ParameterManifest {
    pub fn from_store(namer: &ResourceNamer, store: &dyn ParameterStore) -> Self {
        Self {
            prefix: namer.prefix().to_string(),
            environment: namer.environment().to_string(),
            parameters: store.list(),
        }
    }

    pub fn namer(&self) -> ResourceNamer {
        ResourceNamer::new(self.prefix.clone(), self.environment.clone())
    }

    pub fn find(&self, name: &str) -> Option<&PublishedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameter published for `resource_name` in this manifest's environment.
    pub fn lookup(&self, resource_name: &str) -> Option<&PublishedParameter> {
        self.find(&self.namer().name(resource_name))
    }

    /// Load the manifest from an assembly directory.
    ///
    /// Fails if a parameter is not named after the manifest's prefix and
    /// environment.
    pub fn load(assembly_dir: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(assembly_dir.join(PARAMETER_MANIFEST_FILE))?;
        let manifest: Self = serde_json::from_str(&content)?;
        let namer = manifest.namer();
        if let Some(foreign) = manifest.parameters.iter().find(|p| !namer.owns(&p.name)) {
            return Err(CoreError::InvalidReference(format!(
                "parameter {} does not match {}",
                foreign.name,
                namer.wildcard()
            )));
        }
        Ok(manifest)
    }

    /// Save the manifest into an assembly directory.
    pub fn save(&self, assembly_dir: &Path) -> CoreResult<()> {
        fs::create_dir_all(assembly_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(assembly_dir.join(PARAMETER_MANIFEST_FILE), json)?;
        Ok(())
    }
}
