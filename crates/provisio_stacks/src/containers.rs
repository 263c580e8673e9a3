//! Container image selection.
//!
//! Every task definition serves one [`ContainerRole`]. A container pulls
//! the image of its role's repository unless its definition names another
//! source through the `image` field.

use std::collections::BTreeMap;

use provisio_config::{FargateContainerDef, ImageRef};
use provisio_constructs::{ContainerDefinition, LogGroupRef, PortMapping, RepositoryRef};
use provisio_core::{CoreError, CoreResult, DeployContext, Token};

/// Tag deployed by default.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// What a task definition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    Backend,
    Frontend,
    Doc,
}

impl ContainerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRole::Backend => "backend",
            ContainerRole::Frontend => "frontend",
            ContainerRole::Doc => "doc",
        }
    }

    /// Repository holding this role's images.
    pub fn repository(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Repositories of a deployment, by short name (`backend`, `pg-local`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repositories {
    by_name: BTreeMap<String, RepositoryRef>,
}

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, repository: RepositoryRef) {
        self.by_name.insert(name.into(), repository);
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryRef> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Resolves image references against the deployment's repositories.
#[derive(Debug, Clone)]
pub struct ImageSource<'a> {
    repositories: &'a Repositories,
    context: &'a DeployContext,
    tag: String,
}

impl<'a> ImageSource<'a> {
    pub fn new(repositories: &'a Repositories, context: &'a DeployContext) -> Self {
        Self {
            repositories,
            context,
            tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Image for a container of `role` with an optional explicit source.
    pub fn image(&self, role: ContainerRole, source: Option<&ImageRef>) -> CoreResult<Token> {
        let repository = match source {
            None => self.lookup(role.repository())?,
            Some(ImageRef::Repository(name)) => self.lookup(name)?,
            Some(ImageRef::External(name)) => {
                return Ok(RepositoryRef::from_name(self.context, name).image(&self.tag));
            }
        };
        Ok(repository.image(&self.tag))
    }

    fn lookup(&self, name: &str) -> CoreResult<&RepositoryRef> {
        self.repositories.get(name).ok_or_else(|| {
            CoreError::InvalidReference(format!("no repository named '{name}' in this deployment"))
        })
    }

    /// Container definition for a configured container.
    pub fn container(
        &self,
        role: ContainerRole,
        def: &FargateContainerDef,
        log_group: &LogGroupRef,
    ) -> CoreResult<ContainerDefinition> {
        let mut container = ContainerDefinition::new(&def.name, self.image(role, def.image.as_ref())?);
        container.essential = def.essential;
        container.memory_limit_mib = def.memory_limit_mib;
        container.memory_reservation_mib = def.memory_reservation_mib;
        container.cpu = def.cpu;
        container.command = def.command.clone();
        if let Some(port) = def.port {
            container.port_mappings.push(PortMapping {
                container_port: port,
                host_port: def.expose_port,
                protocol: def.protocol,
            });
        }
        container.ulimits.extend(def.ulimits.clone());
        container.log_group = Some(log_group.clone());
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    fn repositories(context: &DeployContext) -> Repositories {
        let mut repositories = Repositories::new();
        for name in ["backend", "frontend", "doc"] {
            repositories.insert(name, RepositoryRef::from_name(context, &context.id(name)));
        }
        repositories
    }

    #[test]
    fn test_role_repository_is_default() {
        let context = context();
        let repositories = repositories(&context);
        let source = ImageSource::new(&repositories, &context);

        let image = source.image(ContainerRole::Frontend, None).unwrap();
        assert_eq!(
            image.as_literal(),
            Some("111122223333.dkr.ecr.us-east-1.amazonaws.com/nm-dev-frontend:latest")
        );
    }

    #[test]
    fn test_explicit_sources() {
        let context = context();
        let repositories = repositories(&context);
        let source = ImageSource::new(&repositories, &context).with_tag("v2");

        let external = ImageRef::External("redis".to_string());
        assert_eq!(
            source.image(ContainerRole::Backend, Some(&external)).unwrap().as_literal(),
            Some("111122223333.dkr.ecr.us-east-1.amazonaws.com/redis:v2")
        );

        let doc = ImageRef::Repository("doc".to_string());
        assert!(source
            .image(ContainerRole::Backend, Some(&doc))
            .unwrap()
            .as_literal()
            .unwrap()
            .ends_with("nm-dev-doc:v2"));

        let missing = ImageRef::Repository("pg-local".to_string());
        assert!(matches!(
            source.image(ContainerRole::Backend, Some(&missing)),
            Err(CoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_container_from_config() {
        let context = context();
        let repositories = repositories(&context);
        let source = ImageSource::new(&repositories, &context);
        let log_group = LogGroupRef {
            name: Token::literal("nm-dev-fargate-backend-server"),
            arn: Token::literal("arn:aws:logs:us-east-1:111122223333:log-group:x"),
        };

        let defs = &context.env.backend_task_def.container_def_l;
        let worker = defs.iter().find(|d| d.name == "worker").unwrap();
        let container = source
            .container(ContainerRole::Backend, worker, &log_group)
            .unwrap();
        assert!(!container.essential);
        assert!(container.port_mappings.is_empty());
        assert_eq!(container.ulimits[0].name, "nofile");

        let api = defs.iter().find(|d| d.name == "api").unwrap();
        let container = source.container(ContainerRole::Backend, api, &log_group).unwrap();
        assert_eq!(container.container_port(), Some(8000));
    }
}
