//! Container image repositories.

use serde_json::json;

use provisio_core::{CoreResult, DeletionPolicy, DeployContext, StackScope, Token};

const REPOSITORY_KIND: &str = "ecr-repository";

/// A repository to declare.
#[derive(Debug, Clone)]
pub struct Repository {
    construct_id: String,
    name: Option<String>,
}

impl Repository {
    pub fn new(construct_id: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<RepositoryRef> {
        let mut properties = json!({});
        if let Some(name) = &self.name {
            scope.claim_name(REPOSITORY_KIND, name)?;
            properties["RepositoryName"] = json!(name);
        }
        let resource = scope.add_resource(&self.construct_id, "AWS::ECR::Repository", properties)?;
        scope.set_deletion_policy(&resource, DeletionPolicy::Retain)?;
        Ok(RepositoryRef {
            name: resource.ref_token(),
            arn: resource.attr("Arn"),
            uri: resource.attr("RepositoryUri"),
        })
    }
}

/// Handle to a declared or existing repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRef {
    pub name: Token,
    pub arn: Token,
    pub uri: Token,
}

impl RepositoryRef {
    /// Reference a repository that exists outside this deployment.
    pub fn from_name(context: &DeployContext, name: &str) -> Self {
        Self {
            name: Token::literal(name),
            arn: Token::literal(context.regional_arn("ecr", &format!("repository/{name}"))),
            uri: Token::literal(format!(
                "{}.dkr.ecr.{}.amazonaws.com/{}",
                context.account(),
                context.region(),
                name
            )),
        }
    }

    /// Image reference for a tag.
    pub fn image(&self, tag: &str) -> Token {
        Token::join(":", vec![self.uri.clone(), Token::literal(tag)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app, context};

    #[test]
    fn test_repository_is_retained() {
        let mut app = app();
        let repo = app
            .stack("foundation", |scope| {
                Repository::new("ecr-backend-repo")
                    .with_name("nm-dev-backend")
                    .add(scope)
            })
            .unwrap();

        let resource = app.stacks()[0].resource("EcrBackendRepo").unwrap();
        assert_eq!(resource.property("RepositoryName"), Some(&json!("nm-dev-backend")));
        assert_eq!(resource.deletion_policy, Some(DeletionPolicy::Retain));
        assert!(!repo.image("latest").is_resolved());
    }

    #[test]
    fn test_imported_repository() {
        let redis = RepositoryRef::from_name(&context(), "redis");
        assert_eq!(
            redis.image("latest").as_literal(),
            Some("111122223333.dkr.ecr.us-east-1.amazonaws.com/redis:latest")
        );
        assert_eq!(
            redis.arn.as_literal(),
            Some("arn:aws:ecr:us-east-1:111122223333:repository/redis")
        );
    }
}
