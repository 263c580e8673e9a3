//! Roles, policies and trust documents.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use provisio_core::{CoreResult, ResourceRef, Stack, StackScope, Token};

/// Version string of every policy document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Physical-name kind used when claiming role names.
const ROLE_KIND: &str = "iam-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// A single permission statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Token>,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn with_resource(mut self, resource: impl Into<Token>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn with_resources<I, T>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Any resource.
    pub fn on_all_resources(self) -> Self {
        self.with_resource("*")
    }

    fn to_json(&self, stack: &mut Stack) -> Value {
        let resources = match self.resources.as_slice() {
            [single] => stack.resolve(single),
            many => stack.resolve_all(many),
        };
        let actions = match self.actions.as_slice() {
            [single] => json!(single),
            many => json!(many),
        };
        json!({
            "Effect": self.effect.as_str(),
            "Action": actions,
            "Resource": resources,
        })
    }
}

/// Render a policy document from statements.
pub fn policy_document(stack: &mut Stack, statements: &[PolicyStatement]) -> Value {
    let statements: Vec<Value> = statements.iter().map(|s| s.to_json(stack)).collect();
    json!({ "Version": POLICY_VERSION, "Statement": statements })
}

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// A specific IAM user or role.
    Arn(Token),
    /// An AWS service, e.g. `ec2.amazonaws.com`.
    Service(String),
    /// Federated identities from an OIDC provider, with `StringEquals`
    /// conditions.
    WebIdentity { provider_arn: Token, conditions: Token },
}

impl Principal {
    pub fn arn(arn: impl Into<Token>) -> Self {
        Principal::Arn(arn.into())
    }

    pub fn service(service: impl Into<String>) -> Self {
        Principal::Service(service.into())
    }

    fn action(&self) -> &'static str {
        match self {
            Principal::WebIdentity { .. } => "sts:AssumeRoleWithWebIdentity",
            _ => "sts:AssumeRole",
        }
    }

    fn trust_statement(&self, stack: &mut Stack, external_ids: &[String]) -> Value {
        let mut statement = match self {
            Principal::Arn(arn) => json!({ "Principal": { "AWS": stack.resolve(arn) } }),
            Principal::Service(service) => json!({ "Principal": { "Service": service } }),
            Principal::WebIdentity {
                provider_arn,
                conditions,
            } => json!({
                "Principal": { "Federated": stack.resolve(provider_arn) },
                "Condition": { "StringEquals": stack.resolve(conditions) },
            }),
        };
        statement["Effect"] = json!(Effect::Allow.as_str());
        statement["Action"] = json!(self.action());
        if !external_ids.is_empty() {
            let ids = match external_ids {
                [single] => json!(single),
                many => json!(many),
            };
            statement["Condition"] = json!({ "StringEquals": { "sts:ExternalId": ids } });
        }
        statement
    }
}

/// ARN of an AWS managed policy.
pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{name}")
}

/// An IAM role to declare.
#[derive(Debug, Clone)]
pub struct Role {
    construct_id: String,
    assumed_by: Principal,
    role_name: Option<String>,
    description: Option<String>,
    max_session_minutes: Option<u32>,
    external_ids: Vec<String>,
    managed_policies: Vec<String>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn new(construct_id: impl Into<String>, assumed_by: Principal) -> Self {
        Self {
            construct_id: construct_id.into(),
            assumed_by,
            role_name: None,
            description: None,
            max_session_minutes: None,
            external_ids: Vec::new(),
            managed_policies: Vec::new(),
            statements: Vec::new(),
        }
    }

    /// Fixed physical name. Without one the deployment engine generates it.
    pub fn with_role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_session_minutes(mut self, minutes: u32) -> Self {
        self.max_session_minutes = Some(minutes);
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_ids.push(id.into());
        self
    }

    /// Attach an AWS managed policy by name.
    pub fn with_managed_policy(mut self, name: impl Into<String>) -> Self {
        self.managed_policies.push(name.into());
        self
    }

    /// Add a statement to the role's default policy.
    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<RoleRef> {
        if let Some(name) = &self.role_name {
            scope.claim_name(ROLE_KIND, name)?;
        }

        let trust = self
            .assumed_by
            .trust_statement(scope, &self.external_ids);
        let mut properties = json!({
            "AssumeRolePolicyDocument": {
                "Version": POLICY_VERSION,
                "Statement": [trust],
            },
        });
        if let Some(name) = &self.role_name {
            properties["RoleName"] = json!(name);
        }
        if let Some(description) = &self.description {
            properties["Description"] = json!(description);
        }
        if let Some(minutes) = self.max_session_minutes {
            properties["MaxSessionDuration"] = json!(minutes * 60);
        }
        if !self.managed_policies.is_empty() {
            let arns: Vec<String> = self
                .managed_policies
                .iter()
                .map(|name| managed_policy_arn(name))
                .collect();
            properties["ManagedPolicyArns"] = json!(arns);
        }

        let resource = scope.add_resource(&self.construct_id, "AWS::IAM::Role", properties)?;
        // a named role's ARN is known before deployment
        let arn = match &self.role_name {
            Some(name) => Token::literal(scope.context().role_arn(name)),
            None => resource.attr("Arn"),
        };
        let role = RoleRef {
            arn,
            name: resource.ref_token(),
            resource: Some(resource),
        };

        if !self.statements.is_empty() {
            Policy::new(format!("{}-default-policy", self.construct_id))
                .with_statements(self.statements)
                .attach_to_role(&role)
                .add(scope)?;
        }
        Ok(role)
    }
}

/// Handle to a declared or imported role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRef {
    pub resource: Option<ResourceRef>,
    pub arn: Token,
    pub name: Token,
}

impl RoleRef {
    /// Reference an existing role by ARN.
    pub fn from_arn(arn: impl Into<Token>) -> Self {
        let arn = arn.into();
        let name = Token::select(1, "/", arn.clone());
        Self {
            resource: None,
            arn,
            name,
        }
    }
}

/// A standalone policy attached to one or more roles.
#[derive(Debug, Clone)]
pub struct Policy {
    construct_id: String,
    policy_name: Option<String>,
    statements: Vec<PolicyStatement>,
    roles: Vec<Token>,
}

impl Policy {
    pub fn new(construct_id: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
            policy_name: None,
            statements: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub fn with_policy_name(mut self, name: impl Into<String>) -> Self {
        self.policy_name = Some(name.into());
        self
    }

    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn with_statements(mut self, statements: Vec<PolicyStatement>) -> Self {
        self.statements.extend(statements);
        self
    }

    pub fn attach_to_role(mut self, role: &RoleRef) -> Self {
        self.roles.push(role.name.clone());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let document = policy_document(scope, &self.statements);
        let roles = scope.resolve_all(&self.roles);
        let name = self
            .policy_name
            .unwrap_or_else(|| provisio_core::logical_id(&self.construct_id));
        scope.add_resource(
            &self.construct_id,
            "AWS::IAM::Policy",
            json!({
                "PolicyName": name,
                "PolicyDocument": document,
                "Roles": roles,
            }),
        )
    }
}

/// Trust policy allowing `principal_arn` to assume a role.
///
/// Rendered without a stack, for tools that update an existing role.
pub fn assume_role_trust_policy(principal_arns: &[String]) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": Effect::Allow.as_str(),
            "Principal": { "AWS": principal_arns },
            "Action": "sts:AssumeRole",
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;

    #[test]
    fn test_role_with_default_policy() {
        let mut app = app();
        app.stack("foundation", |scope| {
            Role::new("iam-cd-service-role", Principal::arn("arn:aws:iam::1:user/cd"))
                .with_role_name("nm-dev-cd-service-role")
                .with_external_id("github.com")
                .with_max_session_minutes(60)
                .with_statement(
                    PolicyStatement::allow()
                        .with_action("ecr:GetAuthorizationToken")
                        .on_all_resources(),
                )
                .add(scope)
        })
        .unwrap();

        let template = app.stacks()[0].template();
        let role = &template["Resources"]["IamCdServiceRole"]["Properties"];
        assert_eq!(role["RoleName"], json!("nm-dev-cd-service-role"));
        assert_eq!(role["MaxSessionDuration"], json!(3600));
        let trust = &role["AssumeRolePolicyDocument"]["Statement"][0];
        assert_eq!(trust["Principal"]["AWS"], json!("arn:aws:iam::1:user/cd"));
        assert_eq!(
            trust["Condition"]["StringEquals"]["sts:ExternalId"],
            json!("github.com")
        );

        let policy = &template["Resources"]["IamCdServiceRoleDefaultPolicy"]["Properties"];
        assert_eq!(policy["Roles"], json!([{ "Ref": "IamCdServiceRole" }]));
        assert_eq!(
            policy["PolicyDocument"]["Statement"][0]["Action"],
            json!("ecr:GetAuthorizationToken")
        );
        assert_eq!(policy["PolicyDocument"]["Statement"][0]["Resource"], json!("*"));
    }

    #[test]
    fn test_role_name_collision() {
        let mut app = app();
        let result = app.stack("foundation", |scope| {
            Role::new("a", Principal::service("ec2.amazonaws.com"))
                .with_role_name("nm-dev-x")
                .add(scope)?;
            Role::new("b", Principal::service("ec2.amazonaws.com"))
                .with_role_name("nm-dev-x")
                .add(scope)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_named_role_arn_is_literal() {
        let mut app = app();
        let (named, unnamed) = app
            .stack("foundation", |scope| {
                let named = Role::new("task", Principal::service("ecs-tasks.amazonaws.com"))
                    .with_role_name("nm-dev-backend-task-role")
                    .add(scope)?;
                let unnamed = Role::new("node", Principal::service("ec2.amazonaws.com")).add(scope)?;
                Ok((named, unnamed))
            })
            .unwrap();
        assert_eq!(
            named.arn.as_literal(),
            Some("arn:aws:iam::111122223333:role/nm-dev-backend-task-role")
        );
        assert!(unnamed.arn.as_literal().is_none());
    }

    #[test]
    fn test_imported_role_name() {
        let role = RoleRef::from_arn("arn:aws:iam::1:role/OrganizationAccountAccessRole");
        assert_eq!(role.name.as_literal(), Some("OrganizationAccountAccessRole"));
    }

    #[test]
    fn test_trust_policy_document() {
        let doc = assume_role_trust_policy(&["arn:aws:iam::1:role/task".to_string()]);
        assert_eq!(doc["Statement"][0]["Principal"]["AWS"][0], json!("arn:aws:iam::1:role/task"));
        assert_eq!(doc["Statement"][0]["Action"], json!("sts:AssumeRole"));
    }
}
