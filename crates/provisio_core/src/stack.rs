//! Stacks: named groups of resource declarations and their templates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::token::{logical_id, Token};

/// Template format version written into every template.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// What happens to a resource when it leaves the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

impl DeletionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::Delete => "Delete",
            DeletionPolicy::Retain => "Retain",
            DeletionPolicy::Snapshot => "Snapshot",
        }
    }
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub properties: Value,
    pub depends_on: BTreeSet<String>,
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("Type".to_string(), json!(self.resource_type));
        if !self.properties.is_null() {
            body.insert("Properties".to_string(), self.properties.clone());
        }
        if !self.depends_on.is_empty() {
            body.insert("DependsOn".to_string(), json!(self.depends_on));
        }
        if let Some(policy) = self.deletion_policy {
            body.insert("DeletionPolicy".to_string(), json!(policy.as_str()));
            body.insert("UpdateReplacePolicy".to_string(), json!(policy.as_str()));
        }
        Value::Object(body)
    }

    /// Property value at a top-level key.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Handle to a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub stack: String,
    pub logical_id: String,
}

impl ResourceRef {
    /// The resource's primary reference.
    pub fn ref_token(&self) -> Token {
        Token::Ref {
            stack: self.stack.clone(),
            logical_id: self.logical_id.clone(),
        }
    }

    /// A named attribute of the resource.
    pub fn attr(&self, attribute: &str) -> Token {
        Token::Attr {
            stack: self.stack.clone(),
            logical_id: self.logical_id.clone(),
            attribute: attribute.to_string(),
        }
    }
}

/// A stack under construction.
#[derive(Debug, Clone)]
pub struct Stack {
    id: String,
    name: String,
    description: Option<String>,
    resources: BTreeMap<String, Resource>,
    parameters: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    imports: BTreeSet<Token>,
    dependencies: BTreeSet<String>,
}

impl Stack {
    /// Create a stack. `id` is the deployed stack name, `name` the short
    /// logical name used in logs (e.g. `foundation`).
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            resources: BTreeMap::new(),
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
            imports: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// Declare a resource under a construct id unique within the stack.
    pub fn add_resource(
        &mut self,
        construct_id: &str,
        resource_type: &str,
        properties: Value,
    ) -> CoreResult<ResourceRef> {
        let logical = logical_id(construct_id);
        if logical.is_empty() || self.resources.contains_key(&logical) {
            return Err(CoreError::DuplicateConstruct {
                stack: self.id.clone(),
                id: construct_id.to_string(),
            });
        }
        self.resources.insert(
            logical.clone(),
            Resource {
                resource_type: resource_type.to_string(),
                properties,
                depends_on: BTreeSet::new(),
                deletion_policy: None,
            },
        );
        Ok(ResourceRef {
            stack: self.id.clone(),
            logical_id: logical,
        })
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    /// Resources of a given type, in logical-id order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn set_deletion_policy(
        &mut self,
        target: &ResourceRef,
        policy: DeletionPolicy,
    ) -> CoreResult<()> {
        let resource = self.local_resource_mut(target)?;
        resource.deletion_policy = Some(policy);
        Ok(())
    }

    /// Make `target` wait for `on`. A resource in another stack turns into
    /// a dependency between the two stacks.
    pub fn add_depends_on(&mut self, target: &ResourceRef, on: &ResourceRef) -> CoreResult<()> {
        if on.stack != self.id {
            self.dependencies.insert(on.stack.clone());
            return Ok(());
        }
        if !self.resources.contains_key(&on.logical_id) {
            return Err(CoreError::InvalidReference(format!(
                "{} does not declare {}",
                self.id, on.logical_id
            )));
        }
        let resource = self.local_resource_mut(target)?;
        resource.depends_on.insert(on.logical_id.clone());
        Ok(())
    }

    fn local_resource_mut(&mut self, target: &ResourceRef) -> CoreResult<&mut Resource> {
        if target.stack != self.id {
            return Err(CoreError::InvalidReference(format!(
                "{}.{} is not part of {}",
                target.stack, target.logical_id, self.id
            )));
        }
        let id = self.id.clone();
        self.resources.get_mut(&target.logical_id).ok_or_else(|| {
            CoreError::InvalidReference(format!("{} does not declare {}", id, target.logical_id))
        })
    }

    pub fn add_dependency(&mut self, stack_id: impl Into<String>) {
        let stack_id = stack_id.into();
        if stack_id != self.id {
            self.dependencies.insert(stack_id);
        }
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Tokens owned by other stacks that this stack consumes.
    pub fn imports(&self) -> &BTreeSet<Token> {
        &self.imports
    }

    /// Render a token into a template value from this stack's point of view.
    pub fn resolve(&mut self, token: &Token) -> Value {
        match token {
            Token::Literal { value } => json!(value),
            Token::Ref { stack, logical_id } if *stack == self.id => json!({ "Ref": logical_id }),
            Token::Attr {
                stack,
                logical_id,
                attribute,
            } if *stack == self.id => json!({ "Fn::GetAtt": [logical_id, attribute] }),
            Token::Ref { stack, .. } | Token::Attr { stack, .. } => {
                self.dependencies.insert(stack.clone());
                self.imports.insert(token.clone());
                json!({ "Fn::ImportValue": token.export_name() })
            }
            Token::Parameter { name } => {
                let key = format!("SsmParameterValue{}", logical_id(name));
                self.parameters.entry(key.clone()).or_insert_with(|| {
                    json!({
                        "Type": "AWS::SSM::Parameter::Value<String>",
                        "Default": name,
                    })
                });
                json!({ "Ref": key })
            }
            Token::Join { separator, parts } => {
                let rendered: Vec<Value> = parts.iter().map(|p| self.resolve(p)).collect();
                json!({ "Fn::Join": [separator, rendered] })
            }
            Token::Select {
                index,
                separator,
                source,
            } => {
                let rendered = self.resolve(source);
                json!({ "Fn::Select": [index, { "Fn::Split": [separator, rendered] }] })
            }
        }
    }

    /// Declare a template parameter and return a reference to it.
    pub fn add_parameter(&mut self, key: &str, definition: Value) -> Value {
        self.parameters.insert(key.to_string(), definition);
        json!({ "Ref": key })
    }

    /// Render a list of tokens.
    pub fn resolve_all(&mut self, tokens: &[Token]) -> Value {
        Value::Array(tokens.iter().map(|t| self.resolve(t)).collect())
    }

    /// Declare a template output, optionally exported under `export`.
    pub fn add_output(&mut self, key: &str, token: &Token, export: Option<String>) {
        let value = self.resolve(token);
        let mut body = Map::new();
        body.insert("Value".to_string(), value);
        if let Some(name) = export {
            body.insert("Export".to_string(), json!({ "Name": name }));
        }
        self.outputs.insert(key.to_string(), Value::Object(body));
    }

    /// Export a token this stack owns so another stack can import it.
    pub fn add_export(&mut self, token: &Token) -> CoreResult<()> {
        match (token.owner(), token.output_key()) {
            (Some(owner), Some(key)) if owner == self.id => {
                if !self.outputs.contains_key(&key) {
                    self.add_output(&key, token, token.export_name());
                }
                Ok(())
            }
            _ => Err(CoreError::InvalidReference(format!(
                "{} cannot export {}",
                self.id, token
            ))),
        }
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    /// The synthesized template.
    pub fn template(&self) -> Value {
        let mut template = Map::new();
        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            json!(TEMPLATE_FORMAT_VERSION),
        );
        if let Some(description) = &self.description {
            template.insert("Description".to_string(), json!(description));
        }
        if !self.parameters.is_empty() {
            template.insert("Parameters".to_string(), json!(self.parameters));
        }
        let resources: Map<String, Value> = self
            .resources
            .iter()
            .map(|(id, r)| (id.clone(), r.to_json()))
            .collect();
        template.insert("Resources".to_string(), Value::Object(resources));
        if !self.outputs.is_empty() {
            template.insert("Outputs".to_string(), json!(self.outputs));
        }
        Value::Object(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_construct_rejected() {
        let mut stack = Stack::new("nm-dev-s3", "s3");
        stack.add_resource("data", "AWS::S3::Bucket", json!({})).unwrap();
        let err = stack
            .add_resource("data", "AWS::S3::Bucket", json!({}))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateConstruct { .. }));
    }

    #[test]
    fn test_resolve_local_and_foreign_tokens() {
        let mut stack = Stack::new("nm-dev-db", "db");
        let local = stack.add_resource("api-pg", "AWS::RDS::DBInstance", json!({})).unwrap();

        assert_eq!(stack.resolve(&local.ref_token()), json!({ "Ref": "ApiPg" }));
        assert_eq!(
            stack.resolve(&local.attr("Endpoint.Address")),
            json!({ "Fn::GetAtt": ["ApiPg", "Endpoint.Address"] })
        );
        assert!(stack.imports().is_empty());

        let foreign = Token::Ref {
            stack: "nm-dev-foundation".to_string(),
            logical_id: "Vpc".to_string(),
        };
        assert_eq!(
            stack.resolve(&foreign),
            json!({ "Fn::ImportValue": "nm-dev-foundation:ExportsOutputRefVpc" })
        );
        assert!(stack.imports().contains(&foreign));
        assert!(stack.dependencies().contains("nm-dev-foundation"));
    }

    #[test]
    fn test_parameter_token_adds_template_parameter() {
        let mut stack = Stack::new("nm-dev-eks-service", "eks-service");
        let value = stack.resolve(&Token::Parameter {
            name: "nm-dev-ssm-iam-cd-role-arn".to_string(),
        });
        assert_eq!(value, json!({ "Ref": "SsmParameterValueNmDevSsmIamCdRoleArn" }));

        let template = stack.template();
        assert_eq!(
            template["Parameters"]["SsmParameterValueNmDevSsmIamCdRoleArn"]["Default"],
            json!("nm-dev-ssm-iam-cd-role-arn")
        );
    }

    #[test]
    fn test_depends_on_and_deletion_policy() {
        let mut stack = Stack::new("s", "s");
        let a = stack.add_resource("a", "T", json!({})).unwrap();
        let b = stack.add_resource("b", "T", json!({})).unwrap();
        stack.add_depends_on(&b, &a).unwrap();
        stack.set_deletion_policy(&a, DeletionPolicy::Delete).unwrap();

        let template = stack.template();
        assert_eq!(template["Resources"]["B"]["DependsOn"], json!(["A"]));
        assert_eq!(template["Resources"]["A"]["DeletionPolicy"], json!("Delete"));
    }

    #[test]
    fn test_export_only_own_tokens() {
        let mut stack = Stack::new("s", "s");
        let a = stack.add_resource("a", "T", json!({})).unwrap();
        stack.add_export(&a.ref_token()).unwrap();
        assert!(stack.outputs().contains_key("ExportsOutputRefA"));

        let other = Token::Ref {
            stack: "t".to_string(),
            logical_id: "A".to_string(),
        };
        assert!(stack.add_export(&other).is_err());
    }
}
