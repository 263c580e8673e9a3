//! Kubernetes clusters, managed node groups and identity mapping.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use provisio_core::{CoreError, CoreResult, ResourceRef, StackScope, Token};

use crate::ec2::{Peer, Port, SubnetType, VpcRef};
use crate::iam::{Principal, RoleRef};

/// Kubernetes version of new clusters.
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.21";

/// Group granting cluster-admin rights.
pub const SYSTEM_MASTERS: &str = "system:masters";

/// Thumbprint of the root CA behind the cluster OIDC issuers.
const OIDC_ROOT_CA_THUMBPRINT: &str = "9e99a48a9960b14926bb7f3b02e22da2b0ab7280";

/// Which networks may reach the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointAccess {
    Public,
    Private,
    #[default]
    PublicAndPrivate,
}

impl EndpointAccess {
    fn flags(&self) -> (bool, bool) {
        match self {
            EndpointAccess::Public => (true, false),
            EndpointAccess::Private => (false, true),
            EndpointAccess::PublicAndPrivate => (true, true),
        }
    }
}

/// A cluster control plane.
#[derive(Debug, Clone)]
pub struct Cluster {
    construct_id: String,
    vpc: VpcRef,
    subnet_type: SubnetType,
    version: String,
    role: Option<RoleRef>,
    endpoint_access: EndpointAccess,
    public_access_cidrs: Vec<String>,
}

impl Cluster {
    pub fn new(construct_id: impl Into<String>, vpc: &VpcRef) -> Self {
        Self {
            construct_id: construct_id.into(),
            vpc: vpc.clone(),
            subnet_type: SubnetType::Private,
            version: DEFAULT_KUBERNETES_VERSION.to_string(),
            role: None,
            endpoint_access: EndpointAccess::default(),
            public_access_cidrs: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_subnets(mut self, subnet_type: SubnetType) -> Self {
        self.subnet_type = subnet_type;
        self
    }

    pub fn with_role(mut self, role: &RoleRef) -> Self {
        self.role = Some(role.clone());
        self
    }

    pub fn with_endpoint_access(mut self, access: EndpointAccess) -> Self {
        self.endpoint_access = access;
        self
    }

    /// Restrict the public endpoint to these CIDR blocks.
    pub fn with_public_access_cidrs(mut self, cidrs: Vec<String>) -> Self {
        self.public_access_cidrs = cidrs;
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ClusterRef> {
        let role = self.role.as_ref().ok_or_else(|| {
            CoreError::InvalidReference(format!("cluster {} needs a role", self.construct_id))
        })?;
        let subnet_ids = scope.resolve_all(&self.vpc.subnet_ids(self.subnet_type));
        let (public, private) = self.endpoint_access.flags();

        let mut vpc_config = json!({
            "SubnetIds": subnet_ids,
            "EndpointPublicAccess": public,
            "EndpointPrivateAccess": private,
        });
        if !self.public_access_cidrs.is_empty() {
            vpc_config["PublicAccessCidrs"] = json!(self.public_access_cidrs);
        }

        let mut properties = json!({
            "Version": self.version,
            "ResourcesVpcConfig": vpc_config,
        });
        properties["RoleArn"] = scope.resolve(&role.arn);

        let resource = scope.add_resource(&self.construct_id, "AWS::EKS::Cluster", properties)?;
        if let Some(role_resource) = &role.resource {
            scope.add_depends_on(&resource, role_resource)?;
        }

        Ok(ClusterRef {
            name: resource.ref_token(),
            arn: resource.attr("Arn"),
            endpoint: resource.attr("Endpoint"),
            security_group_id: resource.attr("ClusterSecurityGroupId"),
            oidc_issuer_url: resource.attr("OpenIdConnectIssuerUrl"),
            private_subnets: self.vpc.subnet_ids(SubnetType::Private),
            resource,
        })
    }
}

/// Handle to a declared cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRef {
    pub resource: ResourceRef,
    pub name: Token,
    pub arn: Token,
    pub endpoint: Token,
    pub security_group_id: Token,
    pub oidc_issuer_url: Token,
    private_subnets: Vec<Token>,
}

impl ClusterRef {
    /// Allow traffic into the cluster security group.
    pub fn allow_from(
        &self,
        scope: &mut StackScope<'_>,
        construct_id: &str,
        peer: &Peer,
        port: Port,
        description: &str,
    ) -> CoreResult<ResourceRef> {
        crate::ec2::SecurityGroupRef::new(self.security_group_id.clone()).add_ingress_rule(
            scope,
            construct_id,
            peer,
            port,
            description,
        )
    }
}

/// Scheduling restriction applied to nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NO_SCHEDULE",
            TaintEffect::PreferNoSchedule => "PREFER_NO_SCHEDULE",
            TaintEffect::NoExecute => "NO_EXECUTE",
        }
    }
}

/// A managed node group.
#[derive(Debug, Clone)]
pub struct Nodegroup {
    construct_id: String,
    cluster: ClusterRef,
    node_role: RoleRef,
    name: Option<String>,
    instance_types: Vec<String>,
    min_size: u32,
    max_size: u32,
    labels: BTreeMap<String, String>,
    tags: BTreeMap<String, String>,
    taints: Vec<Taint>,
}

impl Nodegroup {
    pub fn new(construct_id: impl Into<String>, cluster: &ClusterRef, node_role: &RoleRef) -> Self {
        Self {
            construct_id: construct_id.into(),
            cluster: cluster.clone(),
            node_role: node_role.clone(),
            name: None,
            instance_types: Vec::new(),
            min_size: 1,
            max_size: 1,
            labels: BTreeMap::new(),
            tags: BTreeMap::new(),
            taints: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_types.push(instance_type.into());
        self
    }

    pub fn with_scaling(mut self, min_size: u32, max_size: u32) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        if self.min_size > self.max_size {
            return Err(CoreError::InvalidReference(format!(
                "node group {} has min_size {} above max_size {}",
                self.construct_id, self.min_size, self.max_size
            )));
        }
        let cluster_name = scope.resolve(&self.cluster.name);
        let node_role = scope.resolve(&self.node_role.arn);
        let subnets = scope.resolve_all(&self.cluster.private_subnets);

        let mut properties = json!({
            "ClusterName": cluster_name,
            "NodeRole": node_role,
            "Subnets": subnets,
            "InstanceTypes": self.instance_types,
            "ScalingConfig": {
                "MinSize": self.min_size,
                "DesiredSize": self.min_size,
                "MaxSize": self.max_size,
            },
            "AmiType": "AL2_x86_64",
            "ForceUpdateEnabled": true,
        });
        if let Some(name) = &self.name {
            scope.claim_name("eks-nodegroup", name)?;
            properties["NodegroupName"] = json!(name);
        }
        if !self.labels.is_empty() {
            properties["Labels"] = json!(self.labels);
        }
        if !self.tags.is_empty() {
            properties["Tags"] = json!(self.tags);
        }
        if !self.taints.is_empty() {
            let taints: Vec<Value> = self
                .taints
                .iter()
                .map(|t| json!({ "Key": t.key, "Value": t.value, "Effect": t.effect.as_str() }))
                .collect();
            properties["Taints"] = json!(taints);
        }

        scope.add_resource(&self.construct_id, "AWS::EKS::Nodegroup", properties)
    }
}

/// One entry of the `mapRoles` section of the `aws-auth` config map.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleMapping {
    pub role_arn: Token,
    pub username: Token,
    pub groups: Vec<String>,
}

/// Mapping of IAM roles to Kubernetes users and groups.
#[derive(Debug, Clone)]
pub struct AwsAuth {
    construct_id: String,
    cluster: ClusterRef,
    roles: Vec<RoleMapping>,
}

impl AwsAuth {
    pub fn new(construct_id: impl Into<String>, cluster: &ClusterRef) -> Self {
        Self {
            construct_id: construct_id.into(),
            cluster: cluster.clone(),
            roles: Vec::new(),
        }
    }

    /// Map a role to a username derived from the role ARN.
    pub fn add_role_mapping(mut self, role: &RoleRef, groups: &[&str]) -> Self {
        self.roles.push(RoleMapping {
            role_arn: role.arn.clone(),
            username: role.arn.clone(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        });
        self
    }

    /// Grant cluster-admin rights to a role.
    pub fn add_masters_role(self, role: &RoleRef) -> Self {
        self.add_role_mapping(role, &[SYSTEM_MASTERS])
    }

    /// Nodes of managed groups must be able to join the cluster.
    pub fn add_node_role(mut self, role: &RoleRef) -> Self {
        self.roles.push(RoleMapping {
            role_arn: role.arn.clone(),
            username: Token::literal("system:node:{{EC2PrivateDNSName}}"),
            groups: vec!["system:bootstrappers".to_string(), "system:nodes".to_string()],
        });
        self
    }

    pub fn mappings(&self) -> &[RoleMapping] {
        &self.roles
    }

    /// `mapRoles` rendered as an escaped JSON string with deploy-time values.
    fn map_roles(&self) -> Token {
        let mut parts = vec![Token::literal("[")];
        for (i, mapping) in self.roles.iter().enumerate() {
            if i > 0 {
                parts.push(Token::literal(","));
            }
            let groups = json!(mapping.groups).to_string().replace('"', "\\\"");
            parts.push(Token::literal("{\\\"rolearn\\\":\\\""));
            parts.push(mapping.role_arn.clone());
            parts.push(Token::literal("\\\",\\\"username\\\":\\\""));
            parts.push(mapping.username.clone());
            parts.push(Token::literal(format!("\\\",\\\"groups\\\":{groups}}}")));
        }
        parts.push(Token::literal("]"));
        Token::join("", parts)
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let manifest = Token::join(
            "",
            vec![
                Token::literal(
                    "[{\"apiVersion\":\"v1\",\"kind\":\"ConfigMap\",\"metadata\":{\"name\":\"aws-auth\",\"namespace\":\"kube-system\"},\"data\":{\"mapRoles\":\"",
                ),
                self.map_roles(),
                Token::literal("\"}}]"),
            ],
        );
        let cluster_name = scope.resolve(&self.cluster.name);
        let manifest = scope.resolve(&manifest);
        let resource = scope.add_resource(
            &self.construct_id,
            "Custom::AWSCDK-EKS-KubernetesResource",
            json!({
                "ClusterName": cluster_name,
                "Manifest": manifest,
                "Overwrite": true,
            }),
        )?;
        scope.add_depends_on(&resource, &self.cluster.resource)?;
        Ok(resource)
    }
}

/// OIDC identity provider of a cluster, for service-account roles.
#[derive(Debug, Clone)]
pub struct OpenIdConnectProvider {
    construct_id: String,
    issuer_url: Token,
}

impl OpenIdConnectProvider {
    pub fn for_cluster(construct_id: impl Into<String>, cluster: &ClusterRef) -> Self {
        Self {
            construct_id: construct_id.into(),
            issuer_url: cluster.oidc_issuer_url.clone(),
        }
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<OidcProviderRef> {
        let url = scope.resolve(&self.issuer_url);
        let resource = scope.add_resource(
            &self.construct_id,
            "AWS::IAM::OIDCProvider",
            json!({
                "Url": url,
                "ClientIdList": ["sts.amazonaws.com"],
                "ThumbprintList": [OIDC_ROOT_CA_THUMBPRINT],
            }),
        )?;
        Ok(OidcProviderRef {
            arn: resource.ref_token(),
            issuer: Token::select(1, "//", self.issuer_url),
        })
    }
}

/// Handle to an OIDC provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcProviderRef {
    pub arn: Token,
    /// Issuer host and path, without the scheme
    pub issuer: Token,
}

impl OidcProviderRef {
    /// Principal for pods running as `service_account` in `namespace`.
    ///
    /// Condition keys embed the issuer, which is only known at deploy time,
    /// so the condition document is declared as a JSON value resource in
    /// the scope's stack.
    pub fn service_account_principal(
        &self,
        scope: &mut StackScope<'_>,
        construct_id: &str,
        namespace: &str,
        service_account: &str,
    ) -> CoreResult<Principal> {
        let document = Token::join(
            "",
            vec![
                Token::literal("{\""),
                self.issuer.clone(),
                Token::literal(format!(
                    ":sub\":\"system:serviceaccount:{namespace}:{service_account}\",\""
                )),
                self.issuer.clone(),
                Token::literal(":aud\":\"sts.amazonaws.com\"}"),
            ],
        );
        let value = scope.resolve(&document);
        let json_value = scope.add_resource(construct_id, "Custom::AWSCDKCfnJson", json!({ "Value": value }))?;
        Ok(Principal::WebIdentity {
            provider_arn: self.arn.clone(),
            conditions: json_value.attr("Value"),
        })
    }
}

/// Account hosting the load balancer controller image, per region.
fn alb_controller_image_account(region: &str) -> Option<&'static str> {
    let account = match region {
        "me-south-1" => "558608220178",
        "eu-south-1" => "590381155156",
        "ap-northeast-1" | "ap-northeast-2" | "ap-south-1" | "ap-southeast-1"
        | "ap-southeast-2" | "ca-central-1" | "eu-central-1" | "eu-north-1" | "eu-west-1"
        | "eu-west-2" | "eu-west-3" | "sa-east-1" | "us-east-1" | "us-east-2" | "us-west-1"
        | "us-west-2" => "602401143452",
        "ap-east-1" => "800184023465",
        "af-south-1" => "877085696533",
        "cn-north-1" => "918309763551",
        "cn-northwest-1" => "961992271922",
        _ => return None,
    };
    Some(account)
}

/// Image repository of the AWS load balancer controller for `region`.
pub fn alb_controller_repo(region: &str) -> CoreResult<String> {
    let account = alb_controller_image_account(region)
        .ok_or_else(|| CoreError::UnsupportedRegion(region.to_string()))?;
    Ok(format!(
        "{account}.dkr.ecr.{region}.amazonaws.com/amazon/aws-load-balancer-controller"
    ))
}
