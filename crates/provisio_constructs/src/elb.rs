//! Application load balancers, listeners and target groups.

use serde_json::{json, Value};

use provisio_core::{CoreResult, ResourceRef, StackScope, Token};

use crate::ec2::{SecurityGroupRef, SubnetType, VpcRef};
use crate::route53::AliasTarget;
use crate::s3::BucketRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationProtocol {
    Http,
    Https,
}

impl ApplicationProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationProtocol::Http => "HTTP",
            ApplicationProtocol::Https => "HTTPS",
        }
    }
}

/// An application load balancer.
#[derive(Debug, Clone)]
pub struct ApplicationLoadBalancer {
    construct_id: String,
    vpc: VpcRef,
    internet_facing: bool,
    security_group: Option<SecurityGroupRef>,
    access_logs: Option<BucketRef>,
}

impl ApplicationLoadBalancer {
    pub fn new(construct_id: impl Into<String>, vpc: &VpcRef) -> Self {
        Self {
            construct_id: construct_id.into(),
            vpc: vpc.clone(),
            internet_facing: false,
            security_group: None,
            access_logs: None,
        }
    }

    /// Place the load balancer in public subnets with a public address.
    pub fn internet_facing(mut self) -> Self {
        self.internet_facing = true;
        self
    }

    pub fn with_security_group(mut self, group: &SecurityGroupRef) -> Self {
        self.security_group = Some(group.clone());
        self
    }

    /// Write access logs to `bucket`.
    pub fn with_access_logs(mut self, bucket: &BucketRef) -> Self {
        self.access_logs = Some(bucket.clone());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<LoadBalancerRef> {
        let subnet_type = if self.internet_facing {
            SubnetType::Public
        } else {
            SubnetType::Private
        };
        let subnets = scope.resolve_all(&self.vpc.subnet_ids(subnet_type));
        let scheme = if self.internet_facing {
            "internet-facing"
        } else {
            "internal"
        };

        let mut properties = json!({
            "Type": "application",
            "Scheme": scheme,
            "Subnets": subnets,
        });
        if let Some(group) = &self.security_group {
            properties["SecurityGroups"] = json!([scope.resolve(&group.id)]);
        }

        let mut bucket_policy = None;
        if let Some(bucket) = &self.access_logs {
            bucket_policy = Some(bucket.allow_access_log_delivery(scope)?);
            let bucket_name = scope.resolve(&bucket.name);
            properties["LoadBalancerAttributes"] = json!([
                { "Key": "deletion_protection.enabled", "Value": "false" },
                { "Key": "access_logs.s3.enabled", "Value": "true" },
                { "Key": "access_logs.s3.bucket", "Value": bucket_name },
            ]);
        }

        let resource = scope.add_resource(
            &self.construct_id,
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
            properties,
        )?;
        // Log delivery is checked when the attribute is set.
        if let Some(bucket_policy) = &bucket_policy {
            scope.add_depends_on(&resource, bucket_policy)?;
        }

        Ok(LoadBalancerRef {
            arn: resource.ref_token(),
            dns_name: resource.attr("DNSName"),
            canonical_hosted_zone_id: resource.attr("CanonicalHostedZoneID"),
            vpc: self.vpc,
            resource,
        })
    }
}

/// Handle to a declared load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerRef {
    pub resource: ResourceRef,
    pub arn: Token,
    pub dns_name: Token,
    pub canonical_hosted_zone_id: Token,
    vpc: VpcRef,
}

impl LoadBalancerRef {
    /// Alias record target pointing at this load balancer.
    pub fn alias_target(&self) -> AliasTarget {
        AliasTarget {
            dns_name: Token::join("", vec![Token::literal("dualstack."), self.dns_name.clone()]),
            hosted_zone_id: self.canonical_hosted_zone_id.clone(),
        }
    }

    pub fn vpc(&self) -> &VpcRef {
        &self.vpc
    }
}

/// Health check of a target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
}

impl HealthCheck {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            interval_seconds: 60,
            timeout_seconds: 5,
        }
    }
}

/// Targets addressed by IP, as used by tasks in awsvpc mode.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    construct_id: String,
    vpc_id: Token,
    port: u16,
    protocol: ApplicationProtocol,
    health_check: Option<HealthCheck>,
}

impl TargetGroup {
    pub fn new(construct_id: impl Into<String>, vpc: &VpcRef, port: u16) -> Self {
        Self {
            construct_id: construct_id.into(),
            vpc_id: vpc.id.clone(),
            port,
            protocol: ApplicationProtocol::Http,
            health_check: None,
        }
    }

    pub fn with_protocol(mut self, protocol: ApplicationProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<TargetGroupRef> {
        let vpc_id = scope.resolve(&self.vpc_id);
        let mut properties = json!({
            "Port": self.port,
            "Protocol": self.protocol.as_str(),
            "TargetType": "ip",
            "VpcId": vpc_id,
        });
        if let Some(check) = &self.health_check {
            properties["HealthCheckPath"] = json!(check.path);
            properties["HealthCheckIntervalSeconds"] = json!(check.interval_seconds);
            properties["HealthCheckTimeoutSeconds"] = json!(check.timeout_seconds);
        }
        let resource = scope.add_resource(
            &self.construct_id,
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            properties,
        )?;
        Ok(TargetGroupRef {
            arn: resource.ref_token(),
            port: self.port,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroupRef {
    pub arn: Token,
    pub port: u16,
}

/// What a listener does with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerAction {
    Forward(TargetGroupRef),
    /// Permanent redirect to HTTPS on 443, keeping host, path and query.
    RedirectToHttps,
}

impl ListenerAction {
    fn render(&self, scope: &mut StackScope<'_>) -> Value {
        match self {
            ListenerAction::Forward(group) => json!({
                "Type": "forward",
                "TargetGroupArn": scope.resolve(&group.arn),
            }),
            ListenerAction::RedirectToHttps => json!({
                "Type": "redirect",
                "Order": 1,
                "RedirectConfig": {
                    "Protocol": "HTTPS",
                    "Port": "443",
                    "Host": "#{host}",
                    "Path": "/#{path}",
                    "Query": "#{query}",
                    "StatusCode": "HTTP_301",
                },
            }),
        }
    }
}

/// A listener on a load balancer port.
#[derive(Debug, Clone)]
pub struct Listener {
    construct_id: String,
    load_balancer: Token,
    port: u16,
    protocol: ApplicationProtocol,
    certificates: Vec<Token>,
    action: ListenerAction,
}

impl Listener {
    pub fn https(
        construct_id: impl Into<String>,
        load_balancer: &LoadBalancerRef,
        port: u16,
        certificate: Token,
        action: ListenerAction,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            load_balancer: load_balancer.arn.clone(),
            port,
            protocol: ApplicationProtocol::Https,
            certificates: vec![certificate],
            action,
        }
    }

    pub fn http(
        construct_id: impl Into<String>,
        load_balancer: &LoadBalancerRef,
        port: u16,
        action: ListenerAction,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            load_balancer: load_balancer.arn.clone(),
            port,
            protocol: ApplicationProtocol::Http,
            certificates: Vec::new(),
            action,
        }
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let load_balancer = scope.resolve(&self.load_balancer);
        let action = self.action.render(scope);
        let mut properties = json!({
            "LoadBalancerArn": load_balancer,
            "Port": self.port,
            "Protocol": self.protocol.as_str(),
            "DefaultActions": [action],
        });
        if !self.certificates.is_empty() {
            let certificates: Vec<Value> = self
                .certificates
                .iter()
                .map(|c| json!({ "CertificateArn": scope.resolve(c) }))
                .collect();
            properties["Certificates"] = json!(certificates);
        }
        scope.add_resource(
            &self.construct_id,
            "AWS::ElasticLoadBalancingV2::Listener",
            properties,
        )
    }
}
