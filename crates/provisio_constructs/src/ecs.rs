//! Container clusters, Fargate task definitions and services.

use serde_json::{json, Value};

use provisio_config::{Protocol, Ulimit};
use provisio_core::{CoreError, CoreResult, ResourceRef, StackScope, Token};

use crate::ec2::{SecurityGroupRef, VpcRef};
use crate::elb::TargetGroupRef;
use crate::iam::{Principal, Role, RoleRef};
use crate::logs::LogGroupRef;

/// Managed policy of the role that pulls images and ships logs.
const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

#[derive(Debug, Clone)]
pub struct Cluster {
    construct_id: String,
}

impl Cluster {
    pub fn new(construct_id: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
        }
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ClusterRef> {
        let resource = scope.add_resource(&self.construct_id, "AWS::ECS::Cluster", json!({}))?;
        Ok(ClusterRef {
            name: resource.ref_token(),
            arn: resource.attr("Arn"),
            resource,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRef {
    pub resource: ResourceRef,
    pub name: Token,
    pub arn: Token,
}

/// Port exposed by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: Protocol,
}

/// One container of a task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: Token,
    pub essential: bool,
    pub memory_limit_mib: u32,
    pub memory_reservation_mib: u32,
    pub cpu: u32,
    pub command: Option<Vec<String>>,
    pub port_mappings: Vec<PortMapping>,
    pub ulimits: Vec<Ulimit>,
    pub log_group: Option<LogGroupRef>,
}

impl ContainerDefinition {
    pub fn new(name: impl Into<String>, image: Token) -> Self {
        Self {
            name: name.into(),
            image,
            essential: true,
            memory_limit_mib: 512,
            memory_reservation_mib: 256,
            cpu: 256,
            command: None,
            port_mappings: Vec::new(),
            ulimits: Vec::new(),
            log_group: None,
        }
    }

    /// First mapped container port.
    pub fn container_port(&self) -> Option<u16> {
        self.port_mappings.first().map(|m| m.container_port)
    }

    fn render(&self, scope: &mut StackScope<'_>) -> Value {
        let mut container = json!({
            "Name": self.name,
            "Image": scope.resolve(&self.image),
            "Essential": self.essential,
            "Memory": self.memory_limit_mib,
            "MemoryReservation": self.memory_reservation_mib,
            "Cpu": self.cpu,
            "Environment": [],
        });
        if let Some(command) = &self.command {
            container["Command"] = json!(command);
        }
        if !self.port_mappings.is_empty() {
            let mappings: Vec<Value> = self
                .port_mappings
                .iter()
                .map(|m| {
                    json!({
                        "ContainerPort": m.container_port,
                        "HostPort": m.host_port.unwrap_or(m.container_port),
                        "Protocol": m.protocol.as_str(),
                    })
                })
                .collect();
            container["PortMappings"] = json!(mappings);
        }
        if !self.ulimits.is_empty() {
            let ulimits: Vec<Value> = self
                .ulimits
                .iter()
                .map(|u| {
                    json!({
                        "Name": u.name,
                        "SoftLimit": u.soft_limit,
                        "HardLimit": u.hard_limit,
                    })
                })
                .collect();
            container["Ulimits"] = json!(ulimits);
        }
        if let Some(group) = &self.log_group {
            let group_name = scope.resolve(&group.name);
            let region = scope.context().region().to_string();
            container["LogConfiguration"] = json!({
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": group_name,
                    "awslogs-stream-prefix": self.name,
                    "awslogs-region": region,
                },
            });
        }
        container
    }
}

/// A Fargate task definition.
#[derive(Debug, Clone)]
pub struct FargateTaskDefinition {
    construct_id: String,
    memory_limit_mib: u32,
    cpu: u32,
    task_role: Option<RoleRef>,
    containers: Vec<ContainerDefinition>,
}

impl FargateTaskDefinition {
    pub fn new(construct_id: impl Into<String>, memory_limit_mib: u32, cpu: u32) -> Self {
        Self {
            construct_id: construct_id.into(),
            memory_limit_mib,
            cpu,
            task_role: None,
            containers: Vec::new(),
        }
    }

    pub fn with_task_role(mut self, role: &RoleRef) -> Self {
        self.task_role = Some(role.clone());
        self
    }

    pub fn with_container(mut self, container: ContainerDefinition) -> Self {
        self.containers.push(container);
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<TaskDefinitionRef> {
        if self.containers.is_empty() {
            return Err(CoreError::InvalidReference(format!(
                "task definition {} has no containers",
                self.construct_id
            )));
        }

        let execution_role = Role::new(
            format!("{}-execution-role", self.construct_id),
            Principal::service("ecs-tasks.amazonaws.com"),
        )
        .with_managed_policy(TASK_EXECUTION_POLICY)
        .add(scope)?;

        let containers: Vec<Value> = self.containers.iter().map(|c| c.render(scope)).collect();
        let mut properties = json!({
            "RequiresCompatibilities": ["FARGATE"],
            "NetworkMode": "awsvpc",
            "Cpu": self.cpu.to_string(),
            "Memory": self.memory_limit_mib.to_string(),
            "ContainerDefinitions": containers,
        });
        properties["ExecutionRoleArn"] = scope.resolve(&execution_role.arn);
        if let Some(role) = &self.task_role {
            properties["TaskRoleArn"] = scope.resolve(&role.arn);
        }

        let resource = scope.add_resource(&self.construct_id, "AWS::ECS::TaskDefinition", properties)?;
        let essential = self
            .containers
            .iter()
            .find(|c| c.essential && c.container_port().is_some())
            .or_else(|| self.containers.iter().find(|c| c.container_port().is_some()))
            .map(|c| (c.name.clone(), c.container_port()));

        Ok(TaskDefinitionRef {
            arn: resource.ref_token(),
            default_container: essential.and_then(|(name, port)| port.map(|p| (name, p))),
            resource,
        })
    }
}

/// Handle to a declared task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionRef {
    pub resource: ResourceRef,
    pub arn: Token,
    /// Container and port that receive load balancer traffic
    pub default_container: Option<(String, u16)>,
}

/// A Fargate service.
#[derive(Debug, Clone)]
pub struct FargateService {
    construct_id: String,
    cluster: ClusterRef,
    task_definition: TaskDefinitionRef,
    name: Option<String>,
    security_groups: Vec<SecurityGroupRef>,
    subnets: Vec<Token>,
    desired_count: u32,
    min_healthy_percent: u32,
    max_healthy_percent: u32,
    target_group: Option<TargetGroupRef>,
    depends_on: Vec<ResourceRef>,
}

impl FargateService {
    pub fn new(
        construct_id: impl Into<String>,
        cluster: &ClusterRef,
        task_definition: &TaskDefinitionRef,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            cluster: cluster.clone(),
            task_definition: task_definition.clone(),
            name: None,
            security_groups: Vec::new(),
            subnets: Vec::new(),
            desired_count: 1,
            min_healthy_percent: 50,
            max_healthy_percent: 200,
            target_group: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_security_group(mut self, group: &SecurityGroupRef) -> Self {
        self.security_groups.push(group.clone());
        self
    }

    /// Run tasks in the subnets of a named group.
    pub fn in_subnet_group(mut self, vpc: &VpcRef, group: &str) -> Self {
        self.subnets = vpc.subnet_ids_in_group(group);
        self
    }

    pub fn with_desired_count(mut self, count: u32) -> Self {
        self.desired_count = count;
        self
    }

    pub fn with_healthy_percent(mut self, min: u32, max: u32) -> Self {
        self.min_healthy_percent = min;
        self.max_healthy_percent = max;
        self
    }

    /// Register tasks with a target group. The listener forwarding to it
    /// must exist first.
    pub fn with_target_group(mut self, group: &TargetGroupRef, listener: &ResourceRef) -> Self {
        self.target_group = Some(group.clone());
        self.depends_on.push(listener.clone());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let cluster = scope.resolve(&self.cluster.arn);
        let task_definition = scope.resolve(&self.task_definition.arn);
        let security_groups: Vec<Value> = self
            .security_groups
            .iter()
            .map(|g| scope.resolve(&g.id))
            .collect();
        let subnets = scope.resolve_all(&self.subnets);

        let mut properties = json!({
            "Cluster": cluster,
            "TaskDefinition": task_definition,
            "LaunchType": "FARGATE",
            "DesiredCount": self.desired_count,
            "DeploymentConfiguration": {
                "MaximumPercent": self.max_healthy_percent,
                "MinimumHealthyPercent": self.min_healthy_percent,
            },
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": "DISABLED",
                    "SecurityGroups": security_groups,
                    "Subnets": subnets,
                },
            },
            "EnableECSManagedTags": false,
        });
        if let Some(name) = &self.name {
            scope.claim_name("ecs-service", name)?;
            properties["ServiceName"] = json!(name);
        }
        if let Some(group) = &self.target_group {
            let (container, port) =
                self.task_definition.default_container.clone().ok_or_else(|| {
                    CoreError::InvalidReference(format!(
                        "service {} has no container port for its target group",
                        self.construct_id
                    ))
                })?;
            properties["LoadBalancers"] = json!([{
                "ContainerName": container,
                "ContainerPort": port,
                "TargetGroupArn": scope.resolve(&group.arn),
            }]);
            properties["HealthCheckGracePeriodSeconds"] = json!(60);
        }

        let service = scope.add_resource(&self.construct_id, "AWS::ECS::Service", properties)?;
        for dependency in &self.depends_on {
            scope.add_depends_on(&service, dependency)?;
        }
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;

    fn container(name: &str, port: Option<u16>) -> ContainerDefinition {
        let mut def = ContainerDefinition::new(name, Token::literal(format!("repo/{name}:latest")));
        if let Some(port) = port {
            def.port_mappings.push(PortMapping {
                container_port: port,
                host_port: None,
                protocol: Protocol::Tcp,
            });
        }
        def
    }

    #[test]
    fn test_task_definition_containers() {
        let mut app = app();
        let task = app
            .stack("fargate-service", |scope| {
                let mut worker = container("worker", None);
                worker.essential = false;
                worker.ulimits.push(Ulimit {
                    name: "nofile".to_string(),
                    soft_limit: 65536,
                    hard_limit: 65536,
                });
                FargateTaskDefinition::new("backend-task-def", 4096, 2048)
                    .with_container(container("api", Some(8000)))
                    .with_container(worker)
                    .add(scope)
            })
            .unwrap();

        assert_eq!(task.default_container, Some(("api".to_string(), 8000)));
        let stack = &app.stacks()[0];
        let def = stack.resource("BackendTaskDef").unwrap();
        assert_eq!(def.property("Memory"), Some(&json!("4096")));
        let containers = def.properties["ContainerDefinitions"].as_array().unwrap();
        assert_eq!(containers[0]["PortMappings"][0]["HostPort"], json!(8000));
        assert_eq!(containers[1]["Ulimits"][0]["Name"], json!("nofile"));
        assert!(stack.resource("BackendTaskDefExecutionRole").is_some());
    }

    #[test]
    fn test_empty_task_definition_rejected() {
        let mut app = app();
        let result = app.stack("fargate-service", |scope| {
            FargateTaskDefinition::new("empty", 512, 256).add(scope)
        });
        assert!(result.is_err());
    }
}
