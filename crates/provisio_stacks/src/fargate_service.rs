//! Container services on Fargate behind the public load balancer.
//!
//! Each configured task definition gets a log group, a service and an
//! HTTPS listener forwarding to it. Port 80 redirects to HTTPS.

use provisio_config::FargateTaskDef;
use provisio_constructs::{
    CertificateRef, DatabaseRef, EcsCluster, EcsClusterRef, FargateService, FargateTaskDefinition,
    HealthCheck, Listener, ListenerAction, LoadBalancerRef, LogGroup, Peer, PolicyStatement, Port,
    Principal, RetentionDays, Role, RoleRef, SecurityGroup, SecurityGroupRef, StringParameter,
    TargetGroup, VpcRef,
};
use provisio_core::{CoreResult, DeletionPolicy, ResourceRef, StackScope};
use tracing::debug;

use crate::containers::{ContainerRole, ImageSource, Repositories};

pub const STACK_NAME: &str = "fargate-service";

/// Subnet group services run in.
const SERVICE_SUBNET_GROUP: &str = "Private";

#[derive(Debug, Clone, Copy)]
pub struct FargateInputs<'a> {
    pub vpc: &'a VpcRef,
    pub database: &'a DatabaseRef,
    pub load_balancer: &'a LoadBalancerRef,
    pub repositories: &'a Repositories,
    pub certificate: &'a CertificateRef,
    /// Role the backend tasks may assume to pull local images
    pub ecr_readonly_role: &'a RoleRef,
}

#[derive(Debug, Clone)]
pub struct FargateOutputs {
    pub cluster: EcsClusterRef,
    pub backend_task_role: RoleRef,
    pub security_group: SecurityGroupRef,
    /// Services by role
    pub services: Vec<(ContainerRole, ResourceRef)>,
}

/// How one role is exposed.
struct ServiceLayout {
    role: ContainerRole,
    retention: RetentionDays,
    listener_port: u16,
    health_check_path: &'static str,
}

impl ServiceLayout {
    fn for_role(role: ContainerRole, task: &FargateTaskDef) -> Self {
        match role {
            ContainerRole::Backend => Self {
                role,
                retention: RetentionDays::OneWeek,
                listener_port: task.port,
                health_check_path: "/docs",
            },
            ContainerRole::Frontend => Self {
                role,
                retention: RetentionDays::OneWeek,
                listener_port: 443,
                health_check_path: "/",
            },
            ContainerRole::Doc => Self {
                role,
                retention: RetentionDays::ThreeDays,
                listener_port: task.port,
                health_check_path: "/",
            },
        }
    }
}

pub fn build(scope: &mut StackScope<'_>, inputs: FargateInputs<'_>) -> CoreResult<FargateOutputs> {
    scope.set_description("ECS Fargate cluster and services");
    let cluster = EcsCluster::new("fargate-cluster").add(scope)?;
    scope.add_depends_on(&cluster.resource, &inputs.database.resource)?;

    let security_group = SecurityGroup::new("fargate-sg", inputs.vpc)
        .with_description("SG for Fargate")
        .add(scope)?;
    let vpc_cidr = scope.context().common.vpc_default_cidr.clone();
    security_group.add_ingress_rule(
        scope,
        "fargate-sg-from-vpc",
        &Peer::ipv4(vpc_cidr),
        Port::AllTcp,
        "allow all internal traffic",
    )?;

    let backend_task_role = backend_task_role(scope, inputs.ecr_readonly_role)?;
    StringParameter::named("ssm-backend-task-role", backend_task_role.arn.clone()).publish(scope)?;

    let tasks = {
        let env = &scope.context().env;
        [
            (ContainerRole::Backend, env.backend_task_def.clone()),
            (ContainerRole::Frontend, env.frontend_task_def.clone()),
            (ContainerRole::Doc, env.doc_task_def.clone()),
        ]
    };

    let mut services = Vec::new();
    for (role, task) in &tasks {
        let layout = ServiceLayout::for_role(*role, task);
        let task_role = (*role == ContainerRole::Backend).then_some(&backend_task_role);
        let service = service(
            scope,
            &inputs,
            &cluster,
            &security_group,
            &layout,
            task,
            task_role,
        )?;
        services.push((*role, service));
    }

    Listener::http(
        "listener-redirect-http-to-https",
        inputs.load_balancer,
        80,
        ListenerAction::RedirectToHttps,
    )
    .add(scope)?;

    StringParameter::named("ssm-fargate-cluster-name", cluster.name.clone()).publish(scope)?;

    Ok(FargateOutputs {
        cluster,
        backend_task_role,
        security_group,
        services,
    })
}

/// Named so that its ARN is known before deployment.
fn backend_task_role(scope: &mut StackScope<'_>, ecr_readonly_role: &RoleRef) -> CoreResult<RoleRef> {
    let context = scope.context();
    let role_name = context.id("backend-task-role");
    let parameters = context.parameter_arn(&context.namer().wildcard());
    let identities = context.regional_arn("ses", "identity/*");

    Role::new("backend-task-iam-role", Principal::service("ecs-tasks.amazonaws.com"))
        .with_role_name(role_name)
        .with_managed_policy("AmazonS3FullAccess")
        .with_managed_policy("SecretsManagerReadWrite")
        .with_statement(
            PolicyStatement::allow()
                .with_actions(["ssm:GetParameters", "ssm:GetParameter"])
                .with_resource(parameters),
        )
        // ECS exec
        .with_statement(
            PolicyStatement::allow()
                .with_actions([
                    "ssmmessages:CreateControlChannel",
                    "ssmmessages:CreateDataChannel",
                    "ssmmessages:OpenControlChannel",
                    "ssmmessages:OpenDataChannel",
                ])
                .on_all_resources(),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("ses:SendEmail")
                .with_resource(identities),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("sts:AssumeRole")
                .with_resource(ecr_readonly_role.arn.clone()),
        )
        .add(scope)
}

fn service(
    scope: &mut StackScope<'_>,
    inputs: &FargateInputs<'_>,
    cluster: &EcsClusterRef,
    security_group: &SecurityGroupRef,
    layout: &ServiceLayout,
    task: &FargateTaskDef,
    task_role: Option<&RoleRef>,
) -> CoreResult<ResourceRef> {
    let role = layout.role.as_str();

    let log_group_name = scope.physical_name(&format!("fargate-{role}-server"));
    let log_group = LogGroup::new(format!("{role}-log-group"))
        .with_name(log_group_name)
        .with_retention(layout.retention)
        .with_removal_policy(DeletionPolicy::Delete)
        .add(scope)?;

    let images = ImageSource::new(inputs.repositories, scope.context());
    let containers = task
        .container_def_l
        .iter()
        .map(|def| images.container(layout.role, def, &log_group))
        .collect::<CoreResult<Vec<_>>>()?;

    let mut task_definition = FargateTaskDefinition::new(
        format!("{role}-task-def"),
        task.task_memory_limit_mib,
        task.task_cpu,
    );
    if let Some(task_role) = task_role {
        task_definition = task_definition.with_task_role(task_role);
    }
    for container in containers {
        task_definition = task_definition.with_container(container);
    }
    let task_definition = task_definition.add(scope)?;

    // targets are still reached over plain HTTP
    let target_group = TargetGroup::new(format!("listener-target-{role}-https"), inputs.vpc, task.port)
        .with_health_check(HealthCheck::new(layout.health_check_path))
        .add(scope)?;
    let listener = Listener::https(
        format!("listener-{role}-https"),
        inputs.load_balancer,
        layout.listener_port,
        inputs.certificate.arn.clone(),
        ListenerAction::Forward(target_group.clone()),
    )
    .add(scope)?;

    let service_name = scope.physical_name(&format!("fargate-service-{role}"));
    let service = FargateService::new(format!("fargate-{role}-service"), cluster, &task_definition)
        .with_name(service_name)
        .with_security_group(security_group)
        .in_subnet_group(inputs.vpc, SERVICE_SUBNET_GROUP)
        .with_desired_count(1)
        .with_healthy_percent(0, 100)
        .with_target_group(&target_group, &listener)
        .add(scope)?;
    debug!("Declared {} service on port {}", role, layout.listener_port);
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{self, LoadBalancerInputs};
    use crate::test_support::app;
    use crate::{database, foundation, storage};
    use serde_json::json;

    #[test]
    fn test_services_behind_listeners() {
        let mut app = app();
        let foundation = app.stack(foundation::STACK_NAME, foundation::build).unwrap();
        let storage = app.stack(storage::STACK_NAME, storage::build).unwrap();
        let db = app
            .stack(database::STACK_NAME, |scope| database::build(scope, &foundation.vpc))
            .unwrap();
        let lb = app
            .stack(load_balancer::STACK_NAME, |scope| {
                load_balancer::build(
                    scope,
                    LoadBalancerInputs {
                        vpc: &foundation.vpc,
                        log_bucket: &storage.lb_log_bucket,
                        hosted_zone: &foundation.hosted_zone,
                        security_group: &foundation.elb_security_group,
                    },
                )
            })
            .unwrap();
        let outputs = app
            .stack(STACK_NAME, |scope| {
                build(
                    scope,
                    FargateInputs {
                        vpc: &foundation.vpc,
                        database: &db.database,
                        load_balancer: &lb.load_balancer,
                        repositories: &foundation.repositories,
                        certificate: &foundation.domain_certificate,
                        ecr_readonly_role: &foundation.ecr_readonly_role,
                    },
                )
            })
            .unwrap();
        assert_eq!(outputs.services.len(), 3);

        let stack = app.stack_named(STACK_NAME).unwrap();
        let backend = stack.resource("BackendTaskDef").unwrap();
        assert!(backend.property("TaskRoleArn").is_some());
        assert!(stack.resource("FrontendTaskDef").unwrap().property("TaskRoleArn").is_none());

        let containers = backend.properties["ContainerDefinitions"].as_array().unwrap();
        let redis = containers.iter().find(|c| c["Name"] == json!("redis")).unwrap();
        assert_eq!(
            redis["Image"],
            json!("111122223333.dkr.ecr.us-east-1.amazonaws.com/redis:latest")
        );

        let frontend_listener = stack.resource("ListenerFrontendHttps").unwrap();
        assert_eq!(frontend_listener.property("Port"), Some(&json!(443)));
        let doc_listener = stack.resource("ListenerDocHttps").unwrap();
        assert_eq!(doc_listener.property("Port"), Some(&json!(8080)));

        let redirect = stack.resource("ListenerRedirectHttpToHttps").unwrap();
        assert_eq!(
            redirect.properties["DefaultActions"][0]["RedirectConfig"]["StatusCode"],
            json!("HTTP_301")
        );

        let service = stack.resource("FargateBackendService").unwrap();
        assert_eq!(service.property("ServiceName"), Some(&json!("nm-dev-fargate-service-backend")));
        assert_eq!(
            service.properties["DeploymentConfiguration"]["MinimumHealthyPercent"],
            json!(0)
        );

        let role = stack.resource("BackendTaskIamRole").unwrap();
        assert_eq!(role.property("RoleName"), Some(&json!("nm-dev-backend-task-role")));
        assert!(app.store().get("nm-dev-ssm-fargate-cluster-name").is_some());
    }
}
