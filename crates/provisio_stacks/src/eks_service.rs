//! Managed Kubernetes cluster, the default compute target.

use provisio_constructs::eks::SYSTEM_MASTERS;
use provisio_constructs::{
    AwsAuth, DatabaseRef, EksCluster, EksClusterRef, EndpointAccess, Nodegroup,
    OpenIdConnectProvider, Policy, PolicyStatement, Port, Principal, Role, RoleRef,
    SecurityGroupRef, StringParameter, SubnetType, Taint, TaintEffect, VpcRef,
};
use provisio_core::{CoreResult, StackScope};
use tracing::debug;

pub const STACK_NAME: &str = "eks-service";

/// Account role granted admin access for debugging.
const ORGANIZATION_ACCESS_ROLE: &str = "OrganizationAccountAccessRole";

const CLUSTER_MANAGED_POLICIES: [&str; 4] = [
    "CloudWatchLogsFullAccess",
    "AmazonEKSClusterPolicy",
    "SecretsManagerReadWrite",
    "AmazonEC2FullAccess",
];

const NODE_MANAGED_POLICIES: [&str; 9] = [
    "CloudWatchLogsFullAccess",
    "AmazonEC2FullAccess",
    "AmazonEKSClusterPolicy",
    "AmazonEKSWorkerNodePolicy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonRoute53FullAccess",
    "CloudWatchAgentServerPolicy",
    "CloudWatchReadOnlyAccess",
    "SecretsManagerReadWrite",
];

const AUTOSCALER_ACTIONS: [&str; 7] = [
    "autoscaling:DescribeAutoScalingGroups",
    "autoscaling:DescribeAutoScalingInstances",
    "autoscaling:DescribeLaunchConfigurations",
    "autoscaling:DescribeTags",
    "autoscaling:SetDesiredCapacity",
    "autoscaling:TerminateInstanceInAutoScalingGroup",
    "ec2:DescribeLaunchTemplateVersions",
];

/// Upstream handles the cluster is wired to.
#[derive(Debug, Clone, Copy)]
pub struct EksInputs<'a> {
    pub vpc: &'a VpcRef,
    pub database: &'a DatabaseRef,
    pub elb_security_group: &'a SecurityGroupRef,
}

#[derive(Debug, Clone)]
pub struct EksOutputs {
    pub cluster: EksClusterRef,
    pub node_role: RoleRef,
    pub autoscaler_role: RoleRef,
}

pub fn build(scope: &mut StackScope<'_>, inputs: EksInputs<'_>) -> CoreResult<EksOutputs> {
    scope.set_description("EKS cluster, node groups and workload access");
    let mut cluster_role = Role::new(
        "eks-cluster-iam-role",
        Principal::service("eks.amazonaws.com"),
    );
    for policy in CLUSTER_MANAGED_POLICIES {
        cluster_role = cluster_role.with_managed_policy(policy);
    }
    let cluster_role = cluster_role.add(scope)?;

    let cluster = EksCluster::new("eks-cluster", inputs.vpc)
        .with_subnets(SubnetType::Private)
        .with_role(&cluster_role)
        .with_endpoint_access(EndpointAccess::PublicAndPrivate)
        .add(scope)?;
    cluster.allow_from(
        scope,
        "eks-cluster-from-elb",
        &inputs.elb_security_group.peer(),
        Port::AllTcp,
        "enable traffic from AWS Load Balancer",
    )?;
    scope.add_depends_on(&cluster.resource, &inputs.database.resource)?;
    StringParameter::named("ssm-eks-cluster-name", cluster.name.clone()).publish(scope)?;

    let node_role = node_group_role(scope)?;
    let node_groups = scope.context().env.eks_cluster_cfg.node_group.clone();
    for group in &node_groups {
        let id = format!("eks-node-group-{}", group.id_suffix);
        let mut nodegroup = Nodegroup::new(&id, &cluster, &node_role)
            .with_name(&id)
            .with_instance_type(&group.instance_type)
            .with_scaling(group.min_size, group.max_size)
            .with_labels(group.label.clone())
            .with_tags(group.tags.clone());
        for (key, value) in &group.taints {
            nodegroup = nodegroup.with_taint(Taint {
                key: key.clone(),
                value: value.clone(),
                effect: TaintEffect::NoSchedule,
            });
        }
        nodegroup.add(scope)?;
        debug!("Declared node group {}", id);
    }

    aws_auth(scope, &cluster, &node_role)?;

    let autoscaler_role = autoscaler_role(scope, &cluster)?;
    StringParameter::named("ssm-eks-cluster-auto-scaler-role-arn", autoscaler_role.arn.clone())
        .publish(scope)?;

    Ok(EksOutputs {
        cluster,
        node_role,
        autoscaler_role,
    })
}

fn node_group_role(scope: &mut StackScope<'_>) -> CoreResult<RoleRef> {
    let context = scope.context();
    let parameters = context.parameter_arn(&context.namer().wildcard());
    let bucket = context.id("data");
    let identities = context.regional_arn("ses", "identity/*");

    let mut role = Role::new(
        "eks-node-group-iam-role",
        Principal::service("ec2.amazonaws.com"),
    );
    for policy in NODE_MANAGED_POLICIES {
        role = role.with_managed_policy(policy);
    }
    role.with_statement(
        PolicyStatement::allow()
            .with_actions(["ssm:GetParameters", "ssm:GetParameter"])
            .with_resource(parameters),
    )
    .with_statement(
        PolicyStatement::allow()
            .with_action("s3:*")
            .with_resources([format!("arn:aws:s3:::{bucket}"), format!("arn:aws:s3:::{bucket}/*")]),
    )
    .with_statement(
        PolicyStatement::allow()
            .with_action("ses:SendEmail")
            .with_resource(identities),
    )
    .add(scope)
}

/// Cluster admins: the organization access role, the CD role by name and
/// the CD role as published by the foundation stack.
fn aws_auth(scope: &mut StackScope<'_>, cluster: &EksClusterRef, node_role: &RoleRef) -> CoreResult<()> {
    let context = scope.context();
    let org_role = RoleRef::from_arn(context.role_arn(ORGANIZATION_ACCESS_ROLE));
    let cd_role = RoleRef::from_arn(context.role_arn(&context.id("cd-service-role")));
    let cd_runner_arn = StringParameter::value_for(scope, "ssm-iam-cd-role-arn")?;
    let cd_runner_role = RoleRef::from_arn(cd_runner_arn);

    AwsAuth::new("aws-auth", cluster)
        .add_node_role(node_role)
        .add_role_mapping(&org_role, &[SYSTEM_MASTERS])
        .add_role_mapping(&cd_role, &[SYSTEM_MASTERS])
        .add_masters_role(&cd_runner_role)
        .add(scope)?;
    Ok(())
}

/// Role of the cluster-autoscaler service account.
fn autoscaler_role(scope: &mut StackScope<'_>, cluster: &EksClusterRef) -> CoreResult<RoleRef> {
    let provider = OpenIdConnectProvider::for_cluster("eks-oidc-provider", cluster).add(scope)?;
    let principal = provider.service_account_principal(
        scope,
        "eks-autoscaler-trust-conditions",
        "kube-system",
        "cluster-autoscaler",
    )?;

    let role_name = scope.physical_name("eks-cluster-autoscaler");
    let role = Role::new("iam-eks-cluster-autoscaler-role", principal)
        .with_role_name(role_name)
        .with_description("This role is used by EKS cluster node group to auto scale")
        .add(scope)?;

    let policy_name = scope.physical_name("eks-cluster-autoscaler-policy");
    Policy::new("iam-eks-cluster-autoscaler-policy")
        .with_policy_name(policy_name)
        .with_statement(
            PolicyStatement::allow()
                .with_actions(AUTOSCALER_ACTIONS)
                .on_all_resources(),
        )
        .attach_to_role(&role)
        .add(scope)?;
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;
    use crate::{database, foundation};
    use serde_json::{json, Value};

    #[test]
    fn test_cluster_wiring() {
        let mut app = app();
        let foundation = app.stack(foundation::STACK_NAME, foundation::build).unwrap();
        let db = app
            .stack(database::STACK_NAME, |scope| database::build(scope, &foundation.vpc))
            .unwrap();
        let outputs = app
            .stack(STACK_NAME, |scope| {
                build(
                    scope,
                    EksInputs {
                        vpc: &foundation.vpc,
                        database: &db.database,
                        elb_security_group: &foundation.elb_security_group,
                    },
                )
            })
            .unwrap();

        let stack = app.stack_named(STACK_NAME).unwrap();
        assert!(stack.dependencies().contains("nm-dev-db"));
        assert!(stack.dependencies().contains("nm-dev-foundation"));
        assert_eq!(outputs.cluster.resource.logical_id, "EksCluster");

        let worker = stack.resource("EksNodeGroupWorker").unwrap();
        assert_eq!(worker.property("NodegroupName"), Some(&json!("eks-node-group-worker")));
        assert_eq!(worker.properties["Taints"][0]["Key"], json!("dedicated"));
        assert!(stack.resource("EksNodeGroupMain").unwrap().property("Taints").is_none());

        // the CD role ARN is read back from the parameter store
        assert!(stack
            .template()
            .get("Parameters")
            .and_then(Value::as_object)
            .map(|p| p.contains_key("SsmParameterValueNmDevSsmIamCdRoleArn"))
            .unwrap_or(false));

        let autoscaler = stack.resource("IamEksClusterAutoscalerRole").unwrap();
        let trust = &autoscaler.properties["AssumeRolePolicyDocument"]["Statement"][0];
        assert_eq!(trust["Action"], json!("sts:AssumeRoleWithWebIdentity"));
        assert!(app
            .store()
            .get("nm-dev-ssm-eks-cluster-auto-scaler-role-arn")
            .is_some());
    }
}
