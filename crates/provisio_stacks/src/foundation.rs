//! Shared network, registry and trust resources.
//!
//! Everything later stacks build on: the VPC, container repositories, the
//! CD role, the DNS zone with its certificates and the load balancer
//! security group.

use provisio_config::Ipv4Cidr;
use provisio_constructs::{
    Certificate, CertificateRef, HostedZoneRef, Instance, Peer, PolicyStatement, Port, Principal,
    Repository, RepositoryRef, Role, RoleRef, Secret, SecretStringGenerator, SecurityGroup,
    SecurityGroupRef, StringParameter, SubnetConfiguration, SubnetType, Vpc, VpcRef,
};
use provisio_core::{CoreResult, StackScope, Token};
use tracing::debug;

use crate::containers::Repositories;

pub const STACK_NAME: &str = "foundation";

/// Repositories created per deployment, as (construct id, short name).
const REPOSITORIES: [(&str, &str); 7] = [
    ("ecr-backend-repo", "backend"),
    ("ecr-backend-local-repo", "backend-local"),
    ("ecr-pg-local", "pg-local"),
    ("ecr-frontend-repo", "frontend"),
    ("ecr-frontend-local-repo", "frontend-local"),
    ("ecr-doc-repo", "doc"),
    ("ecr-doc-local-repo", "doc-local"),
];

/// Repositories pulled by local deployments through the read-only role.
const LOCAL_REPOSITORIES: [&str; 4] = ["backend-local", "frontend-local", "doc-local", "pg-local"];

const CD_EXTERNAL_ID: &str = "github.com";

const ECR_PUSH_ACTIONS: [&str; 10] = [
    "ecr:CreateRepository",
    "ecr:ReplicateImage",
    "ecr:GetAuthorizationToken",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:BatchCheckLayerAvailability",
    "ecr:PutImage",
];

const ECR_READ_ACTIONS: [&str; 11] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:GetRepositoryPolicy",
    "ecr:DescribeRepositories",
    "ecr:ListImages",
    "ecr:DescribeImages",
    "ecr:BatchGetImage",
    "ecr:GetLifecyclePolicy",
    "ecr:GetLifecyclePolicyPreview",
    "ecr:ListTagsForResource",
    "ecr:DescribeImageScanFindings",
];

/// Handles exported by the foundation stack.
#[derive(Debug, Clone)]
pub struct FoundationOutputs {
    pub vpc: VpcRef,
    pub cd_role: RoleRef,
    pub ecr_readonly_role: RoleRef,
    pub repositories: Repositories,
    pub hosted_zone: HostedZoneRef,
    /// Certificate for the zone apex
    pub domain_certificate: CertificateRef,
    /// Wildcard certificate for subdomains
    pub subdomain_certificate: CertificateRef,
    pub elb_security_group: SecurityGroupRef,
    pub bastion_instance_id: Token,
}

pub fn build(scope: &mut StackScope<'_>) -> CoreResult<FoundationOutputs> {
    scope.set_description("Network, repositories, DNS and shared secrets");
    let cd_role = cd_service_role(scope)?;
    StringParameter::named("ssm-iam-cd-role-arn", cd_role.arn.clone()).publish(scope)?;

    let repositories = repositories(scope)?;
    let ecr_readonly_role = ecr_readonly_role(scope, &repositories)?;
    StringParameter::named("ssm-ecr-readonly-role", ecr_readonly_role.arn.clone()).publish(scope)?;

    let vpc = vpc(scope)?;
    let bastion_instance_id = bastion(scope, &vpc)?;
    StringParameter::named("ssm-bastion-instance-id", bastion_instance_id.clone()).publish(scope)?;

    let zone = scope.context().env.eks_host_zone.clone();
    StringParameter::named("ssm-eks-domain-name", zone.domain_name.as_str()).publish(scope)?;
    let hosted_zone = HostedZoneRef::from_attributes(&zone.id, &zone.domain_name);
    StringParameter::named("ssm-eks-hostzone-id", hosted_zone.id.clone()).publish(scope)?;

    let subdomain_certificate = Certificate::new(
        "certificate-manager-subdomains",
        format!("*.{}", hosted_zone.zone_name),
    )
    .with_dns_validation(&hosted_zone)
    .add(scope)?;
    let domain_certificate =
        Certificate::new("certificate-manager-domain", hosted_zone.zone_name.as_str())
            .with_dns_validation(&hosted_zone)
            .add(scope)?;
    let certificate_arns = Token::join(
        ",",
        vec![domain_certificate.arn.clone(), subdomain_certificate.arn.clone()],
    );
    StringParameter::named("ssm-eks-certificate-manager-arn", certificate_arns).publish(scope)?;

    secrets(scope)?;

    let elb_security_group = elb_security_group(scope, &vpc)?;
    StringParameter::named("ssm-elb-sg-id", elb_security_group.id.clone()).publish(scope)?;

    StringParameter::named("ssm-demo-account-limitation", "yes")
        .with_description(
            "'no' means demo account can do anything. Please change it to 'yes' after creating the task",
        )
        .publish(scope)?;
    StringParameter::new("rapidapi-task-id", "rapidapi-sanction-task-id", "0")
        .with_description("Sanction list searching task id in the demo account")
        .publish(scope)?;

    Ok(FoundationOutputs {
        vpc,
        cd_role,
        ecr_readonly_role,
        repositories,
        hosted_zone,
        domain_certificate,
        subdomain_certificate,
        elb_security_group,
        bastion_instance_id,
    })
}

/// Role assumed by the CD pipeline to push images and roll out services.
fn cd_service_role(scope: &mut StackScope<'_>) -> CoreResult<RoleRef> {
    let context = scope.context();
    let wildcard = context.namer().wildcard();
    let role_name = context.id("cd-service-role");
    let repositories = context.regional_arn("ecr", &format!("repository/{wildcard}"));
    let services = context.regional_arn("ecs", &format!("service/{wildcard}"));
    let parameters = context.parameter_arn(&wildcard);
    let secrets = context.regional_arn("secretsmanager", &format!("secret:{wildcard}"));
    let cd_user_arn = context.common.cd_user_arn.clone();

    Role::new("iam-cd-service-role", Principal::arn(cd_user_arn))
        .with_external_id(CD_EXTERNAL_ID)
        .with_role_name(role_name)
        .with_description("This role is used by CD application to test/build/deploy code")
        .with_max_session_minutes(60)
        .with_statement(
            PolicyStatement::allow()
                .with_action("ecr:GetAuthorizationToken")
                .on_all_resources(),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_actions(ECR_PUSH_ACTIONS)
                .with_resource(repositories),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("ecs:UpdateService")
                .with_resource(services),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("ssm:GetParameters")
                .with_resource(parameters),
        )
        // needed by `aws eks update-kubeconfig`
        .with_statement(
            PolicyStatement::allow()
                .with_action("eks:DescribeCluster")
                .on_all_resources(),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("secretsmanager:GetSecretValue")
                .with_resource(secrets),
        )
        .add(scope)
}

fn repositories(scope: &mut StackScope<'_>) -> CoreResult<Repositories> {
    let mut repositories = Repositories::new();
    for (construct_id, name) in REPOSITORIES {
        let repository = Repository::new(construct_id)
            .with_name(scope.physical_name(name))
            .add(scope)?;
        StringParameter::named(&format!("ssm-{name}-repo-name"), repository.name.clone())
            .publish(scope)?;
        repositories.insert(name, repository);
    }
    repositories.insert("redis", RepositoryRef::from_name(scope.context(), "redis"));
    debug!("Declared {} repositories", repositories.len());
    Ok(repositories)
}

/// Role local deployments assume to pull the `*-local` images.
fn ecr_readonly_role(scope: &mut StackScope<'_>, repositories: &Repositories) -> CoreResult<RoleRef> {
    let local_arns: Vec<Token> = LOCAL_REPOSITORIES
        .iter()
        .filter_map(|name| repositories.get(name))
        .map(|r| r.arn.clone())
        .collect();
    let context = scope.context();
    let parameter_arns: Vec<String> = LOCAL_REPOSITORIES
        .iter()
        .map(|name| context.parameter_arn(&context.id(&format!("ssm-{name}-repo-name"))))
        .collect();
    let role_name = context.id("ecr-readonly");
    let expiration = context.common.ecr_assume_role_expiration_min;

    Role::new("iam-ecr-readonly-role", Principal::service("ec2.amazonaws.com"))
        .with_role_name(role_name)
        .with_description(
            "This role is used by local deploy enable user to pull images from ECR repository",
        )
        .with_max_session_minutes(expiration)
        .with_statement(
            PolicyStatement::allow()
                .with_actions(ECR_READ_ACTIONS)
                .with_resources(local_arns),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("ecr:GetAuthorizationToken")
                .on_all_resources(),
        )
        .with_statement(
            PolicyStatement::allow()
                .with_action("ssm:GetParameters")
                .with_resources(parameter_arns),
        )
        .add(scope)
}

fn vpc(scope: &mut StackScope<'_>) -> CoreResult<VpcRef> {
    let common = &scope.context().common;
    let cidr: Ipv4Cidr = common.vpc_default_cidr.parse()?;
    let mask = common.subnet_cidr_mask;

    Vpc::new("vpc", cidr)
        .with_max_azs(2)
        .with_nat_gateways(1)
        .with_subnet(SubnetConfiguration::new("Public", SubnetType::Public, mask))
        .with_subnet(SubnetConfiguration::new("Private", SubnetType::Private, mask))
        .with_subnet(SubnetConfiguration::new("DB", SubnetType::Isolated, mask))
        .add(scope)
}

/// Session manager bastion for reaching the database. Returns the
/// instance id.
fn bastion(scope: &mut StackScope<'_>, vpc: &VpcRef) -> CoreResult<Token> {
    let role_name = scope.physical_name("ssm-bastion-role");
    let role = Role::new("iam-ssm-bastion-role", Principal::service("ec2.amazonaws.com"))
        .with_role_name(role_name)
        .with_description("This role is for EC2 instance profile which will serving the SSM")
        .with_managed_policy("AmazonSSMManagedInstanceCore")
        .with_statement(
            PolicyStatement::allow()
                .with_actions(["cloudwatch:PutMetricData", "ec2:DescribeVolumes", "ec2:DescribeTags"])
                .on_all_resources(),
        )
        .add(scope)?;

    let group = SecurityGroup::new("bastion-sg", vpc)
        .with_description("SG for bastion instance")
        .add(scope)?;

    let instance = Instance::new("bastion-ssm", vpc, SubnetType::Private, "t3a.nano")
        .with_name("bastion")
        .with_security_group(&group)
        .with_role(&role)
        .add(scope)?;
    Ok(instance.ref_token())
}

fn secrets(scope: &mut StackScope<'_>) -> CoreResult<()> {
    for (name, length) in [
        ("api-token-secret", 32),
        ("redis-secret", 32),
        ("grafana-admin-secret", 16),
    ] {
        let secret_name = scope.physical_name(name);
        Secret::new(name, SecretStringGenerator::password(length))
            .with_name(secret_name)
            .add(scope)?;
    }
    Ok(())
}

/// Security group of the load balancers: open inside the VPC, 443 (and
/// optionally 80) for whitelisted addresses.
fn elb_security_group(scope: &mut StackScope<'_>, vpc: &VpcRef) -> CoreResult<SecurityGroupRef> {
    let group = SecurityGroup::new("elb-sg", vpc)
        .with_description("SG for Elastic Load balancer")
        .add(scope)?;

    let vpc_cidr = scope.context().common.vpc_default_cidr.clone();
    group.add_ingress_rule(
        scope,
        "elb-sg-from-vpc",
        &Peer::ipv4(vpc_cidr),
        Port::AllTcp,
        "allow all internal traffic",
    )?;

    let whitelist = scope.context().env.whitelist_ips.clone();
    for (i, entry) in whitelist.iter().enumerate() {
        let peer = Peer::ipv4(entry.ip.as_str());
        group.add_ingress_rule(
            scope,
            &format!("elb-sg-whitelist{i}-443"),
            &peer,
            Port::Tcp(443),
            &format!("allow 443 for {}", entry.entity),
        )?;
        if entry.enable_80 {
            group.add_ingress_rule(
                scope,
                &format!("elb-sg-whitelist{i}-80"),
                &peer,
                Port::Tcp(80),
                &format!("allow 80 for {}", entry.entity),
            )?;
        }
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;
    use provisio_core::ParameterStore;
    use serde_json::json;

    #[test]
    fn test_foundation_publishes_parameters() {
        let mut app = app();
        let outputs = app.stack(STACK_NAME, build).unwrap();

        assert_eq!(outputs.repositories.len(), 8);
        assert!(outputs.repositories.get("redis").is_some());

        let names: Vec<String> = app.store().list().into_iter().map(|p| p.name).collect();
        for expected in [
            "nm-dev-ssm-iam-cd-role-arn",
            "nm-dev-ssm-backend-repo-name",
            "nm-dev-ssm-pg-local-repo-name",
            "nm-dev-ssm-doc-local-repo-name",
            "nm-dev-ssm-ecr-readonly-role",
            "nm-dev-ssm-bastion-instance-id",
            "nm-dev-ssm-eks-domain-name",
            "nm-dev-ssm-eks-hostzone-id",
            "nm-dev-ssm-eks-certificate-manager-arn",
            "nm-dev-ssm-elb-sg-id",
            "nm-dev-ssm-demo-account-limitation",
            "nm-dev-rapidapi-sanction-task-id",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }

        let domain = app.store().get("nm-dev-ssm-eks-domain-name").unwrap();
        assert_eq!(domain.value.as_literal(), Some("dev.example.com"));
    }

    #[test]
    fn test_cd_role_trust_and_scope() {
        let mut app = app();
        app.stack(STACK_NAME, build).unwrap();
        let stack = app.stack_named(STACK_NAME).unwrap();

        let role = stack.resource("IamCdServiceRole").unwrap();
        assert_eq!(role.property("RoleName"), Some(&json!("nm-dev-cd-service-role")));
        assert_eq!(role.property("MaxSessionDuration"), Some(&json!(3600)));
        let trust = &role.properties["AssumeRolePolicyDocument"]["Statement"][0];
        assert_eq!(
            trust["Condition"]["StringEquals"]["sts:ExternalId"],
            json!("github.com")
        );

        let policy = stack.resource("IamCdServiceRoleDefaultPolicy").unwrap();
        let statements = policy.properties["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap();
        assert!(statements.iter().any(|s| s["Resource"]
            == json!("arn:aws:ssm:us-east-1:111122223333:parameter/nm-dev-*")));
    }

    #[test]
    fn test_elb_whitelist_rules() {
        let mut app = app();
        app.stack(STACK_NAME, build).unwrap();
        let stack = app.stack_named(STACK_NAME).unwrap();

        let office_443 = stack.resource("ElbSgWhitelist0443").unwrap();
        assert_eq!(office_443.property("CidrIp"), Some(&json!("203.0.113.10/32")));
        assert!(stack.resource("ElbSgWhitelist080").is_some());
        // the vpn entry disables port 80
        assert!(stack.resource("ElbSgWhitelist1443").is_some());
        assert!(stack.resource("ElbSgWhitelist180").is_none());
        assert_eq!(
            stack.resource("ElbSgFromVpc").unwrap().property("ToPort"),
            Some(&json!(65535))
        );
    }
}
