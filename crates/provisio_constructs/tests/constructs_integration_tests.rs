//! Integration tests for resources wired across stacks.

use std::path::Path;

use provisio_config::PropertiesLoader;
use provisio_constructs::{
    ApplicationLoadBalancer, Bucket, ContainerDefinition, EcsCluster, FargateService,
    FargateTaskDefinition, HealthCheck, Listener, ListenerAction, LogGroup, Peer, Port,
    PortMapping, RetentionDays, SecurityGroup, SubnetConfiguration, SubnetType, TargetGroup, Vpc,
};
use provisio_core::{App, DeployContext, DeployEnvironment, Token};
use serde_json::json;
use tempfile::tempdir;

fn dev_app() -> App {
    let conf = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf"));
    let environment = DeployEnvironment::new("dev", "111122223333", "us-east-1").unwrap();
    let props = PropertiesLoader::new(conf).load_pair("dev").unwrap();
    App::new(DeployContext::from_properties(environment, props))
}

fn network(app: &mut App) -> provisio_constructs::VpcRef {
    app.stack("foundation", |scope| {
        Vpc::new("vpc", "10.10.0.0/16".parse().unwrap())
            .with_subnet(SubnetConfiguration::new("Public", SubnetType::Public, 24))
            .with_subnet(SubnetConfiguration::new("Private", SubnetType::Private, 24))
            .add(scope)
    })
    .unwrap()
}

#[test]
fn test_vpc_reference_becomes_import_and_export() {
    let mut app = dev_app();
    let vpc = network(&mut app);

    app.stack("db", |scope| {
        let group = SecurityGroup::new("db-security-group", &vpc).add(scope)?;
        group.add_ingress_rule(
            scope,
            "db-from-vpc",
            &Peer::ipv4("10.10.0.0/16"),
            Port::Tcp(5432),
            "postgres from vpc",
        )
    })
    .unwrap();

    let assembly = app.assemble().unwrap();

    let db = assembly.template("nm-dev-db").unwrap();
    assert_eq!(
        db["Resources"]["DbSecurityGroup"]["Properties"]["VpcId"],
        json!({ "Fn::ImportValue": "nm-dev-foundation:ExportsOutputRefVpc" })
    );

    let foundation = assembly.template("nm-dev-foundation").unwrap();
    assert_eq!(
        foundation["Outputs"]["ExportsOutputRefVpc"]["Export"]["Name"],
        json!("nm-dev-foundation:ExportsOutputRefVpc")
    );

    let db_manifest = assembly
        .manifest
        .stacks
        .iter()
        .find(|s| s.name == "db")
        .unwrap();
    assert_eq!(db_manifest.dependencies, vec!["nm-dev-foundation".to_string()]);
}

#[test]
fn test_fargate_service_behind_load_balancer() {
    let mut app = dev_app();
    let vpc = network(&mut app);

    let bucket = app
        .stack("s3", |scope| {
            Bucket::new("alb-logs")
                .with_name("nm-dev-alb-logs")
                .block_public_access()
                .add(scope)
        })
        .unwrap();

    app.stack("fargate-service", |scope| {
        let lb = ApplicationLoadBalancer::new("alb", &vpc)
            .internet_facing()
            .with_access_logs(&bucket)
            .add(scope)?;
        let target = TargetGroup::new("backend-tg", &vpc, 8000)
            .with_health_check(HealthCheck::new("/health"))
            .add(scope)?;
        let listener = Listener::http("http-listener", &lb, 80, ListenerAction::Forward(target.clone()))
            .add(scope)?;

        let logs = LogGroup::new("backend-logs")
            .with_retention(RetentionDays::OneWeek)
            .add(scope)?;
        let mut api = ContainerDefinition::new("api", Token::literal("backend:latest"));
        api.port_mappings.push(PortMapping {
            container_port: 8000,
            host_port: None,
            protocol: Default::default(),
        });
        api.log_group = Some(logs);

        let cluster = EcsCluster::new("cluster").add(scope)?;
        let task = FargateTaskDefinition::new("backend-task-def", 2048, 1024)
            .with_container(api)
            .add(scope)?;
        let service_group = SecurityGroup::new("backend-sg", &vpc).add(scope)?;
        FargateService::new("backend-service", &cluster, &task)
            .with_security_group(&service_group)
            .in_subnet_group(&vpc, "Private")
            .with_target_group(&target, &listener)
            .add(scope)
    })
    .unwrap();

    let dir = tempdir().unwrap();
    let assembly = app.synth(dir.path()).unwrap();
    assert!(dir.path().join("nm-dev-fargate-service.template.json").exists());

    let template = assembly.template("nm-dev-fargate-service").unwrap();
    let resources = &template["Resources"];
    assert_eq!(resources["Alb"]["Properties"]["Scheme"], json!("internet-facing"));
    assert_eq!(resources["Alb"]["DependsOn"], json!(["AlbLogsPolicy"]));
    assert_eq!(resources["AlbLogsPolicy"]["Type"], json!("AWS::S3::BucketPolicy"));

    let service = &resources["BackendService"];
    assert_eq!(service["DependsOn"], json!(["HttpListener"]));
    assert_eq!(
        service["Properties"]["LoadBalancers"][0]["ContainerPort"],
        json!(8000)
    );
    assert_eq!(
        service["Properties"]["NetworkConfiguration"]["AwsvpcConfiguration"]["Subnets"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );

    let container = &resources["BackendTaskDef"]["Properties"]["ContainerDefinitions"][0];
    assert_eq!(
        container["LogConfiguration"]["Options"]["awslogs-stream-prefix"],
        json!("api")
    );
}
