//! Integration tests for property loading.

use std::fs;
use std::path::Path;

use provisio_config::{
    CommonProperties, ConfigError, EnvDepProperties, ImageRef, PropertiesLoader, Protocol,
};
use tempfile::tempdir;

const COMMON: &str = include_str!("../../../conf/comm_props.yaml");
const ENV_DEV: &str = include_str!("../../../conf/env_props.dev.yaml");

fn write_conf(dir: &Path, common: &str, env: &str) {
    fs::write(dir.join("comm_props.yaml"), common).unwrap();
    fs::write(dir.join("env_props.dev.yaml"), env).unwrap();
}

#[test]
fn test_load_pair_round_trips_fields() {
    let dir = tempdir().unwrap();
    write_conf(dir.path(), COMMON, ENV_DEV);

    let props = PropertiesLoader::new(dir.path()).load_pair("dev").unwrap();

    assert_eq!(props.common.product_prefix, "nm");
    assert_eq!(props.common.vpc_default_cidr, "10.0.0.0/16");
    assert_eq!(props.common.subnet_cidr_mask, 24);
    assert_eq!(props.common.ecr_assume_role_expiration_min, 60);
    assert_eq!(props.common.cd_user_arn, "arn:aws:iam::123456789012:user/github-cd");

    let env = &props.env;
    assert_eq!(env.whitelist_ips.len(), 2);
    assert!(env.whitelist_ips[0].enable_80);
    assert!(!env.whitelist_ips[1].enable_80);
    assert_eq!(env.ebs_storage.general_storage.volume_gb, 20);
    assert_eq!(env.eks_host_zone.domain_name, "dev.example.com");
    assert_eq!(env.eks_cluster_cfg.node_group.len(), 2);
    assert_eq!(env.eks_cluster_cfg.node_group[1].id_suffix, "worker");
    assert_eq!(
        env.eks_cluster_cfg.node_group[1].taints.get("dedicated").map(String::as_str),
        Some("worker")
    );

    let backend = &env.backend_task_def;
    assert_eq!(backend.port, 8443);
    assert_eq!(backend.container_def_l.len(), 3);
    assert_eq!(backend.container_def_l[0].protocol, Protocol::Tcp);
    assert_eq!(
        backend.container_def_l[1].image,
        Some(ImageRef::External("redis".to_string()))
    );
    let ulimit = backend.container_def_l[2].ulimits.as_ref().unwrap();
    assert_eq!(ulimit.name, "nofile");
    assert_eq!(ulimit.hard_limit, 65536);
}

#[test]
fn test_missing_vpc_default_cidr_fails() {
    let dir = tempdir().unwrap();
    let common: String = COMMON
        .lines()
        .filter(|l| !l.starts_with("vpc_default_cidr"))
        .collect::<Vec<_>>()
        .join("\n");
    write_conf(dir.path(), &common, ENV_DEV);

    let err = PropertiesLoader::new(dir.path()).load_pair("dev").unwrap_err();
    match err {
        ConfigError::Schema { path, message } => {
            assert!(path.ends_with("comm_props.yaml"));
            assert!(message.contains("vpc_default_cidr"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_wrong_leaf_type_fails() {
    let dir = tempdir().unwrap();
    let common = COMMON.replace("subnet_cidr_mask: 24", "subnet_cidr_mask: twenty-four");
    write_conf(dir.path(), &common, ENV_DEV);

    let err = CommonProperties::load(dir.path().join("comm_props.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Schema { .. }));
}

#[test]
fn test_semantic_violations_are_all_reported() {
    let dir = tempdir().unwrap();
    let env = ENV_DEV
        .replace("ip: 203.0.113.10/32\n    entity: office\n  - ip: 198.51.100.0/24\n    entity: vpn\n    enable_80", "ip: not-an-ip\n    entity: office\n  - ip: 198.51.100.0/24\n    entity: vpn\n    enable_80")
        .replace("min_size: 0\n      max_size: 4", "min_size: 5\n      max_size: 4");
    write_conf(dir.path(), COMMON, &env);

    let err = EnvDepProperties::load(dir.path().join("env_props.dev.yaml")).unwrap_err();
    match err {
        ConfigError::Invalid { violations, .. } => {
            assert_eq!(violations.len(), 2, "{violations:?}");
            assert!(violations.iter().any(|v| v.contains("whitelist_ips[0]")));
            assert!(violations.iter().any(|v| v.contains("min_size 5")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_missing_env_file_fails_before_common() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("comm_props.yaml"), COMMON).unwrap();

    let err = PropertiesLoader::new(dir.path()).load_pair("staging").unwrap_err();
    match err {
        ConfigError::NotFound(path) => assert!(path.ends_with("env_props.staging.yaml")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_eks_whitelist_csv() {
    let env: EnvDepProperties = serde_yaml::from_str(ENV_DEV).unwrap();
    assert_eq!(env.eks_whitelist_csv(), "203.0.113.10/32,198.51.100.0/24");
}

#[test]
fn test_empty_node_groups_and_containers_load() {
    let dir = tempdir().unwrap();
    let mut env: EnvDepProperties = serde_yaml::from_str(ENV_DEV).unwrap();
    env.eks_cluster_cfg.node_group.clear();
    env.doc_task_def.container_def_l.clear();
    write_conf(dir.path(), COMMON, &serde_yaml::to_string(&env).unwrap());

    let loaded = EnvDepProperties::load(dir.path().join("env_props.dev.yaml")).unwrap();
    assert!(loaded.eks_cluster_cfg.node_group.is_empty());
    assert!(loaded.doc_task_def.container_def_l.is_empty());
    assert_eq!(loaded.backend_task_def, env.backend_task_def);
    assert_eq!(
        loaded.backend_task_def.container_def_l[1].image,
        Some(ImageRef::External("redis".to_string()))
    );
}
