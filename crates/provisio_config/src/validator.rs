//! Semantic validation of property records.
//!
//! The YAML schema is enforced by serde; this module checks the rules that
//! a type cannot express (address formats, size ordering, naming).

use std::sync::OnceLock;

use regex::Regex;

use crate::cidr::Ipv4Cidr;
use crate::models::{CommonProperties, EnvDepProperties, FargateTaskDef};

/// Smallest and largest subnet prefix accepted by the VPC service.
pub const SUBNET_MASK_RANGE: std::ops::RangeInclusive<u8> = 16..=28;

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("static pattern"))
}

/// Whether `value` is usable as a segment of a resource identifier.
///
/// Identifiers end up in bucket and repository names, which only accept
/// lowercase alphanumerics and dashes.
pub fn is_valid_name_segment(value: &str) -> bool {
    name_pattern().is_match(value)
}

/// Validator for property records.
pub struct PropertiesValidator;

impl PropertiesValidator {
    /// Validate the shared properties.
    pub fn validate_common(props: &CommonProperties) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !is_valid_name_segment(&props.product_prefix) {
            result.add_error(format!(
                "product_prefix '{}' must be lowercase alphanumerics and dashes, starting with a letter",
                props.product_prefix
            ));
        }

        match props.vpc_default_cidr.parse::<Ipv4Cidr>() {
            Ok(vpc) => {
                if !SUBNET_MASK_RANGE.contains(&props.subnet_cidr_mask) {
                    result.add_error(format!(
                        "subnet_cidr_mask {} must be between {} and {}",
                        props.subnet_cidr_mask,
                        SUBNET_MASK_RANGE.start(),
                        SUBNET_MASK_RANGE.end()
                    ));
                } else if props.subnet_cidr_mask < vpc.prefix() {
                    result.add_error(format!(
                        "subnet_cidr_mask {} is wider than vpc_default_cidr {}",
                        props.subnet_cidr_mask, props.vpc_default_cidr
                    ));
                }
            }
            Err(_) => result.add_error(format!(
                "vpc_default_cidr '{}' is not a valid IPv4 CIDR block",
                props.vpc_default_cidr
            )),
        }

        if props.ecr_assume_role_expiration_min == 0 {
            result.add_error("ecr_assume_role_expiration_min must be greater than zero");
        }

        if !props.cd_user_arn.starts_with("arn:") {
            result.add_error(format!(
                "cd_user_arn '{}' must be an ARN",
                props.cd_user_arn
            ));
        }

        result
    }

    /// Validate the environment-specific properties.
    pub fn validate_env(props: &EnvDepProperties) -> ValidationResult {
        let mut result = ValidationResult::new();

        for (i, w) in props.whitelist_ips.iter().enumerate() {
            if w.ip.parse::<Ipv4Cidr>().is_err() {
                result.add_error(format!(
                    "whitelist_ips[{i}].ip '{}' is not a valid IPv4 CIDR block",
                    w.ip
                ));
            }
        }

        for (i, w) in props.eks_cluster_cfg.whitelist_ips.iter().enumerate() {
            if w.ip.parse::<Ipv4Cidr>().is_err() {
                result.add_error(format!(
                    "eks_cluster_cfg.whitelist_ips[{i}].ip '{}' is not a valid IPv4 CIDR block",
                    w.ip
                ));
            }
        }

        if props.eks_host_zone.domain_name.trim().is_empty() {
            result.add_error("eks_host_zone.domain_name cannot be empty");
        }

        for (i, group) in props.eks_cluster_cfg.node_group.iter().enumerate() {
            if group.min_size > group.max_size {
                result.add_error(format!(
                    "eks_cluster_cfg.node_group[{i}] min_size {} exceeds max_size {}",
                    group.min_size, group.max_size
                ));
            }
            if !is_valid_name_segment(&group.id_suffix) {
                result.add_error(format!(
                    "eks_cluster_cfg.node_group[{i}].id_surfix '{}' is not a valid name",
                    group.id_suffix
                ));
            }
        }

        result.merge(Self::validate_task("backend_task_def", &props.backend_task_def));
        result.merge(Self::validate_task("frontend_task_def", &props.frontend_task_def));
        result.merge(Self::validate_task("doc_task_def", &props.doc_task_def));

        result
    }

    fn validate_task(field: &str, task: &FargateTaskDef) -> ValidationResult {
        let mut result = ValidationResult::new();

        for (i, c) in task.container_def_l.iter().enumerate() {
            if c.memory_reservation_mib > c.memory_limit_mib {
                result.add_error(format!(
                    "{field}.container_def_l[{i}] ({}) memory_reservation_mib {} exceeds memory_limit_mib {}",
                    c.name, c.memory_reservation_mib, c.memory_limit_mib
                ));
            }
            if c.memory_limit_mib > task.task_memory_limit_mib {
                result.add_error(format!(
                    "{field}.container_def_l[{i}] ({}) memory_limit_mib {} exceeds task_memory_limit_mib {}",
                    c.name, c.memory_limit_mib, task.task_memory_limit_mib
                ));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common() -> CommonProperties {
        CommonProperties {
            product_prefix: "acme".to_string(),
            vpc_default_cidr: "10.0.0.0/16".to_string(),
            subnet_cidr_mask: 24,
            ecr_assume_role_expiration_min: 60,
            cd_user_arn: "arn:aws:iam::123456789012:user/cd".to_string(),
        }
    }

    #[test]
    fn test_valid_common() {
        let result = PropertiesValidator::validate_common(&common());
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_invalid_prefix_and_cidr() {
        let mut props = common();
        props.product_prefix = "Acme_Corp".to_string();
        props.vpc_default_cidr = "10.0.0.0".to_string();
        let result = PropertiesValidator::validate_common(&props);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_subnet_mask_wider_than_vpc() {
        let mut props = common();
        props.vpc_default_cidr = "10.0.0.0/20".to_string();
        props.subnet_cidr_mask = 18;
        let result = PropertiesValidator::validate_common(&props);
        assert!(!result.valid);
        assert!(result.errors[0].contains("wider"));
    }

    #[test]
    fn test_name_segment() {
        assert!(is_valid_name_segment("acme"));
        assert!(is_valid_name_segment("nm-dev2"));
        assert!(!is_valid_name_segment("2nm"));
        assert!(!is_valid_name_segment(""));
    }
}
