//! Composition of the deployment's stacks.
//!
//! Stacks are constructed once each, in dependency order. Upstream handles
//! are passed to downstream stacks directly; the first failure aborts the
//! run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use provisio_core::{App, CoreError, CoreResult};

use crate::database::{self, DatabaseOutputs};
use crate::eks_service::{self, EksInputs, EksOutputs};
use crate::fargate_service::{self, FargateInputs, FargateOutputs};
use crate::foundation::{self, FoundationOutputs};
use crate::load_balancer::{self, LoadBalancerInputs, LoadBalancerOutputs};
use crate::storage::{self, StorageOutputs};

/// Where containers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeTarget {
    /// Managed Kubernetes cluster
    #[default]
    Eks,
    /// Fargate services behind a public load balancer
    Fargate,
}

impl ComputeTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeTarget::Eks => "eks",
            ComputeTarget::Fargate => "fargate",
        }
    }

    /// Stack names constructed for this target, in order.
    pub fn stack_names(&self) -> Vec<&'static str> {
        let mut names = vec![foundation::STACK_NAME, storage::STACK_NAME, database::STACK_NAME];
        match self {
            ComputeTarget::Eks => names.push(eks_service::STACK_NAME),
            ComputeTarget::Fargate => {
                names.push(load_balancer::STACK_NAME);
                names.push(fargate_service::STACK_NAME);
            }
        }
        names
    }
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ComputeTarget {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eks" => Ok(ComputeTarget::Eks),
            "fargate" => Ok(ComputeTarget::Fargate),
            other => Err(CoreError::InvalidReference(format!(
                "unknown compute target '{other}', expected eks or fargate"
            ))),
        }
    }
}

/// Outputs of the compute stacks.
#[derive(Debug, Clone)]
pub enum ComputeOutputs {
    Eks(EksOutputs),
    Fargate {
        load_balancer: LoadBalancerOutputs,
        service: FargateOutputs,
    },
}

/// Handles of every constructed stack.
#[derive(Debug, Clone)]
pub struct Composition {
    pub foundation: FoundationOutputs,
    pub storage: StorageOutputs,
    pub database: DatabaseOutputs,
    pub compute: ComputeOutputs,
}

/// Construct every stack of the deployment into `app`.
pub fn compose(app: &mut App, target: ComputeTarget) -> CoreResult<Composition> {
    info!(
        "Composing {} stacks for {} ({} compute)",
        target.stack_names().len(),
        app.context().environment.name,
        target
    );

    let foundation = app.stack(foundation::STACK_NAME, foundation::build)?;
    let storage = app.stack(storage::STACK_NAME, storage::build)?;
    let database = app.stack(database::STACK_NAME, |scope| {
        database::build(scope, &foundation.vpc)
    })?;

    let compute = match target {
        ComputeTarget::Eks => {
            let eks = app.stack(eks_service::STACK_NAME, |scope| {
                eks_service::build(
                    scope,
                    EksInputs {
                        vpc: &foundation.vpc,
                        database: &database.database,
                        elb_security_group: &foundation.elb_security_group,
                    },
                )
            })?;
            ComputeOutputs::Eks(eks)
        }
        ComputeTarget::Fargate => {
            let load_balancer = app.stack(load_balancer::STACK_NAME, |scope| {
                load_balancer::build(
                    scope,
                    LoadBalancerInputs {
                        vpc: &foundation.vpc,
                        log_bucket: &storage.lb_log_bucket,
                        hosted_zone: &foundation.hosted_zone,
                        security_group: &foundation.elb_security_group,
                    },
                )
            })?;
            let service = app.stack(fargate_service::STACK_NAME, |scope| {
                fargate_service::build(
                    scope,
                    FargateInputs {
                        vpc: &foundation.vpc,
                        database: &database.database,
                        load_balancer: &load_balancer.load_balancer,
                        repositories: &foundation.repositories,
                        certificate: &foundation.domain_certificate,
                        ecr_readonly_role: &foundation.ecr_readonly_role,
                    },
                )
            })?;
            ComputeOutputs::Fargate {
                load_balancer,
                service,
            }
        }
    };

    info!("Composition complete: {} stacks", app.stacks().len());
    Ok(Composition {
        foundation,
        storage,
        database,
        compute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;

    #[test]
    fn test_compute_target_parsing() {
        assert_eq!("eks".parse::<ComputeTarget>().unwrap(), ComputeTarget::Eks);
        assert_eq!("Fargate".parse::<ComputeTarget>().unwrap(), ComputeTarget::Fargate);
        assert!("lambda".parse::<ComputeTarget>().is_err());
        assert_eq!(ComputeTarget::default(), ComputeTarget::Eks);
    }

    #[test]
    fn test_eks_composition_order() {
        let mut app = app();
        let composition = compose(&mut app, ComputeTarget::Eks).unwrap();
        assert!(matches!(composition.compute, ComputeOutputs::Eks(_)));

        let names: Vec<&str> = app.stacks().iter().map(|s| s.name()).collect();
        assert_eq!(names, ComputeTarget::Eks.stack_names());
        assert_eq!(app.log().attempted(), names);
    }

    #[test]
    fn test_fargate_composition_order() {
        let mut app = app();
        compose(&mut app, ComputeTarget::Fargate).unwrap();

        let names: Vec<&str> = app.stacks().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["foundation", "s3", "db", "load-balancer", "fargate-service"]
        );
        assert!(app.stack_named(eks_service::STACK_NAME).is_none());
    }
}
