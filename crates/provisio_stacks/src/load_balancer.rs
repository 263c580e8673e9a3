//! Public load balancer of the Fargate compute path.

use provisio_constructs::{
    ARecord, ApplicationLoadBalancer, BucketRef, HostedZoneRef, LoadBalancerRef, SecurityGroupRef,
    StringParameter, VpcRef,
};
use provisio_core::{CoreResult, StackScope};

pub const STACK_NAME: &str = "load-balancer";

#[derive(Debug, Clone, Copy)]
pub struct LoadBalancerInputs<'a> {
    pub vpc: &'a VpcRef,
    pub log_bucket: &'a BucketRef,
    pub hosted_zone: &'a HostedZoneRef,
    pub security_group: &'a SecurityGroupRef,
}

#[derive(Debug, Clone)]
pub struct LoadBalancerOutputs {
    pub load_balancer: LoadBalancerRef,
}

pub fn build(
    scope: &mut StackScope<'_>,
    inputs: LoadBalancerInputs<'_>,
) -> CoreResult<LoadBalancerOutputs> {
    scope.set_description("Public application load balancer");
    let load_balancer = ApplicationLoadBalancer::new("lb", inputs.vpc)
        .internet_facing()
        .with_security_group(inputs.security_group)
        .with_access_logs(inputs.log_bucket)
        .add(scope)?;
    StringParameter::named("ssm-lb-dns-name", load_balancer.dns_name.clone()).publish(scope)?;

    let zone = inputs.hosted_zone;
    ARecord::new("alias-record-domain-name", zone, load_balancer.alias_target()).add(scope)?;
    ARecord::new("alias-record-domain-name-www", zone, load_balancer.alias_target())
        .with_record_name(format!("www.{}", zone.zone_name))
        .add(scope)?;

    Ok(LoadBalancerOutputs { load_balancer })
}
