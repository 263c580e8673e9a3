//! Hosted zones and alias records.

use serde_json::json;

use provisio_core::{CoreResult, ResourceRef, StackScope, Token};

/// An existing hosted zone.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedZoneRef {
    pub id: Token,
    pub zone_name: String,
}

impl HostedZoneRef {
    pub fn from_attributes(id: impl Into<String>, zone_name: impl Into<String>) -> Self {
        Self {
            id: Token::literal(id.into()),
            zone_name: zone_name.into(),
        }
    }
}

/// Target of an alias record.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasTarget {
    pub dns_name: Token,
    pub hosted_zone_id: Token,
}

/// An `A` alias record.
#[derive(Debug, Clone)]
pub struct ARecord {
    construct_id: String,
    zone: HostedZoneRef,
    record_name: Option<String>,
    target: AliasTarget,
}

impl ARecord {
    pub fn new(construct_id: impl Into<String>, zone: &HostedZoneRef, target: AliasTarget) -> Self {
        Self {
            construct_id: construct_id.into(),
            zone: zone.clone(),
            record_name: None,
            target,
        }
    }

    /// Record name; defaults to the zone apex.
    pub fn with_record_name(mut self, name: impl Into<String>) -> Self {
        self.record_name = Some(name.into());
        self
    }

    fn fqdn(&self) -> String {
        let name = self.record_name.as_deref().unwrap_or(&self.zone.zone_name);
        if name.ends_with('.') {
            name.to_string()
        } else {
            format!("{name}.")
        }
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let fqdn = self.fqdn();
        let zone_id = scope.resolve(&self.zone.id);
        let dns_name = scope.resolve(&self.target.dns_name);
        let target_zone = scope.resolve(&self.target.hosted_zone_id);
        scope.add_resource(
            &self.construct_id,
            "AWS::Route53::RecordSet",
            json!({
                "Name": fqdn,
                "Type": "A",
                "HostedZoneId": zone_id,
                "AliasTarget": { "DNSName": dns_name, "HostedZoneId": target_zone },
            }),
        )
    }
}
