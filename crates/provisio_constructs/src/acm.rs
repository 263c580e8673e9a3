//! DNS-validated certificates.

use serde_json::json;

use provisio_core::{CoreResult, StackScope, Token};

use crate::route53::HostedZoneRef;

#[derive(Debug, Clone)]
pub struct Certificate {
    construct_id: String,
    domain_name: String,
    validation_zone: Option<HostedZoneRef>,
}

impl Certificate {
    pub fn new(construct_id: impl Into<String>, domain_name: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
            domain_name: domain_name.into(),
            validation_zone: None,
        }
    }

    /// Validate ownership through records in `zone`.
    pub fn with_dns_validation(mut self, zone: &HostedZoneRef) -> Self {
        self.validation_zone = Some(zone.clone());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<CertificateRef> {
        let mut properties = json!({
            "DomainName": self.domain_name,
            "ValidationMethod": "DNS",
        });
        if let Some(zone) = &self.validation_zone {
            let zone_id = scope.resolve(&zone.id);
            properties["DomainValidationOptions"] = json!([{
                "DomainName": self.domain_name,
                "HostedZoneId": zone_id,
            }]);
        }
        let resource = scope.add_resource(
            &self.construct_id,
            "AWS::CertificateManager::Certificate",
            properties,
        )?;
        Ok(CertificateRef {
            arn: resource.ref_token(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRef {
    pub arn: Token,
}
