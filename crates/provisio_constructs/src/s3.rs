//! Object storage buckets.

use serde_json::json;

use provisio_core::{CoreResult, DeletionPolicy, ResourceRef, StackScope, Token};

use crate::iam::{policy_document, PolicyStatement};

const BUCKET_KIND: &str = "s3-bucket";

/// A bucket to declare.
#[derive(Debug, Clone)]
pub struct Bucket {
    construct_id: String,
    name: Option<String>,
    block_public_access: bool,
    expiration_days: Option<u32>,
}

impl Bucket {
    pub fn new(construct_id: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
            name: None,
            block_public_access: false,
            expiration_days: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Block every form of public access.
    pub fn block_public_access(mut self) -> Self {
        self.block_public_access = true;
        self
    }

    /// Expire objects after `days`.
    pub fn with_expiration_days(mut self, days: u32) -> Self {
        self.expiration_days = Some(days);
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<BucketRef> {
        let mut properties = json!({});
        if let Some(name) = &self.name {
            scope.claim_name(BUCKET_KIND, name)?;
            properties["BucketName"] = json!(name);
        }
        if self.block_public_access {
            properties["PublicAccessBlockConfiguration"] = json!({
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            });
        }
        if let Some(days) = self.expiration_days {
            properties["LifecycleConfiguration"] = json!({
                "Rules": [{ "ExpirationInDays": days, "Status": "Enabled" }],
            });
        }

        let resource = scope.add_resource(&self.construct_id, "AWS::S3::Bucket", properties)?;
        scope.set_deletion_policy(&resource, DeletionPolicy::Retain)?;
        Ok(BucketRef {
            construct_id: self.construct_id,
            name: resource.ref_token(),
            arn: resource.attr("Arn"),
        })
    }
}

/// Handle to a declared bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRef {
    construct_id: String,
    pub name: Token,
    pub arn: Token,
}

impl BucketRef {
    /// ARN pattern matching every object under `prefix`.
    pub fn objects_arn(&self, prefix: &str) -> Token {
        Token::join("", vec![self.arn.clone(), Token::literal(format!("/{prefix}*"))])
    }

    /// Let the load balancer log delivery service write access logs.
    ///
    /// The policy is declared in the scope's stack.
    pub fn allow_access_log_delivery(&self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let account = scope.context().account().to_string();
        let statement = PolicyStatement::allow()
            .with_action("s3:PutObject")
            .with_resource(self.objects_arn(&format!("AWSLogs/{account}/")));
        let mut document = policy_document(scope, &[statement]);
        document["Statement"][0]["Principal"] =
            json!({ "Service": "logdelivery.elasticloadbalancing.amazonaws.com" });
        let bucket = scope.resolve(&self.name);
        scope.add_resource(
            &format!("{}-policy", self.construct_id),
            "AWS::S3::BucketPolicy",
            json!({ "Bucket": bucket, "PolicyDocument": document }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;

    #[test]
    fn test_bucket_properties() {
        let mut app = app();
        app.stack("s3", |scope| {
            Bucket::new("data")
                .with_name("nm-dev-data")
                .block_public_access()
                .with_expiration_days(30)
                .add(scope)
        })
        .unwrap();

        let bucket = app.stacks()[0].resource("Data").unwrap();
        assert_eq!(bucket.property("BucketName"), Some(&json!("nm-dev-data")));
        assert_eq!(
            bucket.properties["LifecycleConfiguration"]["Rules"][0]["ExpirationInDays"],
            json!(30)
        );
        assert_eq!(
            bucket.properties["PublicAccessBlockConfiguration"]["RestrictPublicBuckets"],
            json!(true)
        );
    }

    #[test]
    fn test_access_log_policy_lives_in_consumer_stack() {
        let mut app = app();
        let logs = app
            .stack("s3", |scope| Bucket::new("lb-logs").add(scope))
            .unwrap();
        app.stack("load-balancer", |scope| logs.allow_access_log_delivery(scope))
            .unwrap();

        let stack = app.stack_named("load-balancer").unwrap();
        let policy = stack.resource("LbLogsPolicy").unwrap();
        assert_eq!(
            policy.property("Bucket"),
            Some(&json!({ "Fn::ImportValue": "nm-dev-s3:ExportsOutputRefLbLogs" }))
        );
    }
}
