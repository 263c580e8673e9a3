//! Object storage.

use provisio_constructs::{Bucket, BucketRef, StringParameter};
use provisio_core::{CoreResult, StackScope};

pub const STACK_NAME: &str = "s3";

/// Days objects are kept in either bucket.
pub const EXPIRATION_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct StorageOutputs {
    pub data_bucket: BucketRef,
    /// Destination of load balancer access logs
    pub lb_log_bucket: BucketRef,
}

pub fn build(scope: &mut StackScope<'_>) -> CoreResult<StorageOutputs> {
    scope.set_description("Private object storage buckets");
    let data_bucket = private_bucket(scope, "data")?;
    StringParameter::named("ssm-s3-data-bucket-name", data_bucket.name.clone()).publish(scope)?;

    let lb_log_bucket = private_bucket(scope, "lb-logs")?;

    Ok(StorageOutputs {
        data_bucket,
        lb_log_bucket,
    })
}

fn private_bucket(scope: &mut StackScope<'_>, name: &str) -> CoreResult<BucketRef> {
    let bucket_name = scope.physical_name(name);
    Bucket::new(name)
        .with_name(bucket_name)
        .block_public_access()
        .with_expiration_days(EXPIRATION_DAYS)
        .add(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;
    use serde_json::json;

    #[test]
    fn test_buckets() {
        let mut app = app();
        app.stack(STACK_NAME, build).unwrap();
        let stack = app.stack_named(STACK_NAME).unwrap();

        let data = stack.resource("Data").unwrap();
        assert_eq!(data.property("BucketName"), Some(&json!("nm-dev-data")));
        assert_eq!(
            data.properties["LifecycleConfiguration"]["Rules"][0]["ExpirationInDays"],
            json!(30)
        );
        assert!(stack.resource("LbLogs").is_some());
        assert!(app.store().get("nm-dev-ssm-s3-data-bucket-name").is_some());
    }
}
