//! Log groups.

use serde_json::json;

use provisio_core::{CoreResult, DeletionPolicy, StackScope, Token};

/// Retention periods accepted by the logging service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDays {
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl RetentionDays {
    pub fn days(&self) -> u32 {
        match self {
            RetentionDays::ThreeDays => 3,
            RetentionDays::OneWeek => 7,
            RetentionDays::OneMonth => 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogGroup {
    construct_id: String,
    name: Option<String>,
    retention: RetentionDays,
    removal: DeletionPolicy,
}

impl LogGroup {
    pub fn new(construct_id: impl Into<String>) -> Self {
        Self {
            construct_id: construct_id.into(),
            name: None,
            retention: RetentionDays::OneWeek,
            removal: DeletionPolicy::Retain,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retention(mut self, retention: RetentionDays) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_removal_policy(mut self, policy: DeletionPolicy) -> Self {
        self.removal = policy;
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<LogGroupRef> {
        let mut properties = json!({ "RetentionInDays": self.retention.days() });
        if let Some(name) = &self.name {
            scope.claim_name("log-group", name)?;
            properties["LogGroupName"] = json!(name);
        }
        let resource = scope.add_resource(&self.construct_id, "AWS::Logs::LogGroup", properties)?;
        scope.set_deletion_policy(&resource, self.removal)?;
        Ok(LogGroupRef {
            name: resource.ref_token(),
            arn: resource.attr("Arn"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogGroupRef {
    pub name: Token,
    pub arn: Token,
}
