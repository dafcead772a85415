//! Applies hotswappable changes with bounded concurrency.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cloud::HotswapServices;
use crate::error::{DeployError, HotswapError, Result};
use crate::report::SharedReporter;

use super::change::HotswapOperation;

/// Max hotswap operations in flight at once.
pub const MAX_CONCURRENT_HOTSWAPS: usize = 10;

/// User agent prefix of hotswap service calls.
const USER_AGENT_PREFIX: &str = "halldyll-hotswap/success-";

/// Applies every operation and waits for all of them.
///
/// Operations run concurrently, at most [`MAX_CONCURRENT_HOTSWAPS`] at a time
/// and in no particular order. A failing operation does not cancel the
/// others.
///
/// # Errors
///
/// Returns the first error, in operation order, once every operation has
/// finished.
pub async fn apply_hotswaps(
    operations: &[HotswapOperation],
    services: &Arc<dyn HotswapServices>,
    reporter: &SharedReporter,
) -> Result<()> {
    if operations.is_empty() {
        return Ok(());
    }
    info!("Applying {} hotswap operations", operations.len());

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_HOTSWAPS));
    let mut handles = Vec::with_capacity(operations.len());

    for operation in operations {
        let sem = Arc::clone(&semaphore);
        let operation = operation.clone();
        let services = Arc::clone(services);
        let reporter = Arc::clone(reporter);
        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|e| DeployError::Internal(e.to_string()))?;
            apply_one(&operation, services.as_ref(), &reporter).await
        }));
    }

    let mut first_error = None;
    for handle in handles {
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(DeployError::Internal(format!("hotswap task failed: {e}"))));
        if let Err(e) = outcome
            && first_error.is_none()
        {
            first_error = Some(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}

async fn apply_one(
    operation: &HotswapOperation,
    services: &dyn HotswapServices,
    reporter: &SharedReporter,
) -> Result<()> {
    let tagged = services.with_user_agent_suffix(&format!("{USER_AGENT_PREFIX}{}", operation.service));

    if !operation.resource_names.is_empty() {
        reporter.info("hotswapping resources:");
        for name in &operation.resource_names {
            reporter.info(&format!("   {name}"));
        }
    }

    debug!(
        "Hotswapping {} ({}) through {}",
        operation.logical_id, operation.resource_type, operation.service
    );
    operation
        .apply
        .apply(tagged.as_ref())
        .await
        .map_err(normalize_waiter_error)?;

    for name in &operation.resource_names {
        reporter.info(&format!("{name} hotswapped!"));
    }
    Ok(())
}

/// Rewrites waiter timeouts and aborts into a readable message.
fn normalize_waiter_error(error: DeployError) -> DeployError {
    let DeployError::Hotswap(HotswapError::Waiter {
        exit,
        state,
        reason,
        observed_responses,
    }) = error
    else {
        return error;
    };

    let reason = reason.map(|r| format!(". {r}")).unwrap_or_default();
    let observed = observed_responses
        .iter()
        .map(|(message, count)| format!("  - {message} ({count})"))
        .collect::<Vec<_>>()
        .join("\n");
    let observed = if observed.is_empty() {
        String::new()
    } else {
        format!(" Observed responses:\n{observed}")
    };

    HotswapError::NotInExpectedState {
        exit,
        message: format!(
            "Resource is not in the expected state due to waiter status: {state}{reason}.{observed}"
        ),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WaiterExit;
    use crate::hotswap::change::HotswapApply;
    use crate::report::{Level, RecordingReporter};
    use crate::testing::FakeServices;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Publish(String);

    #[async_trait]
    impl HotswapApply for Publish {
        async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
            services.publish_version(&self.0).await.map(|_| ())
        }
    }

    struct WaiterTimeout;

    #[async_trait]
    impl HotswapApply for WaiterTimeout {
        async fn apply(&self, _services: &dyn HotswapServices) -> Result<()> {
            Err(HotswapError::Waiter {
                exit: WaiterExit::Timeout,
                state: String::from("TIMEOUT"),
                reason: Some(String::from("Service did not stabilize")),
                observed_responses: BTreeMap::from([(String::from("InProgress"), 3)]),
            }
            .into())
        }
    }

    fn operation(name: &str, apply: Arc<dyn HotswapApply>) -> HotswapOperation {
        HotswapOperation {
            logical_id: name.to_string(),
            resource_type: String::from("AWS::Lambda::Function"),
            service: String::from("lambda"),
            resource_names: vec![format!("Lambda Function '{name}'")],
            props_changed: vec![String::from("Code")],
            apply,
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fake = FakeServices::new().with_delay(Duration::from_millis(20));
        let services: Arc<dyn HotswapServices> = Arc::new(fake.clone());
        let reporter: SharedReporter = Arc::new(RecordingReporter::new());
        let operations: Vec<HotswapOperation> = (0..25)
            .map(|i| operation(&format!("fn{i}"), Arc::new(Publish(format!("fn{i}")))))
            .collect();

        apply_hotswaps(&operations, &services, &reporter)
            .await
            .expect("hotswap should succeed");

        assert_eq!(fake.calls().len(), 25);
        assert!(fake.max_in_flight() <= MAX_CONCURRENT_HOTSWAPS);
        assert!(fake.max_in_flight() > 1);
        assert!(
            fake.user_agents()
                .iter()
                .all(|agent| agent == "halldyll-hotswap/success-lambda")
        );
    }

    #[tokio::test]
    async fn test_failure_waits_for_all_operations() {
        let fake = FakeServices::new().failing("PublishVersion");
        let services: Arc<dyn HotswapServices> = Arc::new(fake.clone());
        let recorder = Arc::new(RecordingReporter::new());
        let reporter: SharedReporter = recorder.clone();
        let operations = vec![
            operation("a", Arc::new(Publish(String::from("a")))),
            operation("b", Arc::new(Publish(String::from("b")))),
        ];

        let err = apply_hotswaps(&operations, &services, &reporter)
            .await
            .expect_err("hotswap should fail");

        assert!(err.to_string().contains("injected failure"));
        assert_eq!(fake.calls().len(), 2);
        assert!(recorder.contains(Level::Info, "hotswapping resources:"));
        assert!(!recorder.contains(Level::Info, "hotswapped!"));
    }

    #[tokio::test]
    async fn test_waiter_errors_are_normalized() {
        let services: Arc<dyn HotswapServices> = Arc::new(FakeServices::new());
        let recorder = Arc::new(RecordingReporter::new());
        let reporter: SharedReporter = recorder.clone();
        let operations = vec![operation("a", Arc::new(WaiterTimeout))];

        let err = apply_hotswaps(&operations, &services, &reporter)
            .await
            .expect_err("hotswap should fail");

        assert_eq!(
            err.to_string(),
            "Hotswap error: Resource is not in the expected state due to waiter status: \
             TIMEOUT. Service did not stabilize. Observed responses:\n  - InProgress (3)"
        );
    }

    #[tokio::test]
    async fn test_success_announces_resources() {
        let services: Arc<dyn HotswapServices> = Arc::new(FakeServices::new());
        let recorder = Arc::new(RecordingReporter::new());
        let reporter: SharedReporter = recorder.clone();
        let operations = vec![operation("a", Arc::new(Publish(String::from("a"))))];

        apply_hotswaps(&operations, &services, &reporter)
            .await
            .expect("hotswap should succeed");

        assert!(recorder.contains(Level::Info, "   Lambda Function 'a'"));
        assert!(recorder.contains(Level::Info, "Lambda Function 'a' hotswapped!"));
    }
}
