use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, RetryClass};
use crate::task::{TaskHandle, TaskReport, TaskState};

/// Default first wait between status queries.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default cap on a single wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default growth factor between waits.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default jitter fraction added on top of each wait.
pub const DEFAULT_JITTER: f64 = 0.1;
/// Default overall polling budget.
pub const DEFAULT_MAX_TOTAL_WAIT: Duration = Duration::from_secs(600);

/// Capability the poller needs from its environment: a fresh status
/// snapshot per query.
///
/// Implemented by [`crate::ApiClient`]; tests supply scripted sources.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    /// Fetches the current status of the task behind `handle`.
    async fn fetch_report(&self, handle: &TaskHandle) -> Result<TaskReport, ClientError>;
}

/// Wait/backoff configuration for task polling.
///
/// The base delay sequence starts at `initial_delay`, grows by
/// `backoff_multiplier` per wait, and is capped at `max_delay`; it is
/// monotonically non-decreasing. Jitter is additive on top of the base
/// delay, bounded by `jitter * delay`, and never affects the invariant.
///
/// The budget is exhausted when either `max_attempts` queries have been
/// made or the accumulated wait would exceed `max_total_wait`, whichever
/// fires first. Defaults (documented, since the appliance vendor publishes
/// none): 1s initial, 30s cap, multiplier 2.0, jitter 0.1, 10 minute
/// overall budget, no attempt cap.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// First wait between queries.
    pub initial_delay: Duration,
    /// Upper bound for a single wait.
    pub max_delay: Duration,
    /// Growth factor per wait; values below 1.0 are treated as 1.0.
    pub backoff_multiplier: f64,
    /// Fraction of the base delay added as random jitter (0.0 disables).
    pub jitter: f64,
    /// Maximum number of status queries, when set.
    pub max_attempts: Option<u32>,
    /// Maximum accumulated wait time, when set.
    pub max_total_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_attempts: None,
            max_total_wait: Some(DEFAULT_MAX_TOTAL_WAIT),
        }
    }
}

impl PollPolicy {
    /// Sets the first wait between queries.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the upper bound for a single wait.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor per wait.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Caps the number of status queries.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Caps the accumulated wait time.
    #[must_use]
    pub fn with_max_total_wait(mut self, budget: Duration) -> Self {
        self.max_total_wait = Some(budget);
        self
    }

    /// Base delay before jitter for a given wait (0-indexed).
    pub fn base_delay(&self, wait_index: u32) -> Duration {
        let exponent = i32::try_from(wait_index).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Base delay for a given wait with bounded random jitter applied.
    pub fn jittered_delay(&self, wait_index: u32) -> Duration {
        self.jittered(self.base_delay(wait_index))
    }

    /// Adds bounded random jitter to a base delay.
    fn jittered(&self, base: Duration) -> Duration {
        let bound = base.as_secs_f64() * self.jitter;
        if bound <= 0.0 {
            return base;
        }
        base + Duration::from_secs_f64(rand::rng().random_range(0.0..bound))
    }
}

/// Polls `handle` through `source` until a terminal state or budget
/// exhaustion.
///
/// See [`wait_for_task_with_cancel`] for the resolution rules; this variant
/// simply cannot be canceled.
pub async fn wait_for_task<Q>(
    source: &Q,
    handle: &TaskHandle,
    policy: &PollPolicy,
) -> Result<TaskReport, ClientError>
where
    Q: TaskQuery + ?Sized,
{
    wait_for_task_with_cancel(source, handle, policy, &CancellationToken::new()).await
}

/// Polls `handle` through `source` until one of:
///
/// - the task completes or is canceled server-side: `Ok(report)`, returned
///   immediately on the observing query;
/// - the server reports the task failed: [`ClientError::TaskFailed`] with
///   the server detail, never conflated with a timeout;
/// - the policy budget runs out first: [`ClientError::TaskTimeout`];
/// - `cancel` fires: [`ClientError::Canceled`], checked before every query
///   and at every wait boundary, with no retry afterwards.
///
/// Transient query errors (network, 5xx, 429) are retried on the same
/// backoff schedule and count against the same budget; permanent errors
/// abort polling on first sight. A rate-limit `Retry-After` hint replaces
/// the computed delay for that cycle only.
pub async fn wait_for_task_with_cancel<Q>(
    source: &Q,
    handle: &TaskHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<TaskReport, ClientError>
where
    Q: TaskQuery + ?Sized,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(canceled(handle));
        }

        let outcome = source.fetch_report(handle).await;
        attempts += 1;

        let mut delay_override = None;
        match outcome {
            Ok(report) => match report.state {
                TaskState::Completed | TaskState::Canceled => return Ok(report),
                TaskState::Failed => {
                    return Err(ClientError::TaskFailed {
                        task_id: handle.task_id().to_owned(),
                        detail: report.error_detail(),
                    });
                }
                TaskState::Pending | TaskState::Running => {
                    tracing::debug!(
                        task = handle.task_id(),
                        attempts,
                        state = ?report.state,
                        progress = report.progress,
                        "task still in progress"
                    );
                }
            },
            Err(error) => match error.retry_class() {
                RetryClass::Permanent => return Err(error),
                RetryClass::Transient => {
                    delay_override = error.retry_after();
                    tracing::warn!(
                        task = handle.task_id(),
                        attempts,
                        error = %error,
                        "transient error while polling, will retry"
                    );
                }
            },
        }

        if let Some(max_attempts) = policy.max_attempts {
            if attempts >= max_attempts {
                return Err(timeout(handle, attempts, started));
            }
        }

        let delay = delay_override.unwrap_or_else(|| policy.jittered_delay(attempts - 1));
        if let Some(budget) = policy.max_total_wait {
            if started.elapsed() + delay > budget {
                return Err(timeout(handle, attempts, started));
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(canceled(handle)),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

fn canceled(handle: &TaskHandle) -> ClientError {
    ClientError::Canceled {
        task_id: handle.task_id().to_owned(),
    }
}

fn timeout(handle: &TaskHandle, attempts: u32, started: Instant) -> ClientError {
    ClientError::TaskTimeout {
        task_id: handle.task_id().to_owned(),
        attempts,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::{PollPolicy, TaskQuery, wait_for_task, wait_for_task_with_cancel};
    use crate::error::ClientError;
    use crate::task::{TaskHandle, TaskReport, TaskState};

    struct ScriptedSource {
        steps: Mutex<VecDeque<Result<TaskReport, ClientError>>>,
        queries: AtomicU32,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Result<TaskReport, ClientError>>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                queries: AtomicU32::new(0),
            }
        }

        fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskQuery for ScriptedSource {
        async fn fetch_report(&self, _handle: &TaskHandle) -> Result<TaskReport, ClientError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.steps
                .lock()
                .expect("script lock")
                .pop_front()
                .expect("script exhausted")
        }
    }

    fn report(state: TaskState) -> TaskReport {
        TaskReport {
            state,
            progress: None,
            status_message: None,
            result: None,
            error: None,
        }
    }

    fn handle() -> TaskHandle {
        TaskHandle::from_location("/mgmt/v1.2/rest/tasks/t-1")
    }

    fn no_jitter_policy() -> PollPolicy {
        PollPolicy::default().with_jitter(0.0)
    }

    fn transient_503() -> ClientError {
        ClientError::HttpStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            retry_after: None,
            body: String::new(),
        }
    }

    #[test]
    fn base_delays_are_non_decreasing_and_capped() {
        let policies = [
            PollPolicy::default(),
            PollPolicy::default()
                .with_initial_delay(Duration::from_millis(250))
                .with_backoff_multiplier(3.0)
                .with_max_delay(Duration::from_secs(5)),
            // Multiplier below 1.0 must not shrink the sequence.
            PollPolicy::default().with_backoff_multiplier(0.5),
        ];

        for policy in policies {
            let mut previous = Duration::ZERO;
            for wait_index in 0..16 {
                let delay = policy.base_delay(wait_index);
                assert!(delay >= previous, "sequence must be non-decreasing");
                assert!(delay <= policy.max_delay, "sequence must be capped");
                previous = delay;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pending_completed_resolves_after_two_waits() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Completed)),
        ]);
        let started = Instant::now();

        let result = wait_for_task(&source, &handle(), &no_jitter_policy()).await;

        let resolved = result.expect("task completes");
        assert_eq!(resolved.state, TaskState::Completed);
        assert_eq!(source.queries(), 3);
        // Waits are exactly 1s then 2s without jitter.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_does_not_change_the_number_of_waits() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Completed)),
        ]);
        let policy = PollPolicy::default().with_jitter(0.5);
        let started = Instant::now();

        let result = wait_for_task(&source, &handle(), &policy).await;

        assert!(result.is_ok());
        assert_eq!(source.queries(), 3);
        // Base waits 1s + 2s, jittered by at most 50% each.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() <= Duration::from_secs_f64(4.5));
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_times_out_after_exactly_max_attempts_queries() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Running)),
            Ok(report(TaskState::Running)),
        ]);
        let policy = no_jitter_policy().with_max_attempts(3);

        let error = wait_for_task(&source, &handle(), &policy)
            .await
            .expect_err("budget must exhaust");

        assert_eq!(source.queries(), 3);
        match error {
            ClientError::TaskTimeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_transient_error_is_retried_then_resolves() {
        let source = ScriptedSource::new(vec![
            Err(transient_503()),
            Ok(report(TaskState::Completed)),
        ]);

        let result = wait_for_task(&source, &handle(), &no_jitter_policy()).await;

        assert!(result.is_ok(), "transient error must be absorbed");
        assert_eq!(source.queries(), 2, "exactly one retry");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_surfaces_on_first_query_with_zero_retries() {
        let source = ScriptedSource::new(vec![Err(ClientError::HttpStatus {
            status: StatusCode::NOT_FOUND,
            retry_after: None,
            body: "no such task".to_owned(),
        })]);

        let error = wait_for_task(&source, &handle(), &no_jitter_policy())
            .await
            .expect_err("must abort");

        assert_eq!(source.queries(), 1);
        match error {
            ClientError::HttpStatus { status, .. } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_failure_is_reported_as_task_failed_with_detail() {
        let failed = TaskReport {
            error: Some("disk full".to_owned()),
            ..report(TaskState::Failed)
        };
        let source = ScriptedSource::new(vec![Ok(report(TaskState::Running)), Ok(failed)]);

        let error = wait_for_task(&source, &handle(), &no_jitter_policy())
            .await
            .expect_err("failed task must raise");

        match error {
            ClientError::TaskFailed { task_id, detail } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(detail, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_canceled_task_is_a_terminal_result_not_an_error() {
        let source = ScriptedSource::new(vec![Ok(report(TaskState::Canceled))]);

        let resolved = wait_for_task(&source, &handle(), &no_jitter_policy())
            .await
            .expect("server-side cancel is terminal");

        assert_eq!(resolved.state, TaskState::Canceled);
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_the_delay_for_one_cycle() {
        let source = ScriptedSource::new(vec![
            Err(ClientError::HttpStatus {
                status: StatusCode::TOO_MANY_REQUESTS,
                retry_after: Some(Duration::from_secs(5)),
                body: String::new(),
            }),
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Completed)),
        ]);
        let started = Instant::now();

        let result = wait_for_task(&source, &handle(), &no_jitter_policy()).await;

        assert!(result.is_ok());
        // 5s from the hint, then back to the computed 2s schedule.
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn total_wait_budget_exhausts_before_the_next_wait_would_overrun() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Pending)),
        ]);
        let policy = no_jitter_policy()
            .with_initial_delay(Duration::from_secs(4))
            .with_max_total_wait(Duration::from_secs(10));

        let error = wait_for_task(&source, &handle(), &policy)
            .await
            .expect_err("budget must exhaust");

        // 4s wait fits the 10s budget, 4s + 8s does not.
        assert_eq!(source.queries(), 2);
        assert!(matches!(error, ClientError::TaskTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_the_first_query_fires_no_queries() {
        let source = ScriptedSource::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = wait_for_task_with_cancel(&source, &handle(), &no_jitter_policy(), &cancel)
            .await
            .expect_err("must be canceled");

        assert_eq!(source.queries(), 0);
        assert!(matches!(error, ClientError::Canceled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_wait_aborts_before_the_next_query() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(report(TaskState::Pending))]));
        let policy = no_jitter_policy().with_initial_delay(Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let poller = {
            let source = Arc::clone(&source);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                wait_for_task_with_cancel(&*source, &handle(), &policy, &cancel).await
            })
        };

        // Let the poller issue its one query and enter the wait, then cancel.
        while source.queries() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let error = poller
            .await
            .expect("poller task must not panic")
            .expect_err("must be canceled");

        assert_eq!(source.queries(), 1, "no query may fire after cancel");
        assert!(
            matches!(error, ClientError::Canceled { .. }),
            "cancel must not be reported as timeout or failure"
        );
    }
}
