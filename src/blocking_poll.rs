use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ClientError, RetryClass};
use crate::poll::PollPolicy;
use crate::task::{TaskHandle, TaskReport, TaskState};

/// Blocking counterpart of [`crate::TaskQuery`].
pub trait BlockingTaskQuery {
    /// Fetches the current status of the task behind `handle`.
    fn fetch_report(&self, handle: &TaskHandle) -> Result<TaskReport, ClientError>;
}

/// Cancellation signal for blocking polls.
///
/// Cloned flags share one signal: cancel any clone and every poll waiting on
/// the flag wakes up and aborts. The flag stays canceled once tripped.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    canceled: Mutex<bool>,
    signal: Condvar,
}

impl CancelFlag {
    /// Creates a flag in the not-canceled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the flag, waking every poll blocked on it.
    pub fn cancel(&self) {
        let mut canceled = match self.inner.canceled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *canceled = true;
        self.inner.signal.notify_all();
    }

    /// Whether the flag has been tripped.
    pub fn is_canceled(&self) -> bool {
        match self.inner.canceled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Blocks for up to `timeout`, returning early when canceled.
    ///
    /// Returns whether the flag was tripped during (or before) the wait.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let canceled = match self.inner.canceled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *canceled {
            return true;
        }
        match self
            .inner
            .signal
            .wait_timeout_while(canceled, timeout, |canceled| !*canceled)
        {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

/// Polls `handle` through `source` until a terminal state or budget
/// exhaustion, blocking the current thread between queries.
///
/// See [`wait_for_task_blocking_with_cancel`] for the resolution rules.
pub fn wait_for_task_blocking<Q>(
    source: &Q,
    handle: &TaskHandle,
    policy: &PollPolicy,
) -> Result<TaskReport, ClientError>
where
    Q: BlockingTaskQuery + ?Sized,
{
    wait_for_task_blocking_with_cancel(source, handle, policy, &CancelFlag::new())
}

/// Blocking twin of [`crate::wait_for_task_with_cancel`], with identical
/// resolution rules; the wait sleeps on a condvar so cancellation from
/// another thread interrupts it immediately.
pub fn wait_for_task_blocking_with_cancel<Q>(
    source: &Q,
    handle: &TaskHandle,
    policy: &PollPolicy,
    cancel: &CancelFlag,
) -> Result<TaskReport, ClientError>
where
    Q: BlockingTaskQuery + ?Sized,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_canceled() {
            return Err(canceled(handle));
        }

        let outcome = source.fetch_report(handle);
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

        if cancel.wait_timeout(delay) {
            return Err(canceled(handle));
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
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{
        BlockingTaskQuery, CancelFlag, wait_for_task_blocking, wait_for_task_blocking_with_cancel,
    };
    use crate::error::ClientError;
    use crate::poll::PollPolicy;
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

    impl BlockingTaskQuery for ScriptedSource {
        fn fetch_report(&self, _handle: &TaskHandle) -> Result<TaskReport, ClientError> {
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
        TaskHandle::from_location("/mgmt/v1.2/rest/tasks/t-2")
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter(0.0)
    }

    #[test]
    fn resolves_a_pending_task_to_completion() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Running)),
            Ok(report(TaskState::Completed)),
        ]);

        let resolved =
            wait_for_task_blocking(&source, &handle(), &fast_policy()).expect("task completes");

        assert_eq!(resolved.state, TaskState::Completed);
        assert_eq!(source.queries(), 3);
    }

    #[test]
    fn times_out_after_exactly_max_attempts_queries() {
        let source = ScriptedSource::new(vec![
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Pending)),
            Ok(report(TaskState::Pending)),
        ]);
        let policy = fast_policy().with_max_attempts(3);

        let error = wait_for_task_blocking(&source, &handle(), &policy)
            .expect_err("budget must exhaust");

        assert_eq!(source.queries(), 3);
        assert!(matches!(error, ClientError::TaskTimeout { attempts: 3, .. }));
    }

    #[test]
    fn precanceled_flag_aborts_with_zero_queries() {
        let source = ScriptedSource::new(vec![]);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let error =
            wait_for_task_blocking_with_cancel(&source, &handle(), &fast_policy(), &cancel)
                .expect_err("must be canceled");

        assert_eq!(source.queries(), 0);
        assert!(matches!(error, ClientError::Canceled { .. }));
    }

    #[test]
    fn cancel_from_another_thread_interrupts_the_wait() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(report(TaskState::Pending))]));
        let policy = fast_policy()
            .with_initial_delay(Duration::from_secs(30))
            .with_max_delay(Duration::from_secs(30));
        let cancel = CancelFlag::new();
        let started = Instant::now();

        let poller = {
            let source = Arc::clone(&source);
            let cancel = cancel.clone();
            thread::spawn(move || {
                wait_for_task_blocking_with_cancel(&*source, &handle(), &policy, &cancel)
            })
        };

        while source.queries() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();

        let error = poller
            .join()
            .expect("poller thread must not panic")
            .expect_err("must be canceled");

        assert_eq!(source.queries(), 1, "no query may fire after cancel");
        assert!(matches!(error, ClientError::Canceled { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancel must interrupt the wait instead of sleeping it out"
        );
    }
}
