//! Ordered `(delay, action)` steps driven by a single tokio task.

use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub type ScheduledAction = Box<dyn FnMut() + Send + 'static>;

struct ScheduledStep {
    delay: Duration,
    action: ScheduledAction,
}

/// Each step waits its delay, measured from the previous step, then runs.
#[derive(Default)]
pub struct Schedule {
    steps: Vec<ScheduledStep>,
    repeat: bool,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, delay: Duration, action: impl FnMut() + Send + 'static) -> Self {
        self.steps.push(ScheduledStep {
            delay,
            action: Box::new(action),
        });
        self
    }

    /// Start over after the last step until cancelled.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Must be called inside a tokio runtime.
    pub fn start(self) -> ScheduleHandle {
        if self.steps.is_empty() {
            return ScheduleHandle { task: None };
        }
        let Schedule { mut steps, repeat } = self;
        // a zero-delay cycle would never yield
        let repeat = repeat && steps.iter().any(|step| !step.delay.is_zero());

        let task = tokio::spawn(async move {
            loop {
                for step in steps.iter_mut() {
                    tokio::time::sleep(step.delay).await;
                    (step.action)();
                }
                if !repeat {
                    break;
                }
            }
            debug!("Schedule finished");
        });
        ScheduleHandle { task: Some(task) }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field(
                "delays",
                &self.steps.iter().map(|s| s.delay).collect::<Vec<_>>(),
            )
            .field("repeat", &self.repeat)
            .finish()
    }
}

/// Stops the schedule when cancelled or dropped.
#[derive(Debug)]
pub struct ScheduleHandle {
    task: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Schedule cancelled");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
