//! Scheduling record of a single configuration

use chrono::{DateTime, Utc};
use remotefetch_core::domain::configuration::FetchConfiguration;
use remotefetch_core::domain::report::FetchRunReport;
use remotefetch_core::domain::task::{FetchTaskSnapshot, TaskState};

/// Live state of a fetch task, owned by the executor's task table
#[derive(Debug)]
pub(crate) struct FetchTask {
    pub configuration: FetchConfiguration,
    pub enabled: bool,
    /// Run number of the run in flight
    pub running: Option<u64>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_report: Option<FetchRunReport>,
}

impl FetchTask {
    /// New enabled tasks are due immediately
    pub fn new(configuration: FetchConfiguration) -> Self {
        let enabled = configuration.enabled;
        Self {
            configuration,
            enabled,
            running: None,
            next_run_at: enabled.then(Utc::now),
            run_count: 0,
            last_report: None,
        }
    }

    /// Replaces the configuration, keeping the schedule of an enabled task
    pub fn update(&mut self, configuration: FetchConfiguration) {
        let was_enabled = self.enabled;
        self.enabled = configuration.enabled;
        self.configuration = configuration;

        if !self.enabled {
            self.next_run_at = None;
        } else if !was_enabled || self.next_run_at.is_none() {
            self.next_run_at = Some(Utc::now());
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_run_at = None;
    }

    pub fn state(&self) -> TaskState {
        if self.running.is_some() {
            TaskState::Running
        } else if !self.enabled {
            TaskState::Disabled
        } else {
            TaskState::Idle
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.running.is_none()
            && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// Moves the task to Running
    ///
    /// Returns the new run number, or the number of the run already in
    /// flight as the error.
    pub fn try_begin(&mut self) -> Result<u64, u64> {
        if let Some(running) = self.running {
            return Err(running);
        }
        let run_number = self.run_count + 1;
        self.running = Some(run_number);
        Ok(run_number)
    }

    /// Records a finished run and schedules the next one
    pub fn finish(&mut self, report: &FetchRunReport) {
        self.running = None;
        self.run_count += 1;
        self.next_run_at = self
            .enabled
            .then(|| self.configuration.next_run_after(report.started_at));
        self.last_report = Some(report.clone());
    }

    pub fn snapshot(&self) -> FetchTaskSnapshot {
        FetchTaskSnapshot {
            configuration_id: self.configuration.id,
            state: self.state(),
            enabled: self.enabled,
            next_run_at: self.next_run_at,
            run_count: self.run_count,
            last_report: self.last_report.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use remotefetch_core::domain::configuration::ComponentConfig;
    use remotefetch_core::domain::report::RunReportBuilder;
    use std::time::Duration;

    fn configuration() -> FetchConfiguration {
        FetchConfiguration::new(
            "task-test",
            "carbon.super",
            ComponentConfig::new("directory"),
            ComponentConfig::new("file"),
        )
        .with_interval(Duration::from_secs(60))
    }

    #[test]
    fn test_new_task_is_due() {
        let task = FetchTask::new(configuration());
        assert_eq!(task.state(), TaskState::Idle);
        assert!(task.is_due(Utc::now()));

        let disabled = FetchTask::new(configuration().disabled());
        assert_eq!(disabled.state(), TaskState::Disabled);
        assert!(disabled.next_run_at.is_none());
        assert!(!disabled.is_due(Utc::now()));
    }

    #[test]
    fn test_try_begin_is_exclusive() {
        let mut task = FetchTask::new(configuration());
        assert_eq!(task.try_begin(), Ok(1));
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.is_due(Utc::now()));
        assert_eq!(task.try_begin(), Err(1));
    }

    #[test]
    fn test_finish_schedules_from_run_start() {
        let mut task = FetchTask::new(configuration());
        let run = task.try_begin().unwrap();
        let report = RunReportBuilder::start(task.configuration.id, run).complete();

        task.finish(&report);

        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.run_count, 1);
        assert_eq!(
            task.next_run_at,
            Some(report.started_at + TimeDelta::seconds(60))
        );
        assert_eq!(task.try_begin(), Ok(2));
    }

    #[test]
    fn test_update_keeps_schedule() {
        let mut task = FetchTask::new(configuration());
        let later = Utc::now() + TimeDelta::seconds(600);
        task.next_run_at = Some(later);

        let changed = task.configuration.clone().with_interval(Duration::from_secs(5));
        task.update(changed);
        assert_eq!(task.next_run_at, Some(later));

        task.update(task.configuration.clone().disabled());
        assert_eq!(task.state(), TaskState::Disabled);
        assert!(task.next_run_at.is_none());

        // Re-enabling makes it due right away
        let mut enabled = task.configuration.clone();
        enabled.enabled = true;
        task.update(enabled);
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn test_disabled_while_running() {
        let mut task = FetchTask::new(configuration());
        let run = task.try_begin().unwrap();
        task.disable();
        assert_eq!(task.state(), TaskState::Running);

        task.finish(&RunReportBuilder::start(task.configuration.id, run).complete());
        assert_eq!(task.state(), TaskState::Disabled);
        assert!(task.next_run_at.is_none());
        assert_eq!(task.run_count, 1);
    }
}
