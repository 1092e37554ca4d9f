use std::time::{Duration, Instant};

use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    flow::{Decision, Flow, FlowBuilder, FlowContext, Outcome, Split},
    listener::{JobExecutionListener, notify_after_job, notify_before_job},
    parameters::JobParameters,
    step::{ExitStatus, Step, StepExecution},
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job runs its steps with the parameters it is launched with and reports
/// the outcome in a [`JobExecution`]. A job whose step failed still returns
/// `Ok`: the failure is in the execution's status.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the job until it reaches a terminal status.
    fn run(&self, parameters: JobParameters) -> JobResult<JobExecution>;
}

/// The outcome of one run of a job.
#[derive(Debug)]
pub struct JobExecution {
    pub id: Uuid,
    pub name: String,
    pub status: ExitStatus,
    pub parameters: JobParameters,
    /// The time when the job started executing
    pub start: Instant,
    /// The time when the job finished executing
    pub end: Option<Instant>,
    /// The total duration of the job execution
    pub duration: Duration,
    /// Executions of every step that ran, in completion order
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(name: &str, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: ExitStatus::Unknown,
            parameters,
            start: Instant::now(),
            end: None,
            duration: Duration::ZERO,
            step_executions: Vec::new(),
        }
    }

    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|execution| execution.name == name)
    }

    /// Step executions that did not complete.
    pub fn failed_steps(&self) -> Vec<&StepExecution> {
        self.step_executions
            .iter()
            .filter(|execution| execution.status != ExitStatus::Completed)
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.step_executions.iter().map(|e| e.read_count).sum()
    }

    pub fn write_count(&self) -> usize {
        self.step_executions.iter().map(|e| e.write_count).sum()
    }

    pub fn skip_count(&self) -> usize {
        self.step_executions.iter().map(StepExecution::skip_count).sum()
    }

    /// Process exit code for this execution: 0 when completed, 1 when failed,
    /// 2 when the status is still unknown.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ExitStatus::Completed => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Unknown | ExitStatus::Executing => 2,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            duration_ms: self.duration.as_millis(),
            read_count: self.read_count(),
            write_count: self.write_count(),
            skip_count: self.skip_count(),
            steps: self
                .step_executions
                .iter()
                .map(|execution| StepSummary {
                    name: execution.name.clone(),
                    status: execution.status,
                    read_count: execution.read_count,
                    write_count: execution.write_count,
                    filter_count: execution.filter_count,
                    skip_count: execution.skip_count(),
                    commit_count: execution.commit_count,
                    failures: execution.failures.clone(),
                })
                .collect(),
        }
    }
}

/// Serializable report of a job execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub status: ExitStatus,
    pub duration_ms: u128,
    pub read_count: usize,
    pub write_count: usize,
    pub skip_count: usize,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub status: ExitStatus,
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub skip_count: usize,
    pub commit_count: usize,
    pub failures: Vec<String>,
}

/// A configured job: a validated flow plus its listeners.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    flow: Flow<'a>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl Job for JobInstance<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, parameters: JobParameters) -> JobResult<JobExecution> {
        let mut execution = JobExecution::new(&self.name, parameters.clone());
        execution.status = ExitStatus::Executing;

        info!(
            "Start of job: {}, id: {}, parameters: {}",
            self.name, self.id, parameters
        );

        notify_before_job(&self.listeners, &execution);

        let context = FlowContext::new(&parameters);
        let outcome = self.flow.run(&context);
        execution.step_executions = context.into_executions();

        let all_completed = execution
            .step_executions
            .iter()
            .all(|step| step.status == ExitStatus::Completed);
        execution.status = if outcome != Outcome::Failed && all_completed {
            ExitStatus::Completed
        } else {
            ExitStatus::Failed
        };

        execution.end = Some(Instant::now());
        execution.duration = execution.start.elapsed();

        notify_after_job(&self.listeners, &execution);

        info!(
            "End of job: {}, id: {}, status: {}, read: {}, write: {}, skip: {}",
            self.name,
            self.id,
            execution.status,
            execution.read_count(),
            execution.write_count(),
            execution.skip_count()
        );

        Ok(execution)
    }
}

/// Builder for creating a job instance.
///
/// ```
/// use chunk_batch::core::job::{Job, JobBuilder};
/// use chunk_batch::core::parameters::JobParameters;
/// use chunk_batch::core::step::{ExitStatus, RepeatStatus, StepBuilder, StepExecution, tasklet_fn};
///
/// let tasklet = tasklet_fn(|_: &mut StepExecution| Ok(RepeatStatus::Finished));
/// let first = StepBuilder::new("first").tasklet(&tasklet).build();
/// let second = StepBuilder::new("second").tasklet(&tasklet).build();
///
/// let job = JobBuilder::new()
///     .name("two-steps")
///     .start(&first)
///     .next(&second)
///     .build()
///     .unwrap();
///
/// let execution = job.run(JobParameters::new()).unwrap();
/// assert_eq!(execution.status, ExitStatus::Completed);
/// assert_eq!(execution.step_executions.len(), 2);
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    flow: Option<FlowBuilder<'a>>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn start(self, step: &'a dyn Step) -> Self {
        self.next(step)
    }

    pub fn next(mut self, step: &'a dyn Step) -> Self {
        self.flow = Some(self.flow_builder().next(step));
        self
    }

    pub fn next_flow(mut self, flow: Flow<'a>) -> Self {
        self.flow = Some(self.flow_builder().next_flow(flow));
        self
    }

    pub fn decision(mut self, decision: Decision<'a>) -> Self {
        self.flow = Some(self.flow_builder().decision(decision));
        self
    }

    pub fn split(mut self, split: Split<'a>) -> Self {
        self.flow = Some(self.flow_builder().split(split));
        self
    }

    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the job, checking its flow: no empty flow or split, and every
    /// decider outcome mapped to exactly declared transitions.
    pub fn build(mut self) -> JobResult<JobInstance<'a>> {
        let name = self.name.take().unwrap_or_else(build_name);
        let flow = self.flow_builder().build();
        flow.validate()?;

        Ok(JobInstance {
            id: Uuid::new_v4(),
            name,
            flow,
            listeners: self.listeners,
        })
    }

    fn flow_builder(&mut self) -> FlowBuilder<'a> {
        let name = self.name.clone().unwrap_or_else(|| "job".to_string());
        self.flow.take().unwrap_or_else(|| FlowBuilder::new(&name))
    }
}
