use std::{
    fmt,
    time::{Duration, Instant},
};

use log::{debug, error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::BatchError;

use super::{
    chunk::ChunkOrientedStepBuilder,
    context::ExecutionContext,
    listener::{StepExecutionListener, notify_after_step, notify_before_step},
    parameters::JobParameters,
    partition::{PartitionStepBuilder, Partitioner},
};

/// Status of a step or job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitStatus {
    /// Not started yet, or outcome unknown.
    Unknown,
    /// Currently running.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitStatus::Unknown => "UNKNOWN",
            ExitStatus::Executing => "EXECUTING",
            ExitStatus::Completed => "COMPLETED",
            ExitStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Progress and outcome of one run of a step.
///
/// Counters follow the chunk engine: `read_count` counts items successfully
/// read, `filter_count` items the processor dropped, `write_count` items the
/// writer accepted, and the three skip counters items dropped by the skip
/// policy in each phase.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the step
    pub name: String,
    /// Current status of the step execution
    pub status: ExitStatus,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration: Duration,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of items filtered out by the processor
    pub filter_count: usize,
    /// Number of read errors skipped
    pub read_skip_count: usize,
    /// Number of items skipped because processing failed
    pub process_skip_count: usize,
    /// Number of items skipped because their chunk failed to write
    pub write_skip_count: usize,
    /// Number of committed chunks (or tasklet iterations)
    pub commit_count: usize,
    pub execution_context: ExecutionContext,
    pub job_parameters: JobParameters,
    /// Messages of the errors that failed the step
    pub failures: Vec<String>,
    /// Executions of the partitions run on behalf of this (manager) step
    pub partition_executions: Vec<StepExecution>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: ExitStatus::Unknown,
            start_time: None,
            end_time: None,
            duration: Duration::ZERO,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            execution_context: ExecutionContext::new(),
            job_parameters: JobParameters::new(),
            failures: Vec::new(),
            partition_executions: Vec::new(),
        }
    }

    pub fn with_context(mut self, execution_context: ExecutionContext) -> Self {
        self.execution_context = execution_context;
        self
    }

    pub fn with_parameters(mut self, job_parameters: JobParameters) -> Self {
        self.job_parameters = job_parameters;
        self
    }

    /// Total number of skipped items, all phases included.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Items read but neither written, filtered nor skipped.
    ///
    /// Non-zero only when the step failed mid-chunk: these items are the ones
    /// lost with the failing chunk.
    pub fn unaccounted_count(&self) -> usize {
        self.read_count.saturating_sub(
            self.write_count + self.filter_count + self.process_skip_count + self.write_skip_count,
        )
    }

    /// Adds the counters of a partition execution to this manager execution.
    pub(crate) fn accumulate(&mut self, partition: &StepExecution) {
        self.read_count += partition.read_count;
        self.write_count += partition.write_count;
        self.filter_count += partition.filter_count;
        self.read_skip_count += partition.read_skip_count;
        self.process_skip_count += partition.process_skip_count;
        self.write_skip_count += partition.write_skip_count;
        self.commit_count += partition.commit_count;
    }

    pub(crate) fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
    }
}

/// Counters accumulated while one chunk goes through the engine.
///
/// Contributions are merged into the owning [`StepExecution`] after every
/// chunk, so workers of a multi-threaded step never share counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepContribution {
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
}

impl StepContribution {
    /// Number of source positions this chunk consumed.
    pub fn consumed(&self) -> usize {
        self.read_count + self.read_skip_count
    }

    pub fn merge(&mut self, other: &StepContribution) {
        self.read_count += other.read_count;
        self.write_count += other.write_count;
        self.filter_count += other.filter_count;
        self.read_skip_count += other.read_skip_count;
        self.process_skip_count += other.process_skip_count;
        self.write_skip_count += other.write_skip_count;
    }
}

/// A named unit of work of a job.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Executes the step, updating `step_execution` with its progress.
    ///
    /// # Returns
    /// - `Ok(())`: The step completed successfully
    /// - `Err(BatchError)`: The step failed; `step_execution` holds the counts
    ///   reached and the failure
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Runs a step body between the step listeners and records its outcome.
pub(crate) fn run_step<F>(
    name: &str,
    listeners: &[&dyn StepExecutionListener],
    step_execution: &mut StepExecution,
    body: F,
) -> Result<(), BatchError>
where
    F: FnOnce(&mut StepExecution) -> Result<(), BatchError>,
{
    let start = Instant::now();
    step_execution.start_time = Some(start);
    step_execution.status = ExitStatus::Executing;

    info!("Start of step: {}, id: {}", name, step_execution.id);

    notify_before_step(listeners, step_execution);

    match body(step_execution) {
        Ok(()) => step_execution.status = ExitStatus::Completed,
        Err(error) => {
            error!("Step {} failed: {}", name, error);
            step_execution.status = ExitStatus::Failed;
            step_execution.failures.push(error.to_string());
        }
    }

    notify_after_step(listeners, step_execution);

    step_execution.end_time = Some(Instant::now());
    step_execution.duration = start.elapsed();

    info!(
        "End of step: {}, id: {}, status: {}, read: {}, write: {}, skip: {}",
        name,
        step_execution.id,
        step_execution.status,
        step_execution.read_count,
        step_execution.write_count,
        step_execution.skip_count()
    );

    if step_execution.status == ExitStatus::Completed {
        Ok(())
    } else {
        Err(BatchError::Step(name.to_string()))
    }
}

/// What a tasklet wants the step to do after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet has more work: invoke it again.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single repeatable unit of work, the alternative to the
/// reader/processor/writer decomposition.
///
/// A tasklet tracks its own progress through the step execution it receives,
/// typically its `read_count`.
pub trait Tasklet: Send + Sync {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

/// A [`Tasklet`] backed by a closure. Built with [`tasklet_fn`].
pub struct FnTasklet<F> {
    function: F,
}

impl<F> Tasklet for FnTasklet<F>
where
    F: Fn(&mut StepExecution) -> Result<RepeatStatus, BatchError> + Send + Sync,
{
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        (self.function)(step_execution)
    }
}

/// Wraps a closure into a [`Tasklet`].
pub fn tasklet_fn<F>(function: F) -> FnTasklet<F>
where
    F: Fn(&mut StepExecution) -> Result<RepeatStatus, BatchError> + Send + Sync,
{
    FnTasklet { function }
}

/// A step that invokes a tasklet until it reports [`RepeatStatus::Finished`].
pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    listeners: Vec<&'a dyn StepExecutionListener>,
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        run_step(&self.name, &self.listeners, step_execution, |step_execution| {
            loop {
                let status = self.tasklet.execute(step_execution)?;
                step_execution.commit_count += 1;
                debug!(
                    "Tasklet iteration {} of step {}: {:?}",
                    step_execution.commit_count, self.name, status
                );
                if status == RepeatStatus::Finished {
                    return Ok(());
                }
            }
        })
    }
}

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    listeners: Vec<&'a dyn StepExecutionListener>,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> TaskletStep<'a> {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            listeners: self.listeners,
        }
    }
}

/// Entry point for building every kind of step.
///
/// ```
/// use chunk_batch::core::step::{RepeatStatus, Step, StepBuilder, StepExecution, tasklet_fn};
///
/// let tasklet = tasklet_fn(|_execution: &mut StepExecution| Ok(RepeatStatus::Finished));
/// let step = StepBuilder::new("hello").tasklet(&tasklet).build();
///
/// let mut execution = StepExecution::new(step.name());
/// step.execute(&mut execution).unwrap();
/// assert_eq!(execution.commit_count, 1);
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn tasklet(self, tasklet: &dyn Tasklet) -> TaskletStepBuilder<'_> {
        TaskletStepBuilder {
            name: self.name,
            tasklet,
            listeners: Vec::new(),
        }
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }

    /// Starts a manager step that runs `worker` once per partition.
    pub fn partitioner<'a>(
        self,
        partitioner: &'a dyn Partitioner,
        worker: &'a dyn Step,
    ) -> PartitionStepBuilder<'a> {
        PartitionStepBuilder::new(&self.name, partitioner, worker)
    }
}
