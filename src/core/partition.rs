use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{info, warn};

use crate::BatchError;

use super::{
    context::ExecutionContext,
    listener::StepExecutionListener,
    step::{ExitStatus, Step, StepExecution, run_step},
    task_executor::TaskExecutor,
};

/// Context key holding the first id of a partition.
pub const MIN_ID_KEY: &str = "minId";
/// Context key holding the last id of a partition.
pub const MAX_ID_KEY: &str = "maxId";
/// Default number of partitions, and of workers running them.
pub const DEFAULT_GRID_SIZE: usize = 8;

/// Splits the input domain of a step into partitions.
///
/// Each partition is described by the execution context its worker step will
/// start with, keyed by a partition name.
pub trait Partitioner: Send + Sync {
    fn partition(&self, grid_size: usize) -> Result<BTreeMap<String, ExecutionContext>, BatchError>;
}

/// An inclusive range of ids. A range whose `min_id` is greater than its
/// `max_id` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min_id: i64,
    pub max_id: i64,
}

impl IdRange {
    pub fn new(min_id: i64, max_id: i64) -> Self {
        Self { min_id, max_id }
    }

    pub fn empty() -> Self {
        Self { min_id: 1, max_id: 0 }
    }

    /// Reads the range a partitioner stored in `context`.
    pub fn from_context(context: &ExecutionContext) -> Result<Self, BatchError> {
        Ok(Self {
            min_id: context.require_i64(MIN_ID_KEY)?,
            max_id: context.require_i64(MAX_ID_KEY)?,
        })
    }

    pub fn into_context(self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.put(MIN_ID_KEY, self.min_id);
        context.put(MAX_ID_KEY, self.max_id);
        context
    }

    pub fn is_empty(&self) -> bool {
        self.min_id > self.max_id
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.max_id.abs_diff(self.min_id) + 1
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.min_id <= id && id <= self.max_id
    }
}

/// Divides `[min_id, max_id]` into `grid_size` contiguous ranges of equal
/// length, the last one absorbing the remainder.
///
/// When the domain has fewer ids than `grid_size`, the first ranges hold one
/// id each and the others are empty.
///
/// ```
/// use chunk_batch::core::partition::{IdRange, split_range};
///
/// let ranges = split_range(1, 10, 3).unwrap();
/// assert_eq!(
///     ranges,
///     vec![IdRange::new(1, 3), IdRange::new(4, 6), IdRange::new(7, 10)]
/// );
/// ```
pub fn split_range(min_id: i64, max_id: i64, grid_size: usize) -> Result<Vec<IdRange>, BatchError> {
    if grid_size == 0 {
        return Err(BatchError::Configuration(
            "grid size must be at least 1".to_string(),
        ));
    }
    if min_id > max_id {
        return Err(BatchError::Configuration(format!(
            "cannot partition the empty id domain [{min_id}, {max_id}]"
        )));
    }

    let domain = i128::from(max_id) - i128::from(min_id) + 1;
    let grid = grid_size as i128;
    let size = domain / grid;
    let mut ranges = Vec::with_capacity(grid_size);

    if size == 0 {
        for index in 0..grid {
            if index < domain {
                let id = (i128::from(min_id) + index) as i64;
                ranges.push(IdRange::new(id, id));
            } else {
                ranges.push(IdRange::empty());
            }
        }
        return Ok(ranges);
    }

    let mut start = i128::from(min_id);
    for index in 0..grid {
        let end = if index == grid - 1 {
            i128::from(max_id)
        } else {
            start + size - 1
        };
        ranges.push(IdRange::new(start as i64, end as i64));
        start = end + 1;
    }

    Ok(ranges)
}

type BoundsFn = Box<dyn Fn() -> Result<(i64, i64), BatchError> + Send + Sync>;

/// Partitions a contiguous id domain into equal ranges.
///
/// Partitions are named `partition0`, `partition1`, ... with the index
/// zero-padded to the width of the largest one, so that name order is
/// partition order. Each carries its
/// bounds under [`MIN_ID_KEY`] and [`MAX_ID_KEY`]. Ids missing from the
/// underlying data are not a problem: a worker simply finds fewer rows in its
/// range.
pub struct RangePartitioner {
    bounds: BoundsFn,
}

impl RangePartitioner {
    pub fn new(min_id: i64, max_id: i64) -> Self {
        Self {
            bounds: Box::new(move || Ok((min_id, max_id))),
        }
    }

    /// Resolves the domain bounds when partitioning, typically by querying the
    /// smallest and largest id of the source.
    pub fn from_fn<F>(bounds: F) -> Self
    where
        F: Fn() -> Result<(i64, i64), BatchError> + Send + Sync + 'static,
    {
        Self {
            bounds: Box::new(bounds),
        }
    }
}

impl Partitioner for RangePartitioner {
    fn partition(&self, grid_size: usize) -> Result<BTreeMap<String, ExecutionContext>, BatchError> {
        let (min_id, max_id) = (self.bounds)()?;
        let ranges = split_range(min_id, max_id, grid_size)?;
        let width = (grid_size - 1).to_string().len();

        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| (format!("partition{index:0width$}"), range.into_context()))
            .collect())
    }
}

/// Runs one execution of a worker step per partition on a worker pool.
pub struct PartitionHandler<'a> {
    step: &'a dyn Step,
    executor: TaskExecutor,
    grid_size: usize,
    fail_fast: bool,
}

impl<'a> PartitionHandler<'a> {
    pub fn new(step: &'a dyn Step, executor: TaskExecutor, grid_size: usize) -> Self {
        Self {
            step,
            executor,
            grid_size,
            fail_fast: false,
        }
    }

    /// When set, partitions that have not started yet are abandoned once one
    /// partition has failed. Partitions already running always finish.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Executes the worker step once per partition and returns the partition
    /// executions in partition-name order, blocking until all are done.
    pub fn handle(
        &self,
        manager: &StepExecution,
        partitions: BTreeMap<String, ExecutionContext>,
    ) -> Vec<StepExecution> {
        let failed = AtomicBool::new(false);
        let partitions: Vec<(String, ExecutionContext)> = partitions.into_iter().collect();

        self.executor.map_ordered(&partitions, |(partition, context)| {
            let name = format!("{}:{}", self.step.name(), partition);
            let mut execution = StepExecution::new(&name)
                .with_context(context.clone())
                .with_parameters(manager.job_parameters.clone());

            if self.fail_fast && failed.load(Ordering::SeqCst) {
                warn!("Partition {} not started: a sibling partition failed", name);
                execution.failures.push("not started after a sibling partition failed".to_string());
                return execution;
            }

            if self.step.execute(&mut execution).is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            execution
        })
    }
}

/// A manager step that splits its input with a [`Partitioner`] and aggregates
/// the executions of its worker step.
///
/// The manager ends `FAILED` if any partition did not complete. Its counters
/// are the sums over all partitions.
pub struct PartitionStep<'a> {
    name: String,
    partitioner: &'a dyn Partitioner,
    handler: PartitionHandler<'a>,
    listeners: Vec<&'a dyn StepExecutionListener>,
}

impl Step for PartitionStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        run_step(&self.name, &self.listeners, step_execution, |manager| {
            let partitions = self.partitioner.partition(self.handler.grid_size())?;
            if partitions.is_empty() {
                return Err(BatchError::Configuration(format!(
                    "partitioner of step {} produced no partitions",
                    self.name
                )));
            }

            info!(
                "Step {}: dispatching {} partitions",
                self.name,
                partitions.len()
            );

            let executions = self.handler.handle(manager, partitions);

            let mut failed = Vec::new();
            for execution in &executions {
                manager.accumulate(execution);
                if execution.status != ExitStatus::Completed {
                    failed.push(execution.name.clone());
                    manager.failures.extend(
                        execution
                            .failures
                            .iter()
                            .map(|failure| format!("{}: {}", execution.name, failure)),
                    );
                }
            }
            manager.partition_executions = executions;

            if failed.is_empty() {
                Ok(())
            } else {
                Err(BatchError::Step(failed.join(", ")))
            }
        })
    }
}

pub struct PartitionStepBuilder<'a> {
    name: String,
    partitioner: &'a dyn Partitioner,
    worker: &'a dyn Step,
    grid_size: usize,
    task_executor: Option<TaskExecutor>,
    fail_fast: bool,
    listeners: Vec<&'a dyn StepExecutionListener>,
}

impl<'a> PartitionStepBuilder<'a> {
    pub fn new(name: &str, partitioner: &'a dyn Partitioner, worker: &'a dyn Step) -> Self {
        Self {
            name: name.to_string(),
            partitioner,
            worker,
            grid_size: DEFAULT_GRID_SIZE,
            task_executor: None,
            fail_fast: false,
            listeners: Vec::new(),
        }
    }

    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Pool the partitions run on. Defaults to a pool of `grid_size` threads.
    pub fn task_executor(mut self, executor: TaskExecutor) -> Self {
        self.task_executor = Some(executor);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<PartitionStep<'a>, BatchError> {
        if self.grid_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} needs a grid size of at least 1",
                self.name
            )));
        }

        let executor = match self.task_executor {
            Some(executor) => executor,
            None => TaskExecutor::new(self.grid_size)?,
        };

        Ok(PartitionStep {
            name: self.name,
            partitioner: self.partitioner,
            handler: PartitionHandler::new(self.worker, executor, self.grid_size)
                .fail_fast(self.fail_fast),
            listeners: self.listeners,
        })
    }
}
