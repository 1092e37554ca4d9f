use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::{BatchError, error::ErrorKind};

use super::{
    item::{ItemProcessor, ItemReader, ItemWriter},
    listener::StepExecutionListener,
    retry::{DEFAULT_MAX_ATTEMPTS, RetryListener, RetryPolicy, RetryTemplate},
    skip::{SkipDecision, SkipPolicy},
    step::{Step, StepContribution, StepExecution, run_step},
    task_executor::{DEFAULT_CONCURRENCY, TaskExecutor},
};

/// Execution-context key under which a chunk step records how many input
/// positions it has consumed.
pub const RESTART_OFFSET_KEY: &str = "batch.restart.offset";

/// Default number of concurrent chunk workers of a multi-threaded step.
pub const DEFAULT_THROTTLE_LIMIT: usize = DEFAULT_CONCURRENCY;

/// Phase a chunk is in while it goes through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Reading,
    Transforming,
    Writing,
    Committed,
    Fault,
}

/// Items read for one chunk, and whether the source ran dry while reading them.
#[derive(Debug)]
pub struct Chunk<T> {
    items: Vec<T>,
    exhausted: bool,
}

impl<T> Chunk<T> {
    pub fn new(items: Vec<T>, exhausted: bool) -> Self {
        Self { items, exhausted }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when the source signalled end-of-sequence during this chunk.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Drives one chunk at a time through read, transform and write, applying the
/// step's skip and retry rules.
///
/// The engine is shared by reference between the workers of a multi-threaded
/// step. Reading is serialized so that the items of one chunk are always a
/// contiguous run of the source.
struct ChunkEngine<'e, I, O> {
    step_name: &'e str,
    reader: &'e dyn ItemReader<I>,
    processor: &'e dyn ItemProcessor<I, O>,
    writer: &'e dyn ItemWriter<O>,
    chunk_size: usize,
    skip_policy: &'e SkipPolicy,
    retry: Option<&'e RetryTemplate>,
    skip_count: AtomicUsize,
    read_lock: Mutex<()>,
}

impl<I, O> ChunkEngine<'_, I, O> {
    /// Runs a single chunk end to end.
    ///
    /// The contribution holds whatever was counted before a fatal error, so
    /// the caller can merge it either way. `Ok(true)` means the source is
    /// exhausted.
    fn run_chunk(&self) -> (StepContribution, Result<bool, BatchError>) {
        let mut contribution = StepContribution::default();
        let result = self.drive(&mut contribution);
        if result.is_err() {
            self.transition(ChunkState::Fault);
        }
        (contribution, result)
    }

    fn drive(&self, contribution: &mut StepContribution) -> Result<bool, BatchError> {
        self.transition(ChunkState::Reading);
        let chunk = self.read_chunk(contribution)?;
        if chunk.is_empty() {
            return Ok(chunk.is_exhausted());
        }

        self.transition(ChunkState::Transforming);
        let outputs = self.process_chunk(chunk.items(), contribution)?;

        self.transition(ChunkState::Writing);
        self.write_chunk(outputs, contribution)?;

        self.transition(ChunkState::Committed);
        Ok(chunk.is_exhausted())
    }

    fn read_chunk(&self, contribution: &mut StepContribution) -> Result<Chunk<I>, BatchError> {
        let _guard = self.read_lock.lock();
        let mut items = Vec::with_capacity(self.chunk_size);

        while items.len() < self.chunk_size {
            match self.reader.read() {
                Ok(Some(item)) => {
                    items.push(item);
                    contribution.read_count += 1;
                }
                Ok(None) => return Ok(Chunk::new(items, true)),
                Err(error) => match self.skip_policy.try_skip(&error, &self.skip_count, 1) {
                    SkipDecision::Skip => {
                        warn!("Step {}: skipping unreadable item: {}", self.step_name, error);
                        contribution.read_skip_count += 1;
                    }
                    decision => return Err(self.skip_policy.into_fatal(decision, error)),
                },
            }
        }

        Ok(Chunk::new(items, false))
    }

    fn process_chunk(
        &self,
        items: &[I],
        contribution: &mut StepContribution,
    ) -> Result<Vec<O>, BatchError> {
        let results = match self.retry {
            Some(retry) => items
                .iter()
                .map(|item| retry.execute(|_| self.processor.process(item)))
                .collect(),
            None => self.processor.process_chunk(items),
        };

        let mut outputs = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => contribution.filter_count += 1,
                Err(error) => match self.skip_policy.try_skip(&error, &self.skip_count, 1) {
                    SkipDecision::Skip => {
                        warn!("Step {}: skipping item: {}", self.step_name, error);
                        contribution.process_skip_count += 1;
                    }
                    decision => return Err(self.skip_policy.into_fatal(decision, error)),
                },
            }
        }

        Ok(outputs)
    }

    fn write_chunk(
        &self,
        outputs: Vec<O>,
        contribution: &mut StepContribution,
    ) -> Result<(), BatchError> {
        if outputs.is_empty() {
            return Ok(());
        }

        match self.writer.write(&outputs) {
            Ok(()) => {
                self.writer.flush()?;
                contribution.write_count += outputs.len();
                Ok(())
            }
            Err(error) => {
                match self
                    .skip_policy
                    .try_skip(&error, &self.skip_count, outputs.len())
                {
                    SkipDecision::Skip => {
                        warn!(
                            "Step {}: skipping chunk of {} items: {}",
                            self.step_name,
                            outputs.len(),
                            error
                        );
                        contribution.write_skip_count += outputs.len();
                        Ok(())
                    }
                    decision => Err(self.skip_policy.into_fatal(decision, error)),
                }
            }
        }
    }

    fn transition(&self, state: ChunkState) {
        trace!("Step {}: chunk {:?}", self.step_name, state);
    }
}

type ReaderFactory<'a, I> =
    Box<dyn Fn(&StepExecution) -> Result<Box<dyn ItemReader<I> + 'a>, BatchError> + Send + Sync + 'a>;
type WriterFactory<'a, O> =
    Box<dyn Fn(&StepExecution) -> Result<Box<dyn ItemWriter<O> + 'a>, BatchError> + Send + Sync + 'a>;

enum ReaderSource<'a, I> {
    Shared(&'a dyn ItemReader<I>),
    Scoped(ReaderFactory<'a, I>),
}

enum WriterSource<'a, O> {
    Shared(&'a dyn ItemWriter<O>),
    Scoped(WriterFactory<'a, O>),
}

/// A step that processes its input in chunks of `chunk_size` items.
///
/// Readers and writers are either shared for every execution of the step, or
/// created per execution by a factory that sees the execution context. The
/// latter is how a partitioned worker gets a reader bounded to its own range.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    reader: ReaderSource<'a, I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: WriterSource<'a, O>,
    chunk_size: usize,
    skip_policy: SkipPolicy,
    retry: Option<RetryTemplate>,
    listeners: Vec<&'a dyn StepExecutionListener>,
    task_executor: Option<TaskExecutor>,
    throttle_limit: usize,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        run_step(&self.name, &self.listeners, step_execution, |step_execution| {
            self.run(step_execution)
        })
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn run(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let owned_reader;
        let reader: &dyn ItemReader<I> = match &self.reader {
            ReaderSource::Shared(reader) => *reader,
            ReaderSource::Scoped(factory) => {
                owned_reader = factory(step_execution)?;
                &*owned_reader
            }
        };

        let owned_writer;
        let writer: &dyn ItemWriter<O> = match &self.writer {
            WriterSource::Shared(writer) => *writer,
            WriterSource::Scoped(factory) => {
                owned_writer = factory(step_execution)?;
                &*owned_writer
            }
        };

        let engine = ChunkEngine {
            step_name: &self.name,
            reader,
            processor: self.processor,
            writer,
            chunk_size: self.chunk_size,
            skip_policy: &self.skip_policy,
            retry: self.retry.as_ref(),
            skip_count: AtomicUsize::new(step_execution.skip_count()),
            read_lock: Mutex::new(()),
        };

        writer.open()?;

        let result = match &self.task_executor {
            None => self.run_sequential(&engine, step_execution),
            Some(executor) => self.run_concurrent(&engine, executor, step_execution),
        };

        let closed = writer.close();
        result?;
        closed
    }

    fn run_sequential(
        &self,
        engine: &ChunkEngine<'_, I, O>,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let mut offset = step_execution
            .execution_context
            .get_usize(RESTART_OFFSET_KEY)
            .unwrap_or(0);

        if offset > 0 {
            debug!("Step {}: restarting at input offset {}", self.name, offset);
            engine.reader.restart_from(offset)?;
        }

        loop {
            let (contribution, result) = engine.run_chunk();
            step_execution.apply(&contribution);

            let exhausted = result?;

            if contribution.consumed() > 0 {
                step_execution.commit_count += 1;
                offset += contribution.consumed();
                step_execution
                    .execution_context
                    .put(RESTART_OFFSET_KEY, offset);
                debug!(
                    "Step {}: committed chunk {} (read: {}, write: {})",
                    self.name,
                    step_execution.commit_count,
                    step_execution.read_count,
                    step_execution.write_count
                );
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    /// Runs `throttle_limit` workers that each loop over whole chunks until
    /// the source is exhausted or one of them hits a fatal error. Chunks that
    /// are already in flight when that happens are allowed to finish.
    fn run_concurrent(
        &self,
        engine: &ChunkEngine<'_, I, O>,
        executor: &TaskExecutor,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let stop = AtomicBool::new(false);
        let totals = Mutex::new((StepContribution::default(), 0_usize));
        let errors = Mutex::new(Vec::new());

        executor.scope(|scope| {
            for _ in 0..self.throttle_limit {
                scope.spawn(|_| {
                    while !stop.load(Ordering::SeqCst) {
                        let (contribution, result) = engine.run_chunk();
                        {
                            let mut totals = totals.lock();
                            totals.0.merge(&contribution);
                            if result.is_ok() && contribution.consumed() > 0 {
                                totals.1 += 1;
                            }
                        }
                        match result {
                            Ok(false) => {}
                            Ok(true) => stop.store(true, Ordering::SeqCst),
                            Err(error) => {
                                errors.lock().push(error);
                                stop.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                });
            }
        });

        let (contribution, commits) = totals.into_inner();
        step_execution.apply(&contribution);
        step_execution.commit_count += commits;

        let mut errors = errors.into_inner();
        if errors.len() > 1 {
            warn!(
                "Step {}: {} workers failed, reporting the first error",
                self.name,
                errors.len()
            );
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.swap_remove(0))
        }
    }
}

/// Builder for a [`ChunkOrientedStep`].
///
/// ```
/// use chunk_batch::core::item::PassThroughProcessor;
/// use chunk_batch::core::step::{Step, StepBuilder, StepExecution};
/// use chunk_batch::item::list::{ListItemReader, ListItemWriter};
///
/// let reader = ListItemReader::new((1..=25).collect::<Vec<u32>>());
/// let processor = PassThroughProcessor;
/// let writer = ListItemWriter::new();
///
/// let step = StepBuilder::new("copy")
///     .chunk::<u32, u32>(10)
///     .reader(&reader)
///     .processor(&processor)
///     .writer(&writer)
///     .build()
///     .unwrap();
///
/// let mut execution = StepExecution::new(step.name());
/// step.execute(&mut execution).unwrap();
///
/// assert_eq!(execution.write_count, 25);
/// assert_eq!(writer.chunk_sizes(), vec![10, 10, 5]);
/// ```
pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<ReaderSource<'a, I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<WriterSource<'a, O>>,
    chunk_size: usize,
    skip_policy: SkipPolicy,
    retry_policy: RetryPolicy,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
    listeners: Vec<&'a dyn StepExecutionListener>,
    task_executor: Option<TaskExecutor>,
    throttle_limit: usize,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: super::parameters::DEFAULT_CHUNK_SIZE,
            skip_policy: SkipPolicy::default(),
            retry_policy: RetryPolicy::new(DEFAULT_MAX_ATTEMPTS),
            retry_listeners: Vec::new(),
            listeners: Vec::new(),
            task_executor: None,
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(ReaderSource::Shared(reader));
        self
    }

    /// Creates a new reader for every execution of the step.
    pub fn reader_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StepExecution) -> Result<Box<dyn ItemReader<I> + 'a>, BatchError> + Send + Sync + 'a,
    {
        self.reader = Some(ReaderSource::Scoped(Box::new(factory)));
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(WriterSource::Shared(writer));
        self
    }

    /// Creates a new writer for every execution of the step.
    pub fn writer_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StepExecution) -> Result<Box<dyn ItemWriter<O> + 'a>, BatchError> + Send + Sync + 'a,
    {
        self.writer = Some(WriterSource::Scoped(Box::new(factory)));
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Makes errors of `kind` skippable.
    pub fn skip(mut self, kind: ErrorKind) -> Self {
        self.skip_policy = self.skip_policy.skip_on(kind);
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_policy = self.skip_policy.with_skip_limit(skip_limit);
        self
    }

    /// Makes transform errors of `kind` retryable.
    pub fn retry(mut self, kind: ErrorKind) -> Self {
        self.retry_policy = self.retry_policy.retry_on(kind);
        self
    }

    /// Number of attempts one item gets before its error is classified for
    /// skipping.
    pub fn retry_limit(mut self, max_attempts: usize) -> Self {
        self.retry_policy = self.retry_policy.with_max_attempts(max_attempts);
        self
    }

    pub fn retry_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Runs chunks concurrently on `executor`.
    pub fn task_executor(mut self, executor: TaskExecutor) -> Self {
        self.task_executor = Some(executor);
        self
    }

    /// Number of chunk workers when a task executor is set.
    pub fn throttle_limit(mut self, throttle_limit: usize) -> Self {
        self.throttle_limit = throttle_limit;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let missing = |component: &str| {
            BatchError::Configuration(format!("step {} has no {}", self.name, component))
        };

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} needs a chunk size of at least 1",
                self.name
            )));
        }
        if self.task_executor.is_some() && self.throttle_limit == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} needs a throttle limit of at least 1",
                self.name
            )));
        }

        let reader = self.reader.ok_or_else(|| missing("reader"))?;
        let processor = self.processor.ok_or_else(|| missing("processor"))?;
        let writer = self.writer.ok_or_else(|| missing("writer"))?;

        let retry = if self.retry_policy.has_retryable_kinds() {
            let builder = self
                .retry_listeners
                .into_iter()
                .fold(RetryTemplate::builder().policy(self.retry_policy), |builder, listener| {
                    builder.listener(listener)
                });
            Some(builder.build()?)
        } else {
            None
        };

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            retry,
            listeners: self.listeners,
            task_executor: self.task_executor,
            throttle_limit: self.throttle_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        core::{
            item::{ItemReaderResult, PassThroughProcessor, processor_fn, writer_fn},
            step::{ExitStatus, StepBuilder},
        },
        item::list::{ListItemReader, ListItemWriter},
    };

    fn even_only() -> impl ItemProcessor<u32, u32> {
        processor_fn(|item: &u32| Ok((item % 2 == 0).then_some(*item)))
    }

    fn rejecting(bad: &'static [u32]) -> impl ItemProcessor<u32, u32> {
        processor_fn(move |item: &u32| {
            if bad.contains(item) {
                Err(BatchError::Validation(format!("item {item} is invalid")))
            } else {
                Ok(Some(*item))
            }
        })
    }

    #[test]
    fn hundred_items_in_chunks_of_ten_are_written_ten_times() {
        let reader = ListItemReader::new((1..=100).collect::<Vec<u32>>());
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("copy")
            .chunk::<u32, u32>(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.chunk_sizes(), vec![10; 10]);
        assert_eq!(execution.read_count, 100);
        assert_eq!(execution.write_count, 100);
        assert_eq!(execution.commit_count, 10);
        assert_eq!(execution.status, ExitStatus::Completed);
    }

    #[test]
    fn filtered_items_never_reach_the_writer() {
        let reader = ListItemReader::new((1..=10).collect::<Vec<u32>>());
        let processor = even_only();
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("evens")
            .chunk::<u32, u32>(4)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.items(), vec![2, 4, 6, 8, 10]);
        assert_eq!(execution.filter_count, 5);
        assert_eq!(execution.write_count, 5);
    }

    #[test]
    fn skipped_items_are_counted_and_dropped() {
        let reader = ListItemReader::new((1..=6).collect::<Vec<u32>>());
        let processor = rejecting(&[2, 5]);
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("tolerant")
            .chunk::<u32, u32>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip(ErrorKind::Validation)
            .skip_limit(2)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.items(), vec![1, 3, 4, 6]);
        assert_eq!(execution.process_skip_count, 2);
        assert_eq!(execution.unaccounted_count(), 0);
    }

    #[test]
    fn skip_beyond_the_limit_fails_the_step() {
        let reader = ListItemReader::new((1..=6).collect::<Vec<u32>>());
        let processor = rejecting(&[1, 2, 3]);
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("strict")
            .chunk::<u32, u32>(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip(ErrorKind::Validation)
            .skip_limit(2)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        let result = step.execute(&mut execution);

        assert!(result.is_err());
        assert_eq!(execution.status, ExitStatus::Failed);
        assert_eq!(execution.process_skip_count, 2);
        assert_eq!(execution.write_count, 0);
        assert!(execution.failures[0].starts_with("Skip limit of 2 exceeded"));
        assert_eq!(execution.unaccounted_count(), 4);
    }

    #[test]
    fn unclassified_read_error_is_fatal_and_keeps_committed_chunks() {
        struct FailingAt(AtomicUsize, usize);
        impl ItemReader<usize> for FailingAt {
            fn read(&self) -> ItemReaderResult<usize> {
                let next = self.0.fetch_add(1, Ordering::SeqCst);
                if next == self.1 {
                    Err(BatchError::ItemReader("connection reset".into()))
                } else {
                    Ok(Some(next))
                }
            }
        }

        let reader = FailingAt(AtomicUsize::new(0), 7);
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("fragile")
            .chunk::<usize, usize>(5)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        assert!(step.execute(&mut execution).is_err());

        assert_eq!(writer.items(), vec![0, 1, 2, 3, 4]);
        assert_eq!(execution.read_count, 7);
        assert_eq!(execution.write_count, 5);
        assert_eq!(
            execution.execution_context.get_usize(RESTART_OFFSET_KEY),
            Some(5)
        );
    }

    #[test]
    fn skippable_write_error_skips_the_whole_chunk() {
        let reader = ListItemReader::new((1..=9).collect::<Vec<u32>>());
        let processor = PassThroughProcessor;
        let written = Mutex::new(Vec::new());
        let writer = writer_fn(|items: &[u32]| {
            if items.contains(&5) {
                return Err(BatchError::ItemWriter("unique constraint".into()));
            }
            written.lock().extend_from_slice(items);
            Ok(())
        });

        let step = StepBuilder::new("lossy")
            .chunk::<u32, u32>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip(ErrorKind::Write)
            .skip_limit(3)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        assert_eq!(*written.lock(), vec![1, 2, 3, 7, 8, 9]);
        assert_eq!(execution.write_skip_count, 3);
        assert_eq!(execution.write_count, 6);
    }

    #[test]
    fn retried_items_succeed_within_the_retry_limit() {
        let attempts = Mutex::new(std::collections::HashMap::<u32, usize>::new());
        let processor = processor_fn(|item: &u32| {
            let mut attempts = attempts.lock();
            let seen = attempts.entry(*item).or_default();
            *seen += 1;
            if *item == 3 && *seen < 3 {
                Err(BatchError::Validation("flaky".into()))
            } else {
                Ok(Some(*item))
            }
        });
        let reader = ListItemReader::new(vec![1_u32, 2, 3, 4]);
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("retrying")
            .chunk::<u32, u32>(2)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .retry(ErrorKind::Validation)
            .retry_limit(3)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.items(), vec![1, 2, 3, 4]);
        assert_eq!(attempts.lock()[&3], 3);
    }

    #[test]
    fn restarted_execution_resumes_after_the_last_commit() {
        let reader = ListItemReader::new((0..10).collect::<Vec<u32>>());
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("resumable")
            .chunk::<u32, u32>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        execution.execution_context.put(RESTART_OFFSET_KEY, 6);
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.items(), vec![6, 7, 8, 9]);
        assert_eq!(
            execution.execution_context.get_usize(RESTART_OFFSET_KEY),
            Some(10)
        );
    }

    #[test]
    fn multi_threaded_step_writes_every_item_exactly_once() {
        let reader = ListItemReader::new((0..1_000).collect::<Vec<u32>>());
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("parallel")
            .chunk::<u32, u32>(7)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .task_executor(TaskExecutor::new(4).unwrap())
            .throttle_limit(4)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        step.execute(&mut execution).unwrap();

        let mut items = writer.items();
        items.sort_unstable();
        assert_eq!(items, (0..1_000).collect::<Vec<u32>>());
        assert_eq!(execution.write_count, 1_000);
        assert_eq!(execution.commit_count, 143);
        assert!(writer.chunk_sizes().iter().all(|size| *size <= 7));
    }

    #[test]
    fn multi_threaded_skip_limit_holds_across_workers() {
        let reader = ListItemReader::new((0..200).collect::<Vec<u32>>());
        let processor = processor_fn(|item: &u32| {
            if item % 10 == 0 {
                Err(BatchError::Validation(format!("bad {item}")))
            } else {
                Ok(Some(*item))
            }
        });
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("parallel-strict")
            .chunk::<u32, u32>(5)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip(ErrorKind::Validation)
            .skip_limit(3)
            .task_executor(TaskExecutor::new(4).unwrap())
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        assert!(step.execute(&mut execution).is_err());
        assert_eq!(execution.process_skip_count, 3);
    }

    #[test]
    fn invalid_configuration_is_rejected_at_build() {
        let reader = ListItemReader::new(vec![1_u32]);
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let zero_chunk = StepBuilder::new("zero")
            .chunk::<u32, u32>(0)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build();
        assert!(matches!(zero_chunk, Err(BatchError::Configuration(_))));

        let no_writer = StepBuilder::new("incomplete")
            .chunk::<u32, u32>(1)
            .reader(&reader)
            .processor(&processor)
            .build();
        assert!(matches!(no_writer, Err(BatchError::Configuration(message)) if message.contains("writer")));
    }

    #[test]
    fn scoped_reader_is_created_from_the_execution_context() {
        let processor = PassThroughProcessor;
        let writer = ListItemWriter::new();

        let step = StepBuilder::new("scoped")
            .chunk::<i64, i64>(10)
            .reader_factory(|execution: &StepExecution| {
                let last = execution.execution_context.require_i64("last")?;
                Ok(Box::new(ListItemReader::new((1..=last).collect())) as Box<dyn ItemReader<i64>>)
            })
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new(step.name());
        execution.execution_context.put("last", 3);
        step.execute(&mut execution).unwrap();
        assert_eq!(writer.items(), vec![1, 2, 3]);

        let mut missing = StepExecution::new(step.name());
        assert!(step.execute(&mut missing).is_err());
        assert!(missing.failures[0].contains("last"));
    }
}
