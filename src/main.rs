//! Chunk batch launcher
//!
//! Runs one of the registered demo jobs with `key=value` job parameters and
//! exits with the job's exit code (0 completed, 1 failed, 2 unknown).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;

use chunk_batch::{
    BatchError,
    core::{
        chunk::ChunkOrientedStep,
        flow::{Decision, FlowBuilder, FlowStatus, JobParametersDecider, Split},
        item::{
            ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor, processor_fn, writer_fn,
        },
        job::{Job, JobBuilder, JobExecution},
        launcher::{JobLauncher, JobRegistry},
        listener::{JobExecutionListener, StepExecutionListener, WriteCountListener},
        parameters::{
            CHUNK_SIZE, DATE, DEFAULT_CHUNK_SIZE, DEFAULT_PATH, GRID_SIZE, JobParameters, PATH,
        },
        partition::{DEFAULT_GRID_SIZE, IdRange, RangePartitioner},
        retry::{RetryContext, RetryListener, RetryTemplate},
        step::{ExitStatus, RepeatStatus, StepBuilder, StepExecution, Tasklet, tasklet_fn},
        task_executor::{DEFAULT_CONCURRENCY, TaskExecutor},
    },
    error::ErrorKind,
    item::{
        async_processor::AsyncItemProcessor,
        composite::{CompositeItemProcessor, CompositeItemWriter},
        duplicate::DuplicateValidationProcessor,
        file::{FlatFileItemWriterBuilder, dated_file_name},
        list::{ListItemReader, ListItemWriter},
        logger::LoggerWriter,
        paging::{CursorItemReader, PagingItemReader, ReaderKind},
        retry::RetryItemProcessor,
    },
    tasklet::paging::PagingTaskletBuilder,
};

#[derive(Parser)]
#[command(name = "chunk-batch")]
#[command(about = "Launch a registered batch job", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job until it reaches a terminal status
    Run {
        /// Name of the registered job
        job: String,

        /// Job parameters, e.g. chunkSize=100 date=2020-11
        #[arg(value_name = "KEY=VALUE")]
        parameters: Vec<String>,

        /// Print the execution summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the registered jobs
    List,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let registry = registry();

    match cli.command {
        Commands::List => {
            registry.names().for_each(|name| println!("{name}"));
            Ok(())
        }
        Commands::Run {
            job,
            parameters,
            json,
        } => {
            let parameters = JobParameters::from_pairs(&parameters)?;
            let execution = JobLauncher::new(&registry).run(&job, parameters)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&execution.summary())?);
            }
            for step in execution.failed_steps() {
                eprintln!("step {} failed: {}", step.name, step.failures.join("; "));
            }
            process::exit(execution.exit_code());
        }
    }
}

fn registry() -> JobRegistry {
    JobRegistry::new()
        .register("chunkProcessJob", chunk_process_job)
        .register("savePersonJob", save_person_job)
        .register("userJob", user_job)
        .register("multiThreadUserJob", multi_thread_user_job)
        .register("parallelUserJob", parallel_user_job)
}

fn hello_items() -> Vec<String> {
    (0..100).map(|i| format!("{i} Hello")).collect()
}

/// A paginated tasklet followed by the same items as a chunk step.
fn chunk_process_job(parameters: JobParameters) -> Result<JobExecution, BatchError> {
    let chunk_size = parameters.get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;

    let tasklet = PagingTaskletBuilder::new().items(hello_items()).build()?;
    let task_step = StepBuilder::new("taskBaseStep").tasklet(&tasklet).build();

    let reader = ListItemReader::new(hello_items());
    let processor = processor_fn(|item: &String| Ok(Some(format!("{item}, Chunk Batch"))));
    let writer = writer_fn(|items: &[String]| {
        info!("chunk item size: {}", items.len());
        Ok(())
    });
    let chunk_step = StepBuilder::new("chunkBaseStep")
        .chunk::<String, String>(chunk_size)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;

    let job = JobBuilder::new()
        .name("chunkProcessJob")
        .start(&task_step)
        .next(&chunk_step)
        .build()?;
    job.run(parameters)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Normal,
    Silver,
    Gold,
    Vip,
}

impl Level {
    fn for_amount(total_amount: u64) -> Level {
        match total_amount {
            0..200_000 => Level::Normal,
            200_000..300_000 => Level::Silver,
            300_000..500_000 => Level::Gold,
            _ => Level::Vip,
        }
    }
}

#[derive(Debug, Clone)]
struct User {
    id: i64,
    username: String,
    total_amount: u64,
    level: Level,
}

impl User {
    fn available_level_up(&self) -> bool {
        Level::for_amount(self.total_amount) > self.level
    }

    fn level_up(&mut self) {
        self.level = Level::for_amount(self.total_amount);
    }
}

#[derive(Debug, Clone)]
struct Order {
    amount: u64,
    date: String,
}

#[derive(Debug, Clone, Serialize)]
struct OrderStatistics {
    amount: u64,
    date: String,
}

/// In-memory stand-in for the user and order tables.
#[derive(Default)]
struct UserStore {
    users: DashMap<i64, User>,
    orders: Mutex<Vec<Order>>,
}

impl UserStore {
    /// Saves 400 users, 100 per spending tier, in random order.
    fn seed(&self) -> usize {
        let mut users: Vec<(String, u64)> = [1_000, 200_000, 300_000, 500_000]
            .iter()
            .enumerate()
            .flat_map(|(tier, amount)| {
                (tier * 100..(tier + 1) * 100).map(move |i| (format!("test username{i}"), *amount))
            })
            .collect();
        users.shuffle(&mut rand::rng());

        let mut orders = self.orders.lock();
        for (id, (username, total_amount)) in (1..).zip(users) {
            orders.push(Order {
                amount: total_amount / 100,
                date: format!("2020-11-{:02}", id % 30 + 1),
            });
            self.users.insert(
                id,
                User {
                    id,
                    username,
                    total_amount,
                    level: Level::Normal,
                },
            );
        }
        self.users.len()
    }

    fn id_bounds(&self) -> Result<(i64, i64), BatchError> {
        let ids: Vec<i64> = self.users.iter().map(|user| *user.key()).collect();
        match (ids.iter().min(), ids.iter().max()) {
            (Some(&min_id), Some(&max_id)) => Ok((min_id, max_id)),
            _ => Err(BatchError::ItemReader("no users to level up".to_string())),
        }
    }

    fn users_in(&self, range: IdRange) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|user| range.contains(*user.key()))
            .map(|user| user.value().clone())
            .collect();
        users.sort_by_key(|user| user.id);
        users
    }

    fn save(&self, user: User) {
        self.users.insert(user.id, user);
    }

    fn level_counts(&self) -> BTreeMap<Level, usize> {
        self.users.iter().fold(BTreeMap::new(), |mut counts, user| {
            *counts.entry(user.level).or_insert(0) += 1;
            counts
        })
    }

    /// Daily order totals of one `YYYY-MM` month.
    fn statistics(&self, month: &str) -> Vec<OrderStatistics> {
        let prefix = format!("{month}-");
        self.orders
            .lock()
            .iter()
            .filter(|order| order.date.starts_with(&prefix))
            .fold(BTreeMap::new(), |mut totals, order| {
                *totals.entry(order.date.clone()).or_insert(0) += order.amount;
                totals
            })
            .into_iter()
            .map(|(date, amount)| OrderStatistics { amount, date })
            .collect()
    }
}

/// Reader over the users whose id falls in `range`.
fn user_reader<'r>(
    store: &Arc<UserStore>,
    range: IdRange,
    parameters: &JobParameters,
    page_size: usize,
) -> Result<Box<dyn ItemReader<User> + 'r>, BatchError> {
    match ReaderKind::from_parameters(parameters)? {
        ReaderKind::Paging => {
            let store = Arc::clone(store);
            let reader = PagingItemReader::new(page_size, move |offset, limit| {
                Ok(store
                    .users_in(range)
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .collect())
            })?;
            Ok(Box::new(reader))
        }
        ReaderKind::Cursor => Ok(Box::new(CursorItemReader::from_rows(store.users_in(range)))),
    }
}

fn statistics_reader<'r>(
    store: &Arc<UserStore>,
    execution: &StepExecution,
) -> Result<Box<dyn ItemReader<OrderStatistics> + 'r>, BatchError> {
    let month = execution.job_parameters.get_or(DATE, "");
    Ok(Box::new(ListItemReader::new(store.statistics(month))))
}

fn statistics_writer<'w>(
    directory: &Path,
    execution: &StepExecution,
) -> Result<Box<dyn ItemWriter<OrderStatistics> + 'w>, BatchError> {
    let date = execution
        .job_parameters
        .get_non_empty(DATE)
        .ok_or_else(|| BatchError::Configuration("the date parameter is required".to_string()))?;

    let writer = FlatFileItemWriterBuilder::new()
        .fields(&["amount", "date"])
        .header("total_amount,date")
        .from_path(directory.join(dated_file_name(date, "order_statistics")?))?;
    Ok(Box::new(writer))
}

fn seed_users(store: &UserStore) -> impl Tasklet + '_ {
    tasklet_fn(move |execution: &mut StepExecution| {
        execution.write_count += store.seed();
        Ok(RepeatStatus::Finished)
    })
}

fn level_up_users() -> impl ItemProcessor<User, User> {
    processor_fn(|user: &User| Ok(user.available_level_up().then(|| user.clone())))
}

fn save_users(store: &UserStore) -> impl ItemWriter<User> + '_ {
    writer_fn(move |users: &[User]| {
        for user in users {
            let mut user = user.clone();
            user.level_up();
            debug!("{} leveled up to {:?}", user.username, user.level);
            store.save(user);
        }
        Ok(())
    })
}

/// Writes the daily order totals of the `date` month to a dated file under
/// `directory`.
fn order_statistics_step<'a>(
    store: &Arc<UserStore>,
    directory: PathBuf,
    chunk_size: usize,
) -> Result<ChunkOrientedStep<'a, OrderStatistics, OrderStatistics>, BatchError> {
    let store = Arc::clone(store);
    StepBuilder::new("orderStatisticsStep")
        .chunk::<OrderStatistics, OrderStatistics>(chunk_size)
        .reader_factory(move |execution: &StepExecution| statistics_reader(&store, execution))
        .processor(&PassThroughProcessor)
        .writer_factory(move |execution: &StepExecution| statistics_writer(&directory, execution))
        .build()
}

struct LevelUpListener {
    store: Arc<UserStore>,
    step: &'static str,
}

impl JobExecutionListener for LevelUpListener {
    fn after_job(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let leveled_up = job_execution
            .step_execution(self.step)
            .map_or(0, |execution| execution.write_count);

        info!("Level up: {} users, levels now {:?}", leveled_up, self.store.level_counts());
        Ok(())
    }
}

/// Where the order statistics run relative to the partitioned level-up.
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// After the level-up step.
    Sequential,
    /// In a split, next to the level-up step.
    Parallel,
}

/// Seeds users, levels them up in partitions and, when a `date` is given,
/// writes that month's order statistics.
fn partitioned_user_job(
    name: &str,
    layout: Layout,
    parameters: JobParameters,
) -> Result<JobExecution, BatchError> {
    let grid_size = parameters.get_usize_or(GRID_SIZE, DEFAULT_GRID_SIZE)?;
    let chunk_size = parameters.get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;
    let directory = PathBuf::from(parameters.get_or(PATH, DEFAULT_PATH));
    let store = Arc::new(UserStore::default());

    let seed = seed_users(&store);
    let save_user_step = StepBuilder::new("saveUserStep").tasklet(&seed).build();

    let level_up = level_up_users();
    let async_level_up = AsyncItemProcessor::new(&level_up, TaskExecutor::with_default_concurrency()?);
    let save = save_users(&store);

    let reader_store = Arc::clone(&store);
    let worker = StepBuilder::new("userLevelUpStep")
        .chunk::<User, User>(chunk_size)
        .reader_factory(move |execution: &StepExecution| {
            let range = IdRange::from_context(&execution.execution_context)?;
            user_reader(&reader_store, range, &execution.job_parameters, chunk_size)
        })
        .processor(&async_level_up)
        .writer(&save)
        .build()?;

    let bounds_store = Arc::clone(&store);
    let partitioner = RangePartitioner::from_fn(move || bounds_store.id_bounds());
    let manager = StepBuilder::new("userLevelUpStep.manager")
        .partitioner(&partitioner, &worker)
        .grid_size(grid_size)
        .build()?;

    let statistics_step = order_statistics_step(&store, directory, chunk_size)?;
    let decider = JobParametersDecider::new(DATE);
    let statistics = Decision::new(&decider)
        .on(
            FlowStatus::CONTINUE,
            FlowBuilder::new("statisticsFlow").start(&statistics_step).build(),
        )
        .end_on(FlowStatus::COMPLETED);

    let level_up_listener = LevelUpListener {
        store: Arc::clone(&store),
        step: "userLevelUpStep.manager",
    };
    let write_count_listener = WriteCountListener;

    let job = JobBuilder::new().name(name).start(&save_user_step);
    let job = match layout {
        Layout::Sequential => job.next(&manager).decision(statistics),
        Layout::Parallel => job.split(
            Split::new(TaskExecutor::new(2)?)
                .add(FlowBuilder::new("userLevelUpFlow").start(&manager).build())
                .add(FlowBuilder::new("orderStatisticsFlow").decision(statistics).build()),
        ),
    };
    let job = job
        .listener(&level_up_listener)
        .listener(&write_count_listener)
        .build()?;
    job.run(parameters)
}

fn user_job(parameters: JobParameters) -> Result<JobExecution, BatchError> {
    partitioned_user_job("userJob", Layout::Sequential, parameters)
}

fn parallel_user_job(parameters: JobParameters) -> Result<JobExecution, BatchError> {
    partitioned_user_job("parallelUserJob", Layout::Parallel, parameters)
}

/// Like `userJob`, but the level-up is a single step that processes several
/// chunks at once instead of a partitioned one.
fn multi_thread_user_job(parameters: JobParameters) -> Result<JobExecution, BatchError> {
    let chunk_size = parameters.get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;
    let directory = PathBuf::from(parameters.get_or(PATH, DEFAULT_PATH));
    let store = Arc::new(UserStore::default());

    let seed = seed_users(&store);
    let save_user_step = StepBuilder::new("saveUserStep").tasklet(&seed).build();

    let level_up = level_up_users();
    let save = save_users(&store);
    let reader_store = Arc::clone(&store);
    let level_up_step = StepBuilder::new("userLevelUpStep")
        .chunk::<User, User>(chunk_size)
        .reader_factory(move |execution: &StepExecution| {
            let (min_id, max_id) = reader_store.id_bounds()?;
            user_reader(
                &reader_store,
                IdRange::new(min_id, max_id),
                &execution.job_parameters,
                chunk_size,
            )
        })
        .processor(&level_up)
        .writer(&save)
        .task_executor(TaskExecutor::with_default_concurrency()?)
        .throttle_limit(DEFAULT_CONCURRENCY)
        .build()?;

    let statistics_step = order_statistics_step(&store, directory, chunk_size)?;
    let decider = JobParametersDecider::new(DATE);
    let level_up_listener = LevelUpListener {
        store: Arc::clone(&store),
        step: "userLevelUpStep",
    };
    let write_count_listener = WriteCountListener;

    let job = JobBuilder::new()
        .name("multiThreadUserJob")
        .start(&save_user_step)
        .next(&level_up_step)
        .decision(
            Decision::new(&decider)
                .on(
                    FlowStatus::CONTINUE,
                    FlowBuilder::new("statisticsFlow").start(&statistics_step).build(),
                )
                .end_on(FlowStatus::COMPLETED),
        )
        .listener(&level_up_listener)
        .listener(&write_count_listener)
        .build()?;
    job.run(parameters)
}

#[derive(Debug, Clone)]
struct Person {
    name: String,
    age: String,
    address: String,
}

impl Person {
    fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    fn unknown_name(&self) -> Person {
        Person {
            name: "UNKNOWN".to_string(),
            ..self.clone()
        }
    }
}

/// 100 people. Names repeat every 40 rows and every 25th row has none.
fn people() -> Vec<Person> {
    (0..100)
        .map(|i| Person {
            name: if i % 25 == 0 {
                String::new()
            } else {
                format!("person{}", i % 40)
            },
            age: (20 + i % 50).to_string(),
            address: format!("street {}", i % 7),
        })
        .collect()
}

struct NameRetryListener;

impl RetryListener for NameRetryListener {
    fn on_error(&self, context: &RetryContext, error: &BatchError) {
        debug!("Attempt {} failed: {}", context.attempt(), error);
    }

    fn close(&self, context: &RetryContext, error: Option<&BatchError>) {
        if error.is_some() {
            info!("Giving up after {} attempts", context.attempt());
        }
    }
}

struct SavePersonListener;

impl StepExecutionListener for SavePersonListener {
    fn before_step(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        info!("Before step: {}", step_execution.name);
        Ok(())
    }

    fn after_step(&self, step_execution: &StepExecution) -> Result<Option<ExitStatus>, BatchError> {
        info!(
            "After step: {}, write count: {}",
            step_execution.name, step_execution.write_count
        );
        Ok(None)
    }
}

/// Saves people, naming the nameless `UNKNOWN` after three attempts and
/// dropping repeated names unless `allow_duplicate=true`.
fn save_person_job(parameters: JobParameters) -> Result<JobExecution, BatchError> {
    let chunk_size = parameters.get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;
    let reader = ListItemReader::new(people());

    let require_name = processor_fn(|person: &Person| {
        if person.has_name() {
            Ok(Some(person.clone()))
        } else {
            Err(BatchError::Validation("person has no name".to_string()))
        }
    });
    let template = RetryTemplate::builder()
        .max_attempts(3)
        .retry_on(ErrorKind::Validation)
        .listener(Arc::new(NameRetryListener))
        .build()?;
    let retry = RetryItemProcessor::<Person, Person>::new(&require_name, template)
        .recover(|person: &Person, _: &RetryContext| Ok(Some(person.unknown_name())));
    let dedup = DuplicateValidationProcessor::from_parameters(
        |person: &Person| person.name.clone(),
        &parameters,
    )?;
    let processor = CompositeItemProcessor::<Person>::new(Vec::new())
        .add(&retry)
        .add(&require_name)
        .add(&dedup);

    let people_table = ListItemWriter::<Person>::new();
    let logger = LoggerWriter::new("person");
    let writer = CompositeItemWriter::<Person>::new(Vec::new())
        .add(&people_table)
        .add(&logger);

    let listener = SavePersonListener;
    let step = StepBuilder::new("savePersonStep")
        .chunk::<Person, Person>(chunk_size)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .listener(&listener)
        .listener(&dedup)
        .skip(ErrorKind::Validation)
        .skip_limit(2)
        .build()?;

    let write_count_listener = WriteCountListener;
    let job = JobBuilder::new()
        .name("savePersonJob")
        .start(&step)
        .listener(&write_count_listener)
        .build()?;
    let execution = job.run(parameters)?;

    let saved = people_table.items();
    info!(
        "{} people saved, {} of them unnamed",
        saved.len(),
        saved.iter().filter(|person| person.name == "UNKNOWN").count()
    );
    Ok(execution)
}
