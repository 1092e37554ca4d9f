mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use chunk_batch::{
    BatchError,
    core::{
        flow::{Decision, FlowBuilder, FlowStatus, JobParametersDecider},
        item::{PassThroughProcessor, processor_fn, writer_fn},
        job::{Job, JobBuilder, JobExecution},
        launcher::{JobLauncher, JobRegistry},
        listener::WriteCountListener,
        parameters::{ALLOW_DUPLICATE, DATE, JobParameters},
        partition::RangePartitioner,
        retry::{RetryContext, RetryTemplate},
        step::{ExitStatus, RepeatStatus, StepBuilder, StepExecution},
        task_executor::TaskExecutor,
    },
    error::ErrorKind,
    item::{
        composite::{CompositeItemProcessor, CompositeItemWriter},
        duplicate::DuplicateValidationProcessor,
        list::{ListItemReader, ListItemWriter},
        logger::LoggerWriter,
        retry::RetryItemProcessor,
    },
    tasklet::paging::PagingTaskletBuilder,
};

use common::{init_logger, partition_reader};

#[test]
fn hundred_items_are_written_in_ten_chunks() {
    init_logger();

    let reader = ListItemReader::new((0..100).map(|i| format!("{i} Hello")).collect());
    let processor = processor_fn(|item: &String| Ok(Some(format!("{item}, Chunk Batch"))));
    let invocations = Mutex::new(Vec::new());
    let writer = writer_fn(|items: &[String]| {
        invocations.lock().push(items.len());
        Ok(())
    });

    let step = StepBuilder::new("chunkBaseStep")
        .chunk::<String, String>(10)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().start(&step).build().unwrap();

    let execution = job.run(JobParameters::new()).unwrap();

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(execution.write_count(), 100);
    assert_eq!(*invocations.lock(), vec![10; 10]);
    assert_eq!(execution.step_executions[0].commit_count, 10);
}

#[test]
fn tasklet_then_chunk_step() {
    let tasklet = PagingTaskletBuilder::new()
        .items((0..100).collect::<Vec<u32>>())
        .build()
        .unwrap();
    let task_step = StepBuilder::new("taskBaseStep").tasklet(&tasklet).build();

    let reader = ListItemReader::new((0..100).collect::<Vec<u32>>());
    let processor = PassThroughProcessor;
    let writer = ListItemWriter::<u32>::new();
    let chunk_step = StepBuilder::new("chunkBaseStep")
        .chunk::<u32, u32>(25)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()
        .unwrap();

    let job = JobBuilder::new()
        .name("chunkProcessJob")
        .start(&task_step)
        .next(&chunk_step)
        .build()
        .unwrap();
    let parameters = JobParameters::builder().add("chunkSize", "20").build();
    let execution = job.run(parameters).unwrap();

    let task = execution.step_execution("taskBaseStep").unwrap();
    assert_eq!(task.read_count, 100);
    assert_eq!(task.commit_count, 5);
    assert_eq!(writer.chunk_sizes(), vec![25; 4]);
}

/// Seeds, levels up in partitions, then optionally writes statistics.
fn run_user_job(parameters: JobParameters) -> (JobExecution, usize) {
    let statistics_runs = AtomicUsize::new(0);

    let seed = chunk_batch::core::step::tasklet_fn(|execution: &mut StepExecution| {
        execution.write_count += 400;
        Ok(RepeatStatus::Finished)
    });
    let save_user_step = StepBuilder::new("saveUserStep").tasklet(&seed).build();

    let silver_and_up = processor_fn(|id: &i64| Ok((*id > 100).then_some(*id)));
    let leveled_up = writer_fn(|_: &[i64]| Ok(()));
    let worker = StepBuilder::new("userLevelUpStep")
        .chunk::<i64, i64>(50)
        .reader_factory(partition_reader)
        .processor(&silver_and_up)
        .writer(&leveled_up)
        .build()
        .unwrap();
    let partitioner = RangePartitioner::new(1, 400);
    let manager = StepBuilder::new("userLevelUpStep.manager")
        .partitioner(&partitioner, &worker)
        .grid_size(8)
        .build()
        .unwrap();

    let statistics = chunk_batch::core::step::tasklet_fn(|_: &mut StepExecution| {
        statistics_runs.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let statistics_step = StepBuilder::new("orderStatisticsStep")
        .tasklet(&statistics)
        .build();

    let decider = JobParametersDecider::new(DATE);
    let listener = WriteCountListener;
    let job = JobBuilder::new()
        .name("userJob")
        .start(&save_user_step)
        .next(&manager)
        .decision(
            Decision::new(&decider)
                .on(
                    FlowStatus::CONTINUE,
                    FlowBuilder::new("statistics").start(&statistics_step).build(),
                )
                .end_on(FlowStatus::COMPLETED),
        )
        .listener(&listener)
        .build()
        .unwrap();

    let execution = job.run(parameters).unwrap();
    (execution, statistics_runs.load(Ordering::SeqCst))
}

#[test]
fn empty_date_skips_the_statistics_step() {
    init_logger();

    let parameters = JobParameters::builder().add(DATE, "").build();
    let (execution, statistics_runs) = run_user_job(parameters);

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(statistics_runs, 0);
    assert!(execution.step_execution("orderStatisticsStep").is_none());

    let manager = execution.step_execution("userLevelUpStep.manager").unwrap();
    assert_eq!(manager.partition_executions.len(), 8);
    assert_eq!(manager.read_count, 400);
    assert_eq!(manager.write_count, 300);
    assert_eq!(manager.filter_count, 100);
}

#[test]
fn date_runs_the_statistics_step_once() {
    let parameters = JobParameters::builder().add(DATE, "2020-11").build();
    let (execution, statistics_runs) = run_user_job(parameters);

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(statistics_runs, 1);
    assert_eq!(
        execution
            .step_executions
            .iter()
            .map(|step| step.name.as_str())
            .collect::<Vec<_>>(),
        vec!["saveUserStep", "userLevelUpStep.manager", "orderStatisticsStep"]
    );
}

#[test]
fn multi_threaded_step_suppresses_duplicates_across_workers() {
    let ids: Vec<u32> = (0..2_000).map(|i| i % 500).collect();
    let reader = ListItemReader::new(ids);
    let parameters = JobParameters::builder().add(ALLOW_DUPLICATE, "false").build();
    let processor = DuplicateValidationProcessor::from_parameters(|id: &u32| *id, &parameters).unwrap();
    let writer = ListItemWriter::<u32>::new();

    let step = StepBuilder::new("dedup")
        .chunk::<u32, u32>(16)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .task_executor(TaskExecutor::new(4).unwrap())
        .throttle_limit(4)
        .build()
        .unwrap();
    let job = JobBuilder::new().start(&step).build().unwrap();

    let execution = job.run(parameters).unwrap();
    let step_execution = &execution.step_executions[0];

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(step_execution.read_count, 2_000);
    assert_eq!(step_execution.write_count, 500);
    assert_eq!(step_execution.filter_count, 1_500);

    let mut written = writer.items();
    written.sort_unstable();
    assert_eq!(written, (0..500).collect::<Vec<u32>>());
}

#[test]
fn retry_with_recovery_never_reaches_the_skip_policy() {
    let attempts = AtomicUsize::new(0);
    let flaky = processor_fn(|name: &String| {
        attempts.fetch_add(1, Ordering::SeqCst);
        if name.is_empty() {
            Err(BatchError::Validation("name is empty".to_string()))
        } else {
            Ok(Some(name.to_uppercase()))
        }
    });
    let template = RetryTemplate::builder()
        .max_attempts(3)
        .retry_on(ErrorKind::Validation)
        .build()
        .unwrap();
    let processor =
        RetryItemProcessor::<String, String>::new(&flaky, template).recover(|_, _| Ok(Some("ANONYMOUS".to_string())));

    let reader = ListItemReader::new(vec!["ada".to_string(), String::new(), "grace".to_string()]);
    let writer = ListItemWriter::<String>::new();
    let step = StepBuilder::new("names")
        .chunk::<String, String>(10)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().start(&step).build().unwrap();

    let execution = job.run(JobParameters::new()).unwrap();

    assert_eq!(execution.skip_count(), 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    assert_eq!(writer.items(), vec!["ADA", "ANONYMOUS", "GRACE"]);
}

#[test]
fn skip_limit_exceeded_fails_the_job_with_exit_code_one() {
    let registry = JobRegistry::new().register("validation", |parameters| {
        let reader = ListItemReader::new((1..=20).collect::<Vec<u32>>());
        let processor = processor_fn(|id: &u32| {
            if id % 5 == 0 {
                Err(BatchError::Validation(format!("id {id} rejected")))
            } else {
                Ok(Some(*id))
            }
        });
        let writer = ListItemWriter::<u32>::new();
        let step = StepBuilder::new("validate")
            .chunk::<u32, u32>(4)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip(ErrorKind::Validation)
            .skip_limit(2)
            .build()?;
        let job = JobBuilder::new().name("validation").start(&step).build()?;
        job.run(parameters)
    });

    let execution = JobLauncher::new(&registry)
        .run("validation", JobParameters::new())
        .unwrap();

    assert_eq!(execution.status, ExitStatus::Failed);
    assert_eq!(execution.exit_code(), 1);
    let failed = execution.failed_steps();
    let step = failed[0];
    assert_eq!(step.process_skip_count, 2);
    assert_eq!(step.write_count, 10);
    assert!(step.failures[0].starts_with("Skip limit of 2 exceeded"));
}

#[test]
fn partitions_share_nothing_but_the_worker_definition() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let processor = PassThroughProcessor;
    let writer = writer_fn(move |ids: &[i64]| {
        recorder.lock().extend_from_slice(ids);
        Ok(())
    });
    let worker = StepBuilder::new("worker")
        .chunk::<i64, i64>(7)
        .reader_factory(partition_reader)
        .processor(&processor)
        .writer(&writer)
        .build()
        .unwrap();
    let partitioner = RangePartitioner::new(-50, 49);
    let manager = StepBuilder::new("manager")
        .partitioner(&partitioner, &worker)
        .grid_size(3)
        .build()
        .unwrap();
    let job = JobBuilder::new().start(&manager).build().unwrap();

    let execution = job.run(JobParameters::new()).unwrap();

    let mut ids = seen.lock().clone();
    ids.sort_unstable();
    assert_eq!(ids, (-50..=49).collect::<Vec<i64>>());
    assert_eq!(execution.write_count(), 100);
    assert_eq!(
        execution.step_executions[0]
            .partition_executions
            .iter()
            .map(|partition| partition.write_count)
            .collect::<Vec<_>>(),
        vec![33, 33, 34]
    );
}

/// Fails every item of every partition it runs, counting the items it saw.
fn run_rejecting_partitions(fail_fast: bool) -> (JobExecution, usize) {
    let attempts = AtomicUsize::new(0);
    let reject_all = processor_fn(|id: &i64| -> Result<Option<i64>, BatchError> {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(BatchError::ItemProcessor(format!("id {id} rejected")))
    });
    let writer = ListItemWriter::<i64>::new();
    let worker = StepBuilder::new("worker")
        .chunk::<i64, i64>(10)
        .reader_factory(partition_reader)
        .processor(&reject_all)
        .writer(&writer)
        .build()
        .unwrap();
    let partitioner = RangePartitioner::new(1, 30);
    let manager = StepBuilder::new("manager")
        .partitioner(&partitioner, &worker)
        .grid_size(3)
        .task_executor(TaskExecutor::new(1).unwrap())
        .fail_fast(fail_fast)
        .build()
        .unwrap();
    let job = JobBuilder::new().start(&manager).build().unwrap();

    let execution = job.run(JobParameters::new()).unwrap();
    (execution, attempts.load(Ordering::SeqCst))
}

#[test]
fn fail_fast_abandons_partitions_that_have_not_started() {
    let (execution, attempts) = run_rejecting_partitions(true);

    assert_eq!(execution.status, ExitStatus::Failed);
    assert_eq!(execution.exit_code(), 1);
    assert_eq!(attempts, 10);

    let manager = &execution.step_executions[0];
    assert_eq!(manager.status, ExitStatus::Failed);
    assert_eq!(manager.read_count, 10);

    let partitions = &manager.partition_executions;
    assert_eq!(partitions.len(), 3);
    assert_eq!(partitions[0].status, ExitStatus::Failed);
    for abandoned in &partitions[1..] {
        assert_eq!(abandoned.status, ExitStatus::Unknown);
        assert_eq!(abandoned.read_count, 0);
        assert!(abandoned.failures[0].starts_with("not started"));
    }
}

#[test]
fn without_fail_fast_every_partition_runs() {
    let (execution, attempts) = run_rejecting_partitions(false);

    assert_eq!(execution.status, ExitStatus::Failed);
    assert_eq!(attempts, 30);
    assert!(
        execution.step_executions[0]
            .partition_executions
            .iter()
            .all(|partition| partition.status == ExitStatus::Failed)
    );
}

#[derive(Debug, Clone)]
struct Person {
    name: String,
    age: String,
}

fn people() -> Vec<Person> {
    [
        ("ada", "36"),
        ("grace", "45"),
        ("", "30"),
        ("ada", "36"),
        ("linus", "x"),
        ("", "50"),
        ("ken", "?"),
        ("grace", "45"),
        ("margaret", "33"),
        ("barbara", "40"),
    ]
    .iter()
    .map(|(name, age)| Person {
        name: name.to_string(),
        age: age.to_string(),
    })
    .collect()
}

/// Names the nameless after three attempts, skips bad ages, drops repeated
/// names, then persists and logs every chunk.
fn save_people(parameters: JobParameters) -> (JobExecution, Vec<String>, usize) {
    let reader = ListItemReader::new(people());

    let name_attempts = AtomicUsize::new(0);
    let require_name = processor_fn(|person: &Person| {
        name_attempts.fetch_add(1, Ordering::SeqCst);
        if person.name.is_empty() {
            Err(BatchError::Validation("person has no name".to_string()))
        } else {
            Ok(Some(person.clone()))
        }
    });
    let template = RetryTemplate::builder()
        .max_attempts(3)
        .retry_on(ErrorKind::Validation)
        .build()
        .unwrap();
    let retry = RetryItemProcessor::<Person, Person>::new(&require_name, template).recover(
        |person: &Person, _: &RetryContext| {
            Ok(Some(Person {
                name: "UNKNOWN".to_string(),
                ..person.clone()
            }))
        },
    );
    let require_age = processor_fn(|person: &Person| match person.age.parse::<u8>() {
        Ok(_) => Ok(Some(person.clone())),
        Err(_) => Err(BatchError::Validation(format!("{} has no valid age", person.name))),
    });
    let dedup =
        DuplicateValidationProcessor::from_parameters(|person: &Person| person.name.clone(), &parameters)
            .unwrap();
    let processor = CompositeItemProcessor::<Person>::new(Vec::new())
        .add(&retry)
        .add(&require_age)
        .add(&dedup);

    let people_table = ListItemWriter::<Person>::new();
    let logger = LoggerWriter::new("person");
    let writer = CompositeItemWriter::<Person>::new(Vec::new())
        .add(&people_table)
        .add(&logger);

    let step = StepBuilder::new("savePersonStep")
        .chunk::<Person, Person>(4)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .listener(&dedup)
        .skip(ErrorKind::Validation)
        .skip_limit(2)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("savePersonJob").start(&step).build().unwrap();

    let execution = job.run(parameters).unwrap();
    let names = people_table
        .items()
        .into_iter()
        .map(|person| person.name)
        .collect();
    (execution, names, name_attempts.load(Ordering::SeqCst))
}

#[test]
fn save_person_step_recovers_skips_and_suppresses_duplicates() {
    init_logger();

    let (execution, names, name_attempts) = save_people(JobParameters::new());

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(names, vec!["ada", "grace", "UNKNOWN", "margaret", "barbara"]);
    assert_eq!(name_attempts, 8 + 2 * 3);

    let step = execution.step_execution("savePersonStep").unwrap();
    assert_eq!(step.read_count, 10);
    assert_eq!(step.write_count, 5);
    assert_eq!(step.filter_count, 3);
    assert_eq!(step.process_skip_count, 2);
}

#[test]
fn save_person_step_keeps_duplicates_when_allowed() {
    let parameters = JobParameters::builder().add(ALLOW_DUPLICATE, "true").build();
    let (execution, names, _) = save_people(parameters);

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(
        names,
        vec!["ada", "grace", "UNKNOWN", "ada", "UNKNOWN", "grace", "margaret", "barbara"]
    );
    assert_eq!(execution.write_count(), 8);
    assert_eq!(execution.skip_count(), 2);
}
