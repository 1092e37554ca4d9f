use std::collections::BTreeMap;

use log::info;

use crate::BatchError;

use super::{job::JobExecution, parameters::JobParameters};

type JobFactory = Box<dyn Fn(JobParameters) -> Result<JobExecution, BatchError> + Send + Sync>;

/// Jobs known by name.
///
/// A job usually borrows readers and writers that depend on its parameters,
/// so the registry keeps a factory that assembles the job from the resolved
/// parameters and runs it.
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(JobParameters) -> Result<JobExecution, BatchError> + Send + Sync + 'static,
    {
        self.jobs.insert(name.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }
}

/// Launches registered jobs and blocks until they reach a terminal status.
pub struct JobLauncher<'r> {
    registry: &'r JobRegistry,
}

impl<'r> JobLauncher<'r> {
    pub fn new(registry: &'r JobRegistry) -> Self {
        Self { registry }
    }

    pub fn run(&self, name: &str, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        let factory = self.registry.jobs.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.registry.names().collect();
            BatchError::Configuration(format!(
                "no job named '{name}' (known jobs: {})",
                known.join(", ")
            ))
        })?;

        info!("Launching job {} with parameters {}", name, parameters);
        let execution = factory(parameters)?;
        info!(
            "Job {} finished with status {} (exit code {})",
            name,
            execution.status,
            execution.exit_code()
        );
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        job::{Job, JobBuilder},
        step::{ExitStatus, RepeatStatus, StepBuilder, StepExecution, tasklet_fn},
    };

    fn registry() -> JobRegistry {
        JobRegistry::new().register("hello", |parameters| {
            let tasklet = tasklet_fn(|_: &mut StepExecution| Ok(RepeatStatus::Finished));
            let step = StepBuilder::new("say-hello").tasklet(&tasklet).build();
            let job = JobBuilder::new().name("hello").start(&step).build()?;
            job.run(parameters)
        })
    }

    #[test]
    fn launches_a_registered_job() {
        let registry = registry();
        let execution = JobLauncher::new(&registry)
            .run("hello", JobParameters::new())
            .unwrap();

        assert_eq!(execution.status, ExitStatus::Completed);
        assert_eq!(execution.exit_code(), 0);
    }

    #[test]
    fn unknown_job_is_a_configuration_error() {
        let registry = registry();
        let error = JobLauncher::new(&registry)
            .run("goodbye", JobParameters::new())
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Configuration error: no job named 'goodbye' (known jobs: hello)"
        );
    }
}
