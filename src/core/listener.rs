use log::{info, warn};

use crate::BatchError;

use super::{
    job::JobExecution,
    step::{ExitStatus, StepExecution},
};

/// Callbacks fired by a step around its execution.
///
/// Listener errors are logged and never change the outcome of the step.
pub trait StepExecutionListener: Send + Sync {
    fn before_step(&self, _step_execution: &StepExecution) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called after the step body. Returning `Some(status)` replaces the exit
    /// status the step ended with.
    fn after_step(&self, _step_execution: &StepExecution) -> Result<Option<ExitStatus>, BatchError> {
        Ok(None)
    }
}

/// Callbacks fired by a job before its first step and after its last one.
///
/// Listener errors are logged and never abort the job.
pub trait JobExecutionListener: Send + Sync {
    fn before_job(&self, _job_execution: &JobExecution) -> Result<(), BatchError> {
        Ok(())
    }

    fn after_job(&self, _job_execution: &JobExecution) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Logs the number of items written by all steps once the job has ended.
#[derive(Default)]
pub struct WriteCountListener;

impl JobExecutionListener for WriteCountListener {
    fn before_job(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        info!("Before job: {}", job_execution.name);
        Ok(())
    }

    fn after_job(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        info!(
            "After job: {}, total write count: {}",
            job_execution.name,
            job_execution.write_count()
        );
        Ok(())
    }
}

pub(crate) fn notify_before_step(
    listeners: &[&dyn StepExecutionListener],
    step_execution: &StepExecution,
) {
    for listener in listeners {
        if let Err(error) = listener.before_step(step_execution) {
            warn!(
                "Step listener failed before step {}: {}",
                step_execution.name, error
            );
        }
    }
}

pub(crate) fn notify_after_step(
    listeners: &[&dyn StepExecutionListener],
    step_execution: &mut StepExecution,
) {
    for listener in listeners {
        match listener.after_step(step_execution) {
            Ok(Some(status)) => step_execution.status = status,
            Ok(None) => {}
            Err(error) => warn!(
                "Step listener failed after step {}: {}",
                step_execution.name, error
            ),
        }
    }
}

pub(crate) fn notify_before_job(
    listeners: &[&dyn JobExecutionListener],
    job_execution: &JobExecution,
) {
    for listener in listeners {
        if let Err(error) = listener.before_job(job_execution) {
            warn!("Job listener failed before job {}: {}", job_execution.name, error);
        }
    }
}

pub(crate) fn notify_after_job(listeners: &[&dyn JobExecutionListener], job_execution: &JobExecution) {
    for listener in listeners {
        if let Err(error) = listener.after_job(job_execution) {
            warn!("Job listener failed after job {}: {}", job_execution.name, error);
        }
    }
}
