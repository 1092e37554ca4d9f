use std::{hash::Hash, marker::PhantomData};

use dashmap::DashSet;
use log::debug;

use crate::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        listener::StepExecutionListener,
        parameters::{ALLOW_DUPLICATE, JobParameters},
        step::StepExecution,
    },
};

/// Filters out items whose key was already seen during this step execution.
///
/// The key set is shared by every chunk and worker thread of the step. With
/// `allow_duplicate` set, items pass through unchanged and no key is recorded.
///
/// Register the processor as a listener of its step as well, so that the key
/// set starts empty on every step execution. Without it, keys seen by an
/// earlier run keep being filtered.
///
/// ```
/// use chunk_batch::core::item::ItemProcessor;
/// use chunk_batch::item::duplicate::DuplicateValidationProcessor;
///
/// let processor = DuplicateValidationProcessor::new(|name: &String| name.clone());
///
/// let kept: Vec<String> = ["a", "a", "b", "a"]
///     .iter()
///     .filter_map(|name| processor.process(&name.to_string()).unwrap())
///     .collect();
/// assert_eq!(kept, vec!["a", "b"]);
/// ```
pub struct DuplicateValidationProcessor<T, K, F>
where
    K: Eq + Hash,
{
    key: F,
    seen: DashSet<K>,
    allow_duplicate: bool,
    _item: PhantomData<fn(&T)>,
}

impl<T, K, F> DuplicateValidationProcessor<T, K, F>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    pub fn new(key: F) -> Self {
        Self {
            key,
            seen: DashSet::new(),
            allow_duplicate: false,
            _item: PhantomData,
        }
    }

    /// Reads the `allow_duplicate` job parameter, `false` when absent.
    pub fn from_parameters(key: F, parameters: &JobParameters) -> Result<Self, BatchError> {
        let allow_duplicate = parameters.get_bool_or(ALLOW_DUPLICATE, false)?;
        Ok(Self::new(key).allow_duplicate(allow_duplicate))
    }

    pub fn allow_duplicate(mut self, allow_duplicate: bool) -> Self {
        self.allow_duplicate = allow_duplicate;
        self
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Forgets every key, for reuse by a new step execution.
    pub fn reset(&self) {
        self.seen.clear();
    }
}

impl<T, K, F> ItemProcessor<T, T> for DuplicateValidationProcessor<T, K, F>
where
    T: Clone,
    K: Eq + Hash + Send + Sync,
    F: Fn(&T) -> K + Send + Sync,
{
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        if self.allow_duplicate {
            return Ok(Some(item.clone()));
        }

        if self.seen.insert((self.key)(item)) {
            Ok(Some(item.clone()))
        } else {
            debug!("Filtering duplicate item");
            Ok(None)
        }
    }
}

impl<T, K, F> StepExecutionListener for DuplicateValidationProcessor<T, K, F>
where
    K: Eq + Hash + Send + Sync,
    F: Fn(&T) -> K + Send + Sync,
{
    fn before_step(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        if !self.seen.is_empty() {
            debug!(
                "Step {}: forgetting {} keys of the previous execution",
                step_execution.name,
                self.seen.len()
            );
        }
        self.reset();
        Ok(())
    }
}
