use std::{collections::HashSet, sync::Arc};

use log::debug;

use crate::{BatchError, error::ErrorKind};

/// Default number of attempts made for one item.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// State of one retry operation: the attempt counter and the last error seen.
///
/// A context lives for exactly one item and is dropped once the item resolves.
#[derive(Debug, Default)]
pub struct RetryContext {
    attempt: usize,
    last_error: Option<String>,
}

impl RetryContext {
    /// Number of attempts started so far (1 during the first attempt).
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Callbacks around a retry operation.
pub trait RetryListener: Send + Sync {
    /// Called before the first attempt. Returning `false` vetoes the operation.
    fn open(&self, _context: &RetryContext) -> bool {
        true
    }

    /// Called after every failed attempt.
    fn on_error(&self, _context: &RetryContext, _error: &BatchError) {}

    /// Called once when the operation resolves, with the final error if it
    /// did not succeed.
    fn close(&self, _context: &RetryContext, _error: Option<&BatchError>) {}
}

/// Which errors are retried and how many attempts one item gets.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    retryable: HashSet<ErrorKind>,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            retryable: HashSet::new(),
        }
    }

    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn is_retryable(&self, error: &BatchError) -> bool {
        self.retryable.contains(&error.kind())
    }

    pub fn has_retryable_kinds(&self) -> bool {
        !self.retryable.is_empty()
    }

    fn can_retry(&self, context: &RetryContext, error: &BatchError) -> bool {
        self.is_retryable(error) && context.attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Executes an operation, re-attempting it on retryable errors.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use chunk_batch::{BatchError, error::ErrorKind};
/// use chunk_batch::core::retry::{RetryPolicy, RetryTemplate};
///
/// let template = RetryTemplate::builder()
///     .policy(RetryPolicy::new(3).retry_on(ErrorKind::Validation))
///     .build()
///     .unwrap();
///
/// let calls = Cell::new(0);
/// let name = template
///     .execute_with_recovery(
///         |_| {
///             calls.set(calls.get() + 1);
///             Err(BatchError::Validation("name is empty".to_string()))
///         },
///         |_| Ok("UNKNOWN".to_string()),
///     )
///     .unwrap();
///
/// assert_eq!(name, "UNKNOWN");
/// assert_eq!(calls.get(), 3);
/// ```
#[derive(Clone, Default)]
pub struct RetryTemplate {
    policy: RetryPolicy,
    listeners: Vec<Arc<dyn RetryListener>>,
}

impl RetryTemplate {
    pub fn builder() -> RetryTemplateBuilder {
        RetryTemplateBuilder::default()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `callback` until it succeeds, fails with a non-retryable error, or
    /// uses up the attempts. The last error is returned in the two latter cases.
    pub fn execute<T, C>(&self, callback: C) -> Result<T, BatchError>
    where
        C: FnMut(&RetryContext) -> Result<T, BatchError>,
    {
        self.run(callback, None::<fn(&RetryContext) -> Result<T, BatchError>>)
    }

    /// Like [`RetryTemplate::execute`], but once a retryable error has been seen
    /// on every attempt, `recovery` supplies the result instead.
    ///
    /// Recovery runs at most once per operation and never for non-retryable
    /// errors.
    pub fn execute_with_recovery<T, C, R>(&self, callback: C, recovery: R) -> Result<T, BatchError>
    where
        C: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        self.run(callback, Some(recovery))
    }

    fn run<T, C, R>(&self, mut callback: C, recovery: Option<R>) -> Result<T, BatchError>
    where
        C: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        let mut context = RetryContext::default();

        if !self.listeners.iter().all(|listener| listener.open(&context)) {
            let error = BatchError::RetryTerminated("vetoed by a retry listener".to_string());
            self.close(&context, Some(&error));
            return Err(error);
        }

        loop {
            context.attempt += 1;

            let error = match callback(&context) {
                Ok(value) => {
                    self.close(&context, None);
                    return Ok(value);
                }
                Err(error) => error,
            };

            context.last_error = Some(error.to_string());
            self.listeners
                .iter()
                .for_each(|listener| listener.on_error(&context, &error));

            if self.policy.can_retry(&context, &error) {
                debug!(
                    "Retrying after attempt {}/{}: {}",
                    context.attempt, self.policy.max_attempts, error
                );
                continue;
            }

            let result = match recovery {
                Some(recovery) if self.policy.is_retryable(&error) => {
                    debug!("Retries exhausted after {} attempts, recovering", context.attempt);
                    recovery(&context)
                }
                _ => Err(error),
            };
            self.close(&context, result.as_ref().err());
            return result;
        }
    }

    fn close(&self, context: &RetryContext, error: Option<&BatchError>) {
        self.listeners
            .iter()
            .for_each(|listener| listener.close(context, error));
    }
}

/// Builder for a [`RetryTemplate`].
#[derive(Default)]
pub struct RetryTemplateBuilder {
    policy: RetryPolicy,
    listeners: Vec<Arc<dyn RetryListener>>,
}

impl RetryTemplateBuilder {
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.policy = self.policy.retry_on(kind);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<RetryTemplate, BatchError> {
        if self.policy.max_attempts == 0 {
            return Err(BatchError::Configuration(
                "retry max attempts must be at least 1".to_string(),
            ));
        }
        Ok(RetryTemplate {
            policy: self.policy,
            listeners: self.listeners,
        })
    }
}
