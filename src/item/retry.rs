use crate::core::{
    item::{ItemProcessor, ItemProcessorResult},
    retry::{RetryContext, RetryTemplate},
};

type Recovery<'a, I, O> = Box<dyn Fn(&I, &RetryContext) -> ItemProcessorResult<O> + Send + Sync + 'a>;

/// Retries a delegate processor on retryable errors, falling back to a
/// recovery function once the attempts are used up.
///
/// ```
/// use chunk_batch::BatchError;
/// use chunk_batch::core::item::{ItemProcessor, processor_fn};
/// use chunk_batch::core::retry::RetryTemplate;
/// use chunk_batch::error::ErrorKind;
/// use chunk_batch::item::retry::RetryItemProcessor;
///
/// let validate = processor_fn(|name: &String| {
///     if name.is_empty() {
///         Err(BatchError::Validation("name is empty".to_string()))
///     } else {
///         Ok(Some(name.clone()))
///     }
/// });
/// let template = RetryTemplate::builder()
///     .retry_on(ErrorKind::Validation)
///     .build()
///     .unwrap();
///
/// let processor = RetryItemProcessor::<String, String>::new(&validate, template)
///     .recover(|_, _| Ok(Some("UNKNOWN".to_string())));
///
/// assert_eq!(processor.process(&String::new()).unwrap(), Some("UNKNOWN".to_string()));
/// ```
pub struct RetryItemProcessor<'a, I, O> {
    delegate: &'a dyn ItemProcessor<I, O>,
    template: RetryTemplate,
    recovery: Option<Recovery<'a, I, O>>,
}

impl<'a, I, O> RetryItemProcessor<'a, I, O> {
    pub fn new(delegate: &'a dyn ItemProcessor<I, O>, template: RetryTemplate) -> Self {
        Self {
            delegate,
            template,
            recovery: None,
        }
    }

    /// Supplies the result for an item whose attempts all failed with a
    /// retryable error.
    pub fn recover<F>(mut self, recovery: F) -> Self
    where
        F: Fn(&I, &RetryContext) -> ItemProcessorResult<O> + Send + Sync + 'a,
    {
        self.recovery = Some(Box::new(recovery));
        self
    }
}

impl<I, O> ItemProcessor<I, O> for RetryItemProcessor<'_, I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        let attempt = |_: &RetryContext| self.delegate.process(item);

        match &self.recovery {
            Some(recovery) => self
                .template
                .execute_with_recovery(attempt, |context| recovery(item, context)),
            None => self.template.execute(attempt),
        }
    }
}
