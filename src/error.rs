use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    /// The item source failed to produce the next item.
    #[error("ItemReader error: {0}")]
    ItemReader(String),

    /// The item transform failed.
    #[error("ItemProcessor error: {0}")]
    ItemProcessor(String),

    /// The item transform rejected an item as invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The item sink failed to write a chunk.
    #[error("ItemWriter error: {0}")]
    ItemWriter(String),

    /// A job, step or component was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The named step ended with a failed status.
    #[error("Step {0} failed")]
    Step(String),

    /// A retry listener vetoed the retry operation.
    #[error("Retry terminated: {0}")]
    RetryTerminated(String),

    /// A skippable error arrived after the skip limit was used up.
    #[error("Skip limit of {limit} exceeded: {source}")]
    SkipLimitExceeded {
        limit: usize,
        source: Box<BatchError>,
    },
}

/// Classification of a [`BatchError`] used by the retry and skip policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Read,
    Process,
    Validation,
    Write,
    Configuration,
    Step,
    Retry,
}

impl BatchError {
    /// Returns the kind this error is classified as.
    ///
    /// A `SkipLimitExceeded` error keeps the kind of the error that crossed the limit.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::ItemReader(_) => ErrorKind::Read,
            BatchError::ItemProcessor(_) => ErrorKind::Process,
            BatchError::Validation(_) => ErrorKind::Validation,
            BatchError::ItemWriter(_) => ErrorKind::Write,
            BatchError::Configuration(_) => ErrorKind::Configuration,
            BatchError::Step(_) => ErrorKind::Step,
            BatchError::RetryTerminated(_) => ErrorKind::Retry,
            BatchError::SkipLimitExceeded { source, .. } => source.kind(),
        }
    }
}
