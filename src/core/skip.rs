use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{BatchError, error::ErrorKind};

/// Outcome of classifying an error against a [`SkipPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Drop the offending item(s) and carry on with the chunk.
    Skip,
    /// The error kind is not skippable: abort the step.
    Fatal,
    /// The error kind is skippable but the limit is used up: abort the step.
    LimitExceeded,
}

/// Which errors may be skipped and how many skips a step execution allows.
///
/// No kind is skippable unless designated, so read and write errors are fatal
/// by default.
#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    skip_limit: usize,
    skippable: HashSet<ErrorKind>,
}

impl SkipPolicy {
    pub fn new(skip_limit: usize) -> Self {
        Self {
            skip_limit,
            skippable: HashSet::new(),
        }
    }

    pub fn skip_on(mut self, kind: ErrorKind) -> Self {
        self.skippable.insert(kind);
        self
    }

    pub fn with_skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn skip_limit(&self) -> usize {
        self.skip_limit
    }

    pub fn is_skippable(&self, error: &BatchError) -> bool {
        self.skippable.contains(&error.kind())
    }

    /// Classifies `error` and, when it is skipped, accounts `weight` skips on
    /// `skip_count`.
    ///
    /// The check and the increment are one atomic step, so the limit holds when
    /// several workers of the same step skip concurrently.
    pub fn try_skip(&self, error: &BatchError, skip_count: &AtomicUsize, weight: usize) -> SkipDecision {
        if !self.is_skippable(error) {
            return SkipDecision::Fatal;
        }

        let limit = self.skip_limit;
        let accounted = skip_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            let next = count + weight;
            (next <= limit).then_some(next)
        });

        match accounted {
            Ok(_) => SkipDecision::Skip,
            Err(_) => SkipDecision::LimitExceeded,
        }
    }

    /// Turns a non-skipped error into the error the step fails with.
    pub fn into_fatal(&self, decision: SkipDecision, error: BatchError) -> BatchError {
        match decision {
            SkipDecision::LimitExceeded => BatchError::SkipLimitExceeded {
                limit: self.skip_limit,
                source: Box::new(error),
            },
            _ => error,
        }
    }
}
