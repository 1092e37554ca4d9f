//! # Paging Tasklet
//!
//! A tasklet that walks an in-memory list one page per invocation, the
//! task-style alternative to a chunk-oriented step.
//!
//! The tasklet keeps no state of its own: the start of the next page is the
//! `read_count` of the step execution, so a step execution handed back to the
//! step resumes where the previous run stopped.
//!
//! ```rust
//! use chunk_batch::core::step::{Step, StepBuilder, StepExecution};
//! use chunk_batch::tasklet::paging::PagingTaskletBuilder;
//!
//! # fn example() -> Result<(), chunk_batch::BatchError> {
//! let items: Vec<String> = (0..100).map(|i| format!("{i} Hello")).collect();
//!
//! let tasklet = PagingTaskletBuilder::new()
//!     .items(items)
//!     .page_size(10)
//!     .on_page(|page: &[String]| {
//!         log::info!("task item size: {}", page.len());
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let step = StepBuilder::new("taskBaseStep").tasklet(&tasklet).build();
//! let mut step_execution = StepExecution::new(step.name());
//! step.execute(&mut step_execution)?;
//!
//! assert_eq!(step_execution.read_count, 100);
//! assert_eq!(step_execution.commit_count, 10);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use log::info;

use crate::{
    BatchError,
    core::{
        parameters::{CHUNK_SIZE, DEFAULT_CHUNK_SIZE},
        step::{RepeatStatus, StepExecution, Tasklet},
    },
};

type PageHandler<'a, T> = Box<dyn Fn(&[T]) -> Result<(), BatchError> + Send + Sync + 'a>;

pub struct PagingTasklet<'a, T> {
    items: Vec<T>,
    page_size: Option<usize>,
    on_page: PageHandler<'a, T>,
}

impl<T> PagingTasklet<'_, T> {
    /// The configured page size, or the `chunkSize` job parameter.
    fn page_size(&self, step_execution: &StepExecution) -> Result<usize, BatchError> {
        let page_size = match self.page_size {
            Some(page_size) => page_size,
            None => step_execution
                .job_parameters
                .get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?,
        };

        if page_size == 0 {
            return Err(BatchError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }
        Ok(page_size)
    }
}

impl<T: Send + Sync> Tasklet for PagingTasklet<'_, T> {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        let total = self.items.len();
        let from = step_execution.read_count;

        if from >= total {
            return Ok(RepeatStatus::Finished);
        }

        let to = from.saturating_add(self.page_size(step_execution)?).min(total);
        let page = &self.items[from..to];
        info!("task item size: {}", page.len());

        (self.on_page)(page)?;
        step_execution.read_count = to;
        step_execution.write_count += page.len();

        if to >= total {
            Ok(RepeatStatus::Finished)
        } else {
            Ok(RepeatStatus::Continuable)
        }
    }
}

pub struct PagingTaskletBuilder<'a, T> {
    items: Vec<T>,
    page_size: Option<usize>,
    on_page: Option<PageHandler<'a, T>>,
}

impl<T> Default for PagingTaskletBuilder<'_, T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page_size: None,
            on_page: None,
        }
    }
}

impl<'a, T> PagingTaskletBuilder<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(mut self, items: Vec<T>) -> Self {
        self.items = items;
        self
    }

    /// Fixed page size. Without it, each invocation reads the `chunkSize`
    /// job parameter, falling back to 10.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Receives every page, in order.
    pub fn on_page<F>(mut self, on_page: F) -> Self
    where
        F: Fn(&[T]) -> Result<(), BatchError> + Send + Sync + 'a,
    {
        self.on_page = Some(Box::new(on_page));
        self
    }

    pub fn build(self) -> Result<PagingTasklet<'a, T>, BatchError> {
        if self.page_size == Some(0) {
            return Err(BatchError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }

        Ok(PagingTasklet {
            items: self.items,
            page_size: self.page_size,
            on_page: self.on_page.unwrap_or_else(|| Box::new(|_: &[T]| Ok(()))),
        })
    }
}
