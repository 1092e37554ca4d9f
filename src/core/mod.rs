use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod context;

pub mod flow;

pub mod item;

pub mod job;

pub mod launcher;

pub mod listener;

pub mod parameters;

pub mod partition;

pub mod retry;

pub mod skip;

pub mod step;

pub mod task_executor;

/// Generates a random name consisting of alphanumeric characters.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
