//! # Tasklet Module
//!
//! Tasklets are single repeatable units of work that don't follow the
//! chunk-oriented read/process/write decomposition.

pub mod paging;
