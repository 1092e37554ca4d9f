use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Parameter holding the commit interval of chunk steps.
pub const CHUNK_SIZE: &str = "chunkSize";
/// Default commit interval when `chunkSize` is absent.
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Parameter disabling duplicate suppression when `true`.
pub const ALLOW_DUPLICATE: &str = "allow_duplicate";
/// Parameter holding the `YYYY-MM` month a statistics run covers.
pub const DATE: &str = "date";
/// Parameter holding the output directory of file artifacts.
pub const PATH: &str = "path";
/// Default output directory when `path` is absent.
pub const DEFAULT_PATH: &str = "output/";
/// Parameter holding the number of partitions / workers.
pub const GRID_SIZE: &str = "gridSize";

/// Immutable, string-keyed parameters supplied when a job is launched.
///
/// Absent optional keys fall back to the caller's default instead of failing;
/// only a present but malformed value is an error. Cloning is cheap, the map
/// is shared.
///
/// ```
/// use chunk_batch::core::parameters::JobParameters;
///
/// let parameters = JobParameters::builder()
///     .add("chunkSize", "25")
///     .add("date", "2024-03")
///     .build();
///
/// assert_eq!(parameters.get_usize_or("chunkSize", 10).unwrap(), 25);
/// assert_eq!(parameters.get_bool_or("allow_duplicate", false).unwrap(), false);
/// assert_eq!(parameters.get_non_empty("date"), Some("2024-03"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    values: Arc<BTreeMap<String, String>>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    /// Parses `key=value` pairs, as given on the command line.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, BatchError> {
        let mut builder = Self::builder();
        for pair in pairs {
            let (key, value) = parse_pair(pair.as_ref())?;
            builder = builder.add(key, value);
        }
        Ok(builder.build())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value of `key` unless it is absent or empty.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_non_empty(key).unwrap_or(default)
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, BatchError> {
        self.parse_or(key, default)
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, BatchError> {
        self.parse_or(key, default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, BatchError> {
        self.parse_or(key, default)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, BatchError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get_non_empty(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|error| {
                BatchError::Configuration(format!(
                    "job parameter '{key}' has invalid value '{raw}': {error}"
                ))
            }),
        }
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .values
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

fn parse_pair(pair: &str) -> Result<(&str, &str), BatchError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(BatchError::Configuration(format!(
            "job parameter '{pair}' is not of the form key=value"
        ))),
    }
}

/// Builder for [`JobParameters`].
#[derive(Default)]
pub struct JobParametersBuilder {
    values: BTreeMap<String, String>,
}

impl JobParametersBuilder {
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            values: Arc::new(self.values),
        }
    }
}
