//! Environment variable access
//!
//! Reads go through a lookup function so configuration can be built from
//! something other than the process environment.

use std::fmt::Display;
use std::str::FromStr;

use super::validation::Problems;

/// Typed reader over a variable lookup.
pub(crate) struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub(crate) fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Trimmed value; empty values count as unset.
    pub(crate) fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parsed value. Unparsable values are recorded and treated as unset.
    pub(crate) fn parsed<T>(&self, name: &str, problems: &mut Problems) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.string(name)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                problems.invalid(name, &raw, e.to_string());
                None
            }
        }
    }
}

/// Lookup over the process environment.
pub(crate) fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
