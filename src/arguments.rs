//! Named run-time options populated from `-A name=value`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::{HarnessError, HarnessResult};

/// Option name to value mapping handed to test bodies.
///
/// Repeating a name keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    values: BTreeMap<String, String>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from raw `name=value` assignments, in command-line order.
    pub fn from_assignments<I, S>(assignments: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut arguments = Self::new();
        for raw in assignments {
            let (name, value) = parse_assignment(raw.as_ref())?;
            arguments.insert(name, value);
        }
        Ok(arguments)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Look up `name`, falling back to `default` when it was never set.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parse the value of `name` as `T`.
    ///
    /// Returns `Ok(None)` when the option is absent and [`HarnessError::InvalidArgument`] when
    /// it is present but does not parse.
    pub fn parse<T>(&self, name: &str) -> HarnessResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|e: T::Err| HarnessError::InvalidArgument {
            argument: format!("{name}={raw}"),
            reason: e.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Split one `-A` assignment at its first `=`.
///
/// The value may be empty or contain further `=` characters; the name may not be empty.
pub fn parse_assignment(raw: &str) -> HarnessResult<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        Some(_) => Err(HarnessError::InvalidArgument {
            argument: raw.to_string(),
            reason: "missing option name before `=`".to_string(),
        }),
        None => Err(HarnessError::InvalidArgument {
            argument: raw.to_string(),
            reason: "expected NAME=VALUE".to_string(),
        }),
    }
}
