//! Test identities and `-r/--run` selector parsing.

use std::fmt;

use crate::errors::{HarnessError, HarnessResult};

/// The `(subgroup, number)` pair that names a case within one harness.
///
/// The group is constant for a harness instance, so registry sets key on this pair alone.
/// Ordering is by subgroup, then number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseKey {
    pub subgroup: String,
    pub number: u32,
}

impl CaseKey {
    pub fn new(subgroup: impl Into<String>, number: u32) -> Self {
        Self {
            subgroup: subgroup.into(),
            number,
        }
    }

    /// Qualify this key with the harness group.
    pub fn in_group(&self, group: &str) -> TestIdentity {
        TestIdentity {
            group: group.to_string(),
            subgroup: self.subgroup.clone(),
            number: self.number,
        }
    }
}

/// Fully qualified name of one test case: `group.subgroup.number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestIdentity {
    pub group: String,
    pub subgroup: String,
    pub number: u32,
}

impl TestIdentity {
    pub fn new(group: impl Into<String>, subgroup: impl Into<String>, number: u32) -> Self {
        Self {
            group: group.into(),
            subgroup: subgroup.into(),
            number,
        }
    }

    pub fn key(&self) -> CaseKey {
        CaseKey::new(self.subgroup.clone(), self.number)
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.group, self.subgroup, self.number)
    }
}

/// Parse a `group.subgroup.N` selector into the key it names.
///
/// The selector is split on its last `.`; the trailing field must be an unsigned integer. A
/// leading `group.` matching `group` is stripped, so `subgroup.N` is accepted as well.
///
/// ## Errors
///
/// Returns [`HarnessError::InvalidArgument`] when there is no `.`, the trailing field is not a
/// `u32`, or nothing is left for the subgroup.
pub fn parse_selector(selector: &str, group: &str) -> HarnessResult<CaseKey> {
    let invalid = |reason: &str| HarnessError::InvalidArgument {
        argument: selector.to_string(),
        reason: reason.to_string(),
    };

    let (prefix, number) = selector
        .rsplit_once('.')
        .ok_or_else(|| invalid("expected GROUP.SUBGROUP.N"))?;
    let number: u32 = number
        .parse()
        .map_err(|_| invalid("test number must be an unsigned integer"))?;

    let subgroup = prefix
        .strip_prefix(group)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(prefix);
    if subgroup.is_empty() {
        return Err(invalid("missing subgroup"));
    }

    Ok(CaseKey::new(subgroup, number))
}
