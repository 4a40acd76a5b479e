//! Which cases have run, and which the user asked for.

use std::collections::BTreeSet;

use crate::errors::{HarnessError, HarnessResult};
use crate::identity::CaseKey;

/// What the registry decided about one `run()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The case runs and is now recorded as run.
    Admitted,
    /// A selection is active and does not name this case.
    Filtered,
}

/// Have-run set plus the optional `-r/--run` selection.
///
/// Selected keys are consumed as they run; whatever is left at shutdown was requested but never
/// registered.
#[derive(Debug, Clone)]
pub struct Registry {
    group: String,
    have_run: BTreeSet<CaseKey>,
    selection: BTreeSet<CaseKey>,
    selective: bool,
}

impl Registry {
    pub fn new(group: impl Into<String>, selection: impl IntoIterator<Item = CaseKey>) -> Self {
        let selection: BTreeSet<CaseKey> = selection.into_iter().collect();
        Self {
            group: group.into(),
            have_run: BTreeSet::new(),
            selective: !selection.is_empty(),
            selection,
        }
    }

    /// Decide whether `key` runs, recording it if so.
    ///
    /// A key that already ran is a duplicate even when a selection is active, since consuming
    /// the selection would otherwise hide the second registration.
    ///
    /// ## Errors
    ///
    /// [`HarnessError::DuplicateTestIdentity`] when `key` already ran in this harness.
    pub fn admit(&mut self, key: &CaseKey) -> HarnessResult<Admission> {
        if self.have_run.contains(key) {
            return Err(HarnessError::DuplicateTestIdentity {
                identity: key.in_group(&self.group),
            });
        }
        if self.selective && !self.selection.remove(key) {
            return Ok(Admission::Filtered);
        }
        self.have_run.insert(key.clone());
        Ok(Admission::Admitted)
    }

    pub fn is_selective(&self) -> bool {
        self.selective
    }

    pub fn has_run(&self, key: &CaseKey) -> bool {
        self.have_run.contains(key)
    }

    pub fn run_count(&self) -> usize {
        self.have_run.len()
    }

    /// Selected keys not consumed by any `run()` so far.
    pub fn unrun(&self) -> impl Iterator<Item = &CaseKey> {
        self.selection.iter()
    }

    pub fn unrun_count(&self) -> usize {
        self.selection.len()
    }
}
