//! Redundancy classification.
//!
//! Every run gets exactly one [`Classification`]. The policy is an ordered
//! list of rules; the first rule whose predicate matches decides the label
//! and runs matching no rule are productive. The default policy is:
//!
//! 1. a `failure` conclusion is **failed**, whatever the branch state;
//! 2. a success that is not the latest success on its branch, with no new
//!    commits on the branch since it started, is **redundant**.
//!
//! Rules read branch history through a [`ClassificationContext`] built once
//! per batch; nothing is shared or mutated between runs.

use crate::run::{Classification, Conclusion, Run};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone)]
struct BranchEntry {
    id: String,
    started_at: DateTime<Utc>,
    commit_sha: String,
    success: bool,
}

impl BranchEntry {
    fn is_after(&self, run: &Run) -> bool {
        (self.started_at, self.id.as_str()) > (run.started_at, run.id.as_str())
    }
}

type BranchKey = (String, String, String);

/// Read-only branch history over a set of runs, keyed by provider,
/// repository and branch.
#[derive(Debug, Clone, Default)]
pub struct ClassificationContext {
    branches: HashMap<BranchKey, Vec<BranchEntry>>,
}

impl ClassificationContext {
    pub fn from_runs(runs: &[Run]) -> Self {
        let mut branches: HashMap<BranchKey, Vec<BranchEntry>> = HashMap::new();
        for run in runs {
            branches.entry(branch_key(run)).or_default().push(BranchEntry {
                id: run.id.clone(),
                started_at: run.started_at,
                commit_sha: run.commit_sha.clone(),
                success: run.is_success(),
            });
        }
        for entries in branches.values_mut() {
            entries.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        }
        Self { branches }
    }

    fn history(&self, run: &Run) -> &[BranchEntry] {
        self.branches
            .get(&branch_key(run))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Id of the most recently started successful run on the run's branch.
    pub fn latest_success_id(&self, run: &Run) -> Option<&str> {
        self.history(run)
            .iter()
            .rev()
            .find(|entry| entry.success)
            .map(|entry| entry.id.as_str())
    }

    pub fn is_latest_success(&self, run: &Run) -> bool {
        self.latest_success_id(run) == Some(run.id.as_str())
    }

    /// Whether any later run on the branch built a different commit.
    ///
    /// A missing commit sha on either side counts as a new commit: a run is
    /// only treated as a no-change rerun when the history proves it.
    pub fn has_commits_since(&self, run: &Run) -> bool {
        self.history(run)
            .iter()
            .filter(|entry| entry.is_after(run))
            .any(|entry| {
                entry.commit_sha.is_empty()
                    || run.commit_sha.is_empty()
                    || entry.commit_sha != run.commit_sha
            })
    }

    /// Start time of the most recent run on the run's branch.
    pub fn last_activity(&self, run: &Run) -> Option<DateTime<Utc>> {
        self.history(run).last().map(|entry| entry.started_at)
    }
}

fn branch_key(run: &Run) -> BranchKey {
    (
        run.provider.clone(),
        run.repository.clone(),
        run.branch.clone(),
    )
}

type Predicate = dyn Fn(&Run, &ClassificationContext) -> bool + Send + Sync;

/// A predicate paired with the label it assigns.
pub struct ClassificationRule {
    name: &'static str,
    label: Classification,
    predicate: Box<Predicate>,
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ClassificationRule {
    pub fn new(
        name: &'static str,
        label: Classification,
        predicate: impl Fn(&Run, &ClassificationContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            label,
            predicate: Box::new(predicate),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn label(&self) -> Classification {
        self.label
    }

    pub fn matches(&self, run: &Run, context: &ClassificationContext) -> bool {
        (self.predicate)(run, context)
    }

    pub fn failed_conclusion() -> Self {
        Self::new("failed_conclusion", Classification::Failed, |run, _| {
            run.is_failure()
        })
    }

    /// A success superseded by a later success with no code change in between.
    pub fn superseded_success() -> Self {
        Self::new("superseded_success", Classification::Redundant, |run, ctx| {
            run.is_success() && !ctx.is_latest_success(run) && !ctx.has_commits_since(run)
        })
    }

    /// A success on a branch with no activity since `as_of - max_age`.
    pub fn stale_success(max_age: Duration, as_of: DateTime<Utc>) -> Self {
        let cutoff = as_of - max_age;
        Self::new("stale_success", Classification::Redundant, move |run, ctx| {
            run.is_success()
                && ctx
                    .last_activity(run)
                    .map(|last| last < cutoff)
                    .unwrap_or(false)
        })
    }

    /// A cancelled or skipped run that still burned minutes.
    pub fn cancelled_waste() -> Self {
        Self::new("cancelled_waste", Classification::Redundant, |run, _| {
            matches!(
                run.conclusion,
                Some(Conclusion::Cancelled) | Some(Conclusion::Skipped)
            ) && run.duration_minutes.unwrap_or(0.0) > 0.0
        })
    }
}

/// Opt-in rules appended after the default policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Count cancelled/skipped runs with nonzero duration as redundant.
    #[serde(default)]
    pub cancelled_is_waste: bool,

    /// Treat successes on branches idle for this many days as redundant.
    pub stale_after_days: Option<u32>,
}

/// Ordered rule list. First match wins; no match means productive.
#[derive(Debug)]
pub struct ClassificationPolicy {
    rules: Vec<ClassificationRule>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::new(vec![
            ClassificationRule::failed_conclusion(),
            ClassificationRule::superseded_success(),
        ])
    }
}

impl ClassificationPolicy {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Default policy plus whichever opt-in rules the config enables.
    pub fn from_config(config: &ClassificationConfig, as_of: DateTime<Utc>) -> Self {
        let mut policy = Self::default();
        if let Some(days) = config.stale_after_days {
            policy = policy.with_rule(ClassificationRule::stale_success(
                Duration::days(i64::from(days)),
                as_of,
            ));
        }
        if config.cancelled_is_waste {
            policy = policy.with_rule(ClassificationRule::cancelled_waste());
        }
        policy
    }

    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(ClassificationRule::name).collect()
    }

    pub fn classify_run(&self, run: &Run, context: &ClassificationContext) -> Classification {
        match self.rules.iter().find(|rule| rule.matches(run, context)) {
            Some(rule) => {
                debug!(run_id = %run.id, rule = rule.name(), label = rule.label().as_str(), "classified run");
                rule.label()
            }
            None => Classification::Productive,
        }
    }
}

/// Classify a batch with the default policy.
pub fn classify(runs: Vec<Run>) -> Vec<Run> {
    classify_with(runs, &ClassificationPolicy::default())
}

/// Classify a batch. The whole batch is the branch context, so pass every
/// known run of the repositories involved, not a filtered subset.
pub fn classify_with(runs: Vec<Run>, policy: &ClassificationPolicy) -> Vec<Run> {
    let context = ClassificationContext::from_runs(&runs);
    runs.into_iter()
        .map(|mut run| {
            run.classification = Some(policy.classify_run(&run, &context));
            run
        })
        .collect()
}
