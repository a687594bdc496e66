use crate::error::RateTableError;
use crate::run::RunnerClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price per minute for one (provider, runner class) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub provider: String,
    pub runner_class: RunnerClass,
    pub per_minute: f64,
}

/// Rate resolved for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRate {
    pub per_minute: f64,
    /// Whether an exact entry matched. False means the default rate applied.
    pub matched: bool,
}

/// Resolves the cost-per-minute for a run's provider and runner class.
///
/// Implementations must always return a strictly positive rate.
pub trait RateResolver {
    fn resolve(&self, provider: &str, runner_class: RunnerClass) -> ResolvedRate;
}

/// Exact-match lookup table with a default fallback rate.
#[derive(Debug, Clone)]
pub struct RateTable {
    default_per_minute: f64,
    entries: HashMap<(String, RunnerClass), f64>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            default_per_minute: 0.1,
            entries: HashMap::new(),
        }
    }
}

impl RateTable {
    pub fn new(default_per_minute: f64) -> Result<Self, RateTableError> {
        if !is_valid_rate(default_per_minute) {
            return Err(RateTableError::NonPositiveDefault(default_per_minute));
        }
        Ok(Self {
            default_per_minute,
            entries: HashMap::new(),
        })
    }

    /// Build a table from a default rate and a list of entries.
    pub fn from_entries(
        default_per_minute: f64,
        entries: &[RateEntry],
    ) -> Result<Self, RateTableError> {
        entries
            .iter()
            .try_fold(Self::new(default_per_minute)?, |table, entry| {
                table.with_entry(&entry.provider, entry.runner_class, entry.per_minute)
            })
    }

    pub fn with_entry(
        mut self,
        provider: &str,
        runner_class: RunnerClass,
        per_minute: f64,
    ) -> Result<Self, RateTableError> {
        if !is_valid_rate(per_minute) {
            return Err(RateTableError::NonPositiveRate {
                provider: provider.to_string(),
                runner_class: runner_class.as_str().to_string(),
                rate: per_minute,
            });
        }

        let key = (provider_key(provider), runner_class);
        if self.entries.contains_key(&key) {
            return Err(RateTableError::DuplicateEntry {
                provider: provider.to_string(),
                runner_class: runner_class.as_str().to_string(),
            });
        }
        self.entries.insert(key, per_minute);
        Ok(self)
    }

    pub fn default_rate(&self) -> f64 {
        self.default_per_minute
    }

    /// Entries sorted by provider, then runner class.
    pub fn entries(&self) -> Vec<RateEntry> {
        let mut entries: Vec<RateEntry> = self
            .entries
            .iter()
            .map(|((provider, runner_class), per_minute)| RateEntry {
                provider: provider.clone(),
                runner_class: *runner_class,
                per_minute: *per_minute,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.provider
                .cmp(&b.provider)
                .then(a.runner_class.cmp(&b.runner_class))
        });
        entries
    }
}

impl RateResolver for RateTable {
    fn resolve(&self, provider: &str, runner_class: RunnerClass) -> ResolvedRate {
        match self.entries.get(&(provider_key(provider), runner_class)) {
            Some(rate) => ResolvedRate {
                per_minute: *rate,
                matched: true,
            },
            None => ResolvedRate {
                per_minute: self.default_per_minute,
                matched: false,
            },
        }
    }
}

fn provider_key(provider: &str) -> String {
    provider.trim().to_lowercase()
}

fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_default() {
        let table = RateTable::new(0.1)
            .unwrap()
            .with_entry("GitHub", RunnerClass::Hosted, 0.008)
            .unwrap();

        let rate = table.resolve("github", RunnerClass::Hosted);
        assert_eq!(rate.per_minute, 0.008);
        assert!(rate.matched);

        let fallback = table.resolve("github", RunnerClass::SelfHosted);
        assert_eq!(fallback.per_minute, 0.1);
        assert!(!fallback.matched);
    }

    #[test]
    fn rejects_non_positive_default() {
        assert_eq!(
            RateTable::new(0.0).unwrap_err(),
            RateTableError::NonPositiveDefault(0.0)
        );
        assert!(RateTable::new(-1.0).is_err());
        assert!(RateTable::new(f64::NAN).is_err());
    }

    #[test]
    fn rejects_bad_and_duplicate_entries() {
        let entries = vec![
            RateEntry {
                provider: "gitlab".into(),
                runner_class: RunnerClass::Hosted,
                per_minute: 0.01,
            },
            RateEntry {
                provider: "GitLab".into(),
                runner_class: RunnerClass::Hosted,
                per_minute: 0.02,
            },
        ];
        assert!(matches!(
            RateTable::from_entries(0.1, &entries),
            Err(RateTableError::DuplicateEntry { .. })
        ));

        let result = RateTable::new(0.1)
            .unwrap()
            .with_entry("gitlab", RunnerClass::SelfHosted, 0.0);
        assert!(matches!(result, Err(RateTableError::NonPositiveRate { .. })));
    }
}
