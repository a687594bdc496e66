use crate::rates::RateResolver;
use crate::run::{Run, RunCost};
use tracing::debug;

/// Attach a monetary cost to a run.
///
/// `cost = duration_minutes * rate`. Runs that are not completed have no
/// duration and are charged 0; they are never estimated.
pub fn cost_run<R: RateResolver + ?Sized>(mut run: Run, rates: &R) -> Run {
    let rate = rates.resolve(&run.provider, run.runner_class);
    if !rate.matched {
        debug!(
            run_id = %run.id,
            provider = %run.provider,
            runner_class = run.runner_class.as_str(),
            rate = rate.per_minute,
            "no rate entry matched, using default rate"
        );
    }

    let amount = match (run.is_completed(), run.duration_minutes) {
        (true, Some(minutes)) => minutes.max(0.0) * rate.per_minute,
        _ => 0.0,
    };

    run.cost = Some(RunCost {
        amount,
        rate_per_minute: rate.per_minute,
        rate_matched: rate.matched,
    });
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{RateTable, ResolvedRate};
    use crate::run::{Conclusion, RunStatus, RunnerClass};
    use chrono::{Duration, TimeZone, Utc};

    fn run_with_minutes(minutes: i64) -> Run {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut run = Run::new("1".into(), "gh".into(), "acme/api".into(), start)
            .completed(Conclusion::Success, start + Duration::minutes(minutes));
        run.runner_class = RunnerClass::Hosted;
        run
    }

    #[test]
    fn cost_is_duration_times_rate() {
        let rates = RateTable::new(2.0).unwrap();
        let run = cost_run(run_with_minutes(10), &rates);
        let cost = run.cost.unwrap();
        assert_eq!(cost.amount, 20.0);
        assert_eq!(cost.rate_per_minute, 2.0);
        assert!(!cost.rate_matched);
    }

    #[test]
    fn incomplete_run_costs_nothing() {
        let rates = RateTable::new(2.0).unwrap();
        let mut run = run_with_minutes(10);
        run.status = RunStatus::InProgress;
        run.conclusion = None;
        run.duration_minutes = None;
        run.finished_at = None;

        let run = cost_run(run, &rates);
        assert_eq!(run.cost_amount(), 0.0);
        assert!(run.cost.unwrap().rate_per_minute > 0.0);
    }

    #[test]
    fn custom_resolver_is_pluggable() {
        struct Flat;
        impl RateResolver for Flat {
            fn resolve(&self, _: &str, class: RunnerClass) -> ResolvedRate {
                let per_minute = if class == RunnerClass::SelfHosted { 0.5 } else { 1.0 };
                ResolvedRate {
                    per_minute,
                    matched: true,
                }
            }
        }

        let mut run = run_with_minutes(4);
        run.runner_class = RunnerClass::SelfHosted;
        let run = cost_run(run, &Flat);
        assert_eq!(run.cost_amount(), 2.0);
        assert!(run.cost.unwrap().rate_matched);
    }
}
