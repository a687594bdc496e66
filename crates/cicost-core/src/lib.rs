pub mod run;
pub mod error;
pub mod rates;
pub mod normalize;
pub mod cost;
pub mod classify;
pub mod aggregate;
pub mod anomaly;
pub mod config;
pub mod report;

pub use aggregate::{aggregate, AggregateBucket, AggregateResult, Dimension, GroupingSpec, Kpis, RunFilter, TimeBucket};
pub use anomaly::{detect_anomalies, project_savings, AnomalyConfig, AnomalyResult, AnomalyStatus, SavingsProjection};
pub use classify::{classify, ClassificationContext, ClassificationPolicy, ClassificationRule};
pub use config::{load_config, EngineConfig};
pub use error::{ConfigError, InsufficientDataError, NormalizationError, RateTableError};
pub use normalize::{normalize_and_cost, BatchOutcome, Provider, RawRun};
pub use rates::{RateResolver, RateTable};
pub use report::{analyze_batch, InsightReport};
pub use run::{Classification, Conclusion, Run, RunStatus, RunnerClass};
