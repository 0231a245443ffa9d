//! # Cooperative KPI Engine
//!
//! Turns declarative indicator formulas and raw account balances into
//! financial ratios, monthly averages and color-graded KPIs for a financial
//! cooperative's reporting dashboard.
//!
//! ## Core Concepts
//!
//! - **Part**: one side (numerator or denominator) of a formula, written as a
//!   flat account list, a `base + suma - resta` form, or weighted components
//! - **Bucket**: the balances of one office on one date; buckets are
//!   calculated independently
//! - **Safe zero**: an indicator whose denominator sums to zero reports 0
//! - **Threshold band**: a `[min, max] -> color` rule used to grade a value
//!
//! ## Example
//!
//! ```rust,ignore
//! use cooperative_kpi_engine::*;
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! let catalog = IndicatorCatalog::from_json(&std::fs::read_to_string("indicators.json")?)?;
//! let balances = load_balances_json(&std::fs::read_to_string("balances.json")?)?;
//!
//! let engine = KpiEngine::new(EngineConfig::default())?;
//! let report = engine.run(
//!     &["01".to_string()],
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
//!     &catalog,
//!     Arc::new(InMemoryBalanceSource::new(balances.records, Granularity::Month)),
//!     &CancellationToken::new(),
//! );
//! for row in &report.monthly {
//!     println!("{} {:?}", row.month, row.values);
//! }
//! ```

pub mod aggregator;
pub mod batch;
pub mod bucketer;
pub mod calculator;
pub mod classifier;
pub mod config;
pub mod dates;
pub mod error;
pub mod evaluator;
pub mod ingestion;
pub mod schema;
pub mod source;

pub use aggregator::{
    average_by_month, average_over_period, filter_by_period, filter_results_by_period, round2,
    scale_results, scale_value,
};
pub use batch::{
    calculate_bucket, calculate_snapshot, run_batch, BatchReport, BatchRequest, BatchRunner,
    BucketResults, CancellationToken, DateRange, FailedBucket, IndicatorFailure, ReportStatus,
};
pub use bucketer::{
    bucket_by_date, bucket_by_date_and_office, date_key, latest_snapshot, BucketKey,
};
pub use calculator::{calculate_indicator, IndicatorCalculator};
pub use classifier::{
    classify, classify_indicator, classify_or_representative, latest_kpis, representative_value,
    resolve_band, KpiClassification,
};
pub use config::{EngineConfig, ValueScale, DEFAULT_COLOR};
pub use dates::{generate_date_range, parse_balance_date, parse_period_string, Granularity};
pub use error::{IndicatorError, Result};
pub use evaluator::{evaluate_part, PartEvaluation};
pub use ingestion::{load_balances_json, normalize_balances, NormalizedBalances, RawBalanceRecord};
pub use schema::*;
pub use source::{
    BalanceSource, IndicatorSource, InMemoryBalanceSource, JsonLinesSink, MemorySink, ResultSink,
};

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything a dashboard needs from one run: raw results, monthly averages
/// and the latest grade per indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub batch: BatchReport,
    pub monthly: Vec<MonthlyAverage>,
    pub kpis: Vec<KpiClassification>,
}

pub struct KpiEngine {
    config: EngineConfig,
    runner: BatchRunner,
}

impl KpiEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let runner = BatchRunner::new(&config)?;
        info!(
            "KPI engine ready: {} workers, {:?} granularity, {:?} values",
            config.workers, config.granularity, config.value_scale
        );
        Ok(Self { config, runner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(
        &self,
        offices: &[String],
        start: NaiveDate,
        end: NaiveDate,
        indicators: &dyn IndicatorSource,
        balances: Arc<dyn BalanceSource>,
        token: &CancellationToken,
    ) -> KpiReport {
        let definitions = match indicators.list_indicators() {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!("Could not load indicator definitions: {}", e);
                return KpiReport {
                    batch: BatchReport::invalid(format!("Could not load indicators: {}", e)),
                    monthly: Vec::new(),
                    kpis: Vec::new(),
                };
            }
        };
        debug!(
            "Running {} indicators for {} offices from {} to {}",
            definitions.len(),
            offices.len(),
            start,
            end
        );

        let request = BatchRequest {
            offices: offices.to_vec(),
            range: DateRange::new(start, end, self.config.granularity),
        };
        let definitions = Arc::new(definitions);
        let batch = self
            .runner
            .run(&request, Arc::clone(&definitions), balances, token);

        let monthly = average_by_month(&batch.results, &definitions, self.config.value_scale);
        let office = match offices {
            [single] => Some(single.as_str()),
            _ => None,
        };
        let kpis = latest_kpis(&batch.results, &definitions, office, &self.config);

        KpiReport {
            batch,
            monthly,
            kpis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn catalog() -> IndicatorCatalog {
        IndicatorCatalog::from_json(
            r#"{"indicators": [{
                "id": "liq",
                "name": "Liquidity",
                "numerator": {"components": [{"accounts": ["1101"], "coefficient": 1}]},
                "denominator": {"components": [{"accounts": ["2101"]}]},
                "meta": 40,
                "thresholds": {"bands": [
                    {"color": "red", "min": 0, "max": 40, "label": "Low"},
                    {"color": "green", "min": 40, "max": 100, "label": "Adequate"}
                ]}
            }]}"#,
        )
        .unwrap()
    }

    fn balances() -> InMemoryBalanceSource {
        let mut records = Vec::new();
        for (date, cash, deposits) in [
            (ymd(2024, 1, 31), 300.0, 1000.0),
            (ymd(2024, 2, 29), 500.0, 1000.0),
        ] {
            records.push(BalanceRecord::new(date, "01", "1101", cash));
            records.push(BalanceRecord::new(date, "01", "2101", deposits));
        }
        InMemoryBalanceSource::new(records, Granularity::Month)
    }

    #[test]
    fn test_end_to_end_report() {
        let engine = KpiEngine::new(EngineConfig {
            workers: 2,
            ..EngineConfig::default()
        })
        .unwrap();

        let report = engine.run(
            &["01".to_string()],
            ymd(2024, 1, 1),
            ymd(2024, 3, 15),
            &catalog(),
            Arc::new(balances()),
            &CancellationToken::new(),
        );

        assert_eq!(report.batch.status, ReportStatus::Ok);
        assert_eq!(report.batch.results.len(), 2);
        assert_eq!(report.batch.skipped.len(), 1);

        assert_eq!(report.monthly.len(), 2);
        assert_eq!(report.monthly[0].values["Liquidity"], 30.0);
        assert_eq!(report.monthly[1].values["Liquidity"], 50.0);

        assert_eq!(report.kpis[0].value, Some(50.0));
        assert_eq!(report.kpis[0].color, "green");
        assert_eq!(report.kpis[0].meets_meta, Some(true));
    }

    #[test]
    fn test_no_data_is_reported_not_raised() {
        let engine = KpiEngine::new(EngineConfig::default()).unwrap();
        let report = engine.run(
            &["99".to_string()],
            ymd(2024, 1, 1),
            ymd(2024, 2, 29),
            &catalog(),
            Arc::new(balances()),
            &CancellationToken::new(),
        );
        assert_eq!(report.batch.status, ReportStatus::NoData);
        assert!(report.monthly.is_empty());
        assert_eq!(report.kpis[0].value, None);
    }
}
