use crate::bucketer::{bucket_by_date_and_office, latest_snapshot, BucketKey};
use crate::calculator::calculate_indicator;
use crate::config::EngineConfig;
use crate::dates::{generate_date_range, Granularity};
use crate::error::Result;
use crate::schema::{BalanceRecord, CalculatedIndicator, DatedResults, IndicatorDefinition};
use crate::source::{BalanceSource, ResultSink};
use chrono::NaiveDate;
use futures::executor::{block_on, ThreadPool};
use futures::future::{join_all, RemoteHandle};
use futures::task::SpawnExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between buckets. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> Self {
        Self {
            start,
            end,
            granularity,
        }
    }

    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        generate_date_range(self.start, self.end, self.granularity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFailure {
    pub indicator_id: String,
    pub reason: String,
}

/// Every indicator evaluated over one `(date, office)` bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketResults {
    pub key: BucketKey,
    pub indicators: Vec<CalculatedIndicator>,
    pub failures: Vec<IndicatorFailure>,
}

/// Runs every indicator over one bucket. An indicator that fails to evaluate
/// is replaced by a zero placeholder so the rest of the bucket survives.
pub fn calculate_bucket(
    key: &BucketKey,
    balances: &[BalanceRecord],
    indicators: &[IndicatorDefinition],
) -> BucketResults {
    let mut results = BucketResults {
        key: key.clone(),
        indicators: Vec::with_capacity(indicators.len()),
        failures: Vec::new(),
    };

    for indicator in indicators {
        match calculate_indicator(indicator, balances) {
            Ok(result) => results.indicators.push(CalculatedIndicator::from_result(
                key.date,
                &indicator.id,
                &key.office_code,
                result,
            )),
            Err(e) => {
                error!(
                    "Substituting zero for indicator '{}' on {} office {}: {}",
                    indicator.id, key.date, key.office_code, e
                );
                results.failures.push(IndicatorFailure {
                    indicator_id: indicator.id.clone(),
                    reason: e.to_string(),
                });
                results.indicators.push(CalculatedIndicator::placeholder(
                    key.date,
                    &indicator.id,
                    &key.office_code,
                ));
            }
        }
    }

    results
}

#[derive(Debug, Clone, PartialEq)]
enum BucketOutcome {
    Calculated(BucketResults),
    NoData(BucketKey),
    Failed(BucketKey, String),
    Cancelled,
}

fn process_bucket(
    key: BucketKey,
    indicators: &[IndicatorDefinition],
    source: &dyn BalanceSource,
    token: &CancellationToken,
) -> BucketOutcome {
    if token.is_cancelled() {
        return BucketOutcome::Cancelled;
    }

    let balances = match source.fetch_balances(&key.office_code, &[key.date]) {
        Ok(balances) => latest_snapshot(balances, &key.office_code),
        Err(e) => {
            warn!(
                "Skipping {} office {}: balance fetch failed: {}",
                key.date, key.office_code, e
            );
            return BucketOutcome::Failed(key, e.to_string());
        }
    };

    if balances.is_empty() {
        debug!("No balances for {} office {}; skipping", key.date, key.office_code);
        return BucketOutcome::NoData(key);
    }

    BucketOutcome::Calculated(calculate_bucket(&key, &balances, indicators))
}

/// Sequential batch for one office: one entry per date that has balances.
pub fn run_batch(
    office_code: &str,
    range: &DateRange,
    indicators: &[IndicatorDefinition],
    source: &dyn BalanceSource,
) -> Result<DatedResults> {
    let token = CancellationToken::new();
    let mut results = DatedResults::new();

    for date in range.dates()? {
        let key = BucketKey {
            date,
            office_code: office_code.to_string(),
        };
        if let BucketOutcome::Calculated(bucket) = process_bucket(key, indicators, source, &token)
        {
            results.insert(date, bucket.indicators);
        }
    }

    info!(
        "Calculated {} indicators for office {} on {} dates",
        indicators.len(),
        office_code,
        results.len()
    );

    Ok(results)
}

/// Calculates every `(date, office)` bucket found in an already-materialized
/// set of balances.
pub fn calculate_snapshot(
    balances: &[BalanceRecord],
    indicators: &[IndicatorDefinition],
    granularity: Granularity,
) -> DatedResults {
    let mut results = DatedResults::new();

    for (key, bucket) in bucket_by_date_and_office(balances, granularity) {
        let calculated = calculate_bucket(&key, &bucket, indicators);
        results
            .entry(key.date)
            .or_default()
            .extend(calculated.indicators);
    }

    results
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub offices: Vec<String>,
    pub range: DateRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    NoData,
    Partial,
    Cancelled,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBucket {
    pub key: BucketKey,
    pub reason: String,
}

/// Outcome of a batch run. Always well-formed: problems are reported through
/// `status` and `message`, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: ReportStatus,
    pub message: String,
    pub results: DatedResults,
    pub skipped: Vec<BucketKey>,
    pub failed: Vec<FailedBucket>,
    pub indicator_failures: Vec<IndicatorFailure>,
    pub cancelled_buckets: usize,
}

impl BatchReport {
    pub(crate) fn invalid(message: String) -> Self {
        Self {
            status: ReportStatus::Invalid,
            message,
            results: DatedResults::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            indicator_failures: Vec::new(),
            cancelled_buckets: 0,
        }
    }

    fn from_outcomes(outcomes: Vec<BucketOutcome>) -> Self {
        let total = outcomes.len();
        let mut report = Self::invalid(String::new());
        let mut calculated = 0;

        for outcome in outcomes {
            match outcome {
                BucketOutcome::Calculated(bucket) => {
                    calculated += 1;
                    report.indicator_failures.extend(bucket.failures);
                    report
                        .results
                        .entry(bucket.key.date)
                        .or_default()
                        .extend(bucket.indicators);
                }
                BucketOutcome::NoData(key) => report.skipped.push(key),
                BucketOutcome::Failed(key, reason) => {
                    report.failed.push(FailedBucket { key, reason })
                }
                BucketOutcome::Cancelled => report.cancelled_buckets += 1,
            }
        }

        report.status = if report.cancelled_buckets > 0 {
            ReportStatus::Cancelled
        } else if calculated == 0 && report.failed.is_empty() {
            ReportStatus::NoData
        } else if !report.failed.is_empty() || !report.indicator_failures.is_empty() {
            ReportStatus::Partial
        } else {
            ReportStatus::Ok
        };

        report.message = match report.status {
            ReportStatus::Ok => format!("Calculated {} of {} buckets", calculated, total),
            ReportStatus::NoData => "No balance data for the requested offices and dates".to_string(),
            ReportStatus::Partial => format!(
                "Calculated {} of {} buckets; {} bucket(s) failed, {} indicator evaluation(s) substituted",
                calculated,
                total,
                report.failed.len(),
                report.indicator_failures.len()
            ),
            ReportStatus::Cancelled => format!(
                "Cancelled after {} of {} buckets; {} not started",
                total - report.cancelled_buckets,
                total,
                report.cancelled_buckets
            ),
            ReportStatus::Invalid => String::new(),
        };

        report
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn store_into(&self, sink: &mut dyn ResultSink) -> Result<()> {
        sink.store(&self.results)
    }
}

/// Runs `(date, office)` buckets across a worker pool.
pub struct BatchRunner {
    pool: ThreadPool,
    workers: usize,
}

impl BatchRunner {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::builder()
            .pool_size(config.workers)
            .name_prefix("kpi-batch-")
            .create()?;
        Ok(Self {
            pool,
            workers: config.workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Buckets are independent and may finish in any order; results are
    /// merged by date. Once `token` is cancelled, buckets not yet started
    /// are skipped and the report keeps whatever already completed.
    pub fn run(
        &self,
        request: &BatchRequest,
        indicators: Arc<Vec<IndicatorDefinition>>,
        source: Arc<dyn BalanceSource>,
        token: &CancellationToken,
    ) -> BatchReport {
        let dates = match request.range.dates() {
            Ok(dates) => dates,
            Err(e) => {
                warn!("Rejected batch request: {}", e);
                return BatchReport::invalid(e.to_string());
            }
        };

        let keys: Vec<BucketKey> = dates
            .iter()
            .flat_map(|date| {
                request.offices.iter().map(move |office| BucketKey {
                    date: *date,
                    office_code: office.clone(),
                })
            })
            .collect();

        info!(
            "Running {} buckets ({} offices x {} dates) on {} workers",
            keys.len(),
            request.offices.len(),
            dates.len(),
            self.workers
        );

        let mut pending: Vec<RemoteHandle<BucketOutcome>> = Vec::with_capacity(keys.len());
        let mut outcomes = Vec::with_capacity(keys.len());

        for key in keys {
            let indicators = Arc::clone(&indicators);
            let source = Arc::clone(&source);
            let token = token.clone();
            let job = async move { process_bucket(key, &indicators, source.as_ref(), &token) };

            match self.pool.spawn_with_handle(job) {
                Ok(handle) => pending.push(handle),
                Err(e) => {
                    error!("Worker pool rejected a bucket: {}", e);
                    outcomes.push(BucketOutcome::Cancelled);
                }
            }
        }

        outcomes.extend(block_on(join_all(pending)));

        let report = BatchReport::from_outcomes(outcomes);
        info!("Batch finished: {}", report.message);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndicatorError;
    use crate::schema::{AccountCode, Component, FormulaPart};
    use crate::source::InMemoryBalanceSource;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn indicators() -> Vec<IndicatorDefinition> {
        vec![
            IndicatorDefinition::new(
                "liq",
                "Liquidity",
                FormulaPart::accounts(["1101"]),
                FormulaPart::accounts(["2101"]),
            ),
            IndicatorDefinition::new(
                "broken",
                "Broken",
                FormulaPart::Components(vec![Component::new(
                    vec![AccountCode::from("1101")],
                    f64::NAN,
                )]),
                FormulaPart::accounts(["2101"]),
            ),
        ]
    }

    fn source() -> InMemoryBalanceSource {
        let mut records = Vec::new();
        for (date, office) in [
            (ymd(2024, 1, 31), "01"),
            (ymd(2024, 3, 31), "01"),
            (ymd(2024, 1, 31), "02"),
        ] {
            records.push(BalanceRecord::new(date, office, "1101", 50.0));
            records.push(BalanceRecord::new(date, office, "2101", 200.0));
        }
        InMemoryBalanceSource::new(records, Granularity::Month)
    }

    struct FailingSource;

    impl BalanceSource for FailingSource {
        fn fetch_balances(&self, _: &str, _: &[NaiveDate]) -> Result<Vec<BalanceRecord>> {
            Err(IndicatorError::BalanceSource("connection refused".to_string()))
        }
    }

    #[test]
    fn test_sequential_batch_skips_dates_without_data() {
        let range = DateRange::new(ymd(2024, 1, 1), ymd(2024, 3, 31), Granularity::Month);
        let results = run_batch("01", &range, &indicators(), &source()).unwrap();

        assert_eq!(results.len(), 2);
        assert!(!results.contains_key(&ymd(2024, 2, 29)));

        let jan = &results[&ymd(2024, 1, 31)];
        assert_eq!(jan.len(), 2);
        assert_eq!(jan[0].value, 0.25);
        assert_eq!(jan[1].indicator_id, "broken");
        assert_eq!(jan[1].value, 0.0);
        assert_eq!(jan[1].components.denominator_total, 1.0);
    }

    #[test]
    fn test_snapshot_buckets_by_office() {
        let balances = vec![
            BalanceRecord::new(ymd(2024, 1, 31), "01", "1101", 10.0),
            BalanceRecord::new(ymd(2024, 1, 31), "01", "2101", 100.0),
            BalanceRecord::new(ymd(2024, 1, 31), "02", "1101", 30.0),
            BalanceRecord::new(ymd(2024, 1, 31), "02", "2101", 60.0),
        ];
        let results = calculate_snapshot(&balances, &indicators()[..1], Granularity::Month);

        let jan = &results[&ymd(2024, 1, 31)];
        assert_eq!(jan.len(), 2);
        assert_eq!(jan[0].office_code, "01");
        assert_eq!(jan[0].value, 0.1);
        assert_eq!(jan[1].office_code, "02");
        assert_eq!(jan[1].value, 0.5);
    }

    #[test]
    fn test_monthly_snapshot_does_not_sum_two_dates() {
        let mut balances = Vec::new();
        for date in [ymd(2024, 1, 15), ymd(2024, 1, 31)] {
            balances.push(BalanceRecord::new(date, "01", "1101", 100.0));
            balances.push(BalanceRecord::new(date, "01", "2101", 1000.0));
        }
        let results = calculate_snapshot(&balances, &indicators()[..1], Granularity::Month);

        assert_eq!(results.len(), 2);
        for calculated in results.values() {
            assert_eq!(calculated[0].components.numerator_total, 100.0);
            assert_eq!(calculated[0].components.denominator_total, 1000.0);
        }
    }

    #[test]
    fn test_batch_bucket_uses_a_single_snapshot() {
        let mut records = Vec::new();
        for date in [ymd(2024, 1, 15), ymd(2024, 1, 31)] {
            records.push(BalanceRecord::new(date, "01", "1101", 100.0));
            records.push(BalanceRecord::new(date, "01", "2101", 1000.0));
        }
        let source = InMemoryBalanceSource::new(records, Granularity::Month);
        let range = DateRange::new(ymd(2024, 1, 1), ymd(2024, 1, 31), Granularity::Month);
        let results = run_batch("01", &range, &indicators()[..1], &source).unwrap();

        let jan = &results[&ymd(2024, 1, 31)];
        assert_eq!(jan[0].components.numerator_total, 100.0);
        assert_eq!(jan[0].components.denominator_total, 1000.0);
        assert_eq!(jan[0].value, 0.1);
    }

    #[test]
    fn test_parallel_batch_covers_all_offices() {
        let config = EngineConfig {
            workers: 2,
            ..EngineConfig::default()
        };
        let runner = BatchRunner::new(&config).unwrap();
        let request = BatchRequest {
            offices: vec!["01".to_string(), "02".to_string()],
            range: DateRange::new(ymd(2024, 1, 1), ymd(2024, 3, 31), Granularity::Month),
        };

        let report = runner.run(
            &request,
            Arc::new(indicators()),
            Arc::new(source()),
            &CancellationToken::new(),
        );

        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.results[&ymd(2024, 1, 31)].len(), 4);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.indicator_failures.len(), 3);
    }

    #[test]
    fn test_cancelled_before_start() {
        let runner = BatchRunner::new(&EngineConfig::default()).unwrap();
        let request = BatchRequest {
            offices: vec!["01".to_string()],
            range: DateRange::new(ymd(2024, 1, 1), ymd(2024, 3, 31), Granularity::Month),
        };
        let token = CancellationToken::new();
        token.cancel();

        let report = runner.run(&request, Arc::new(indicators()), Arc::new(source()), &token);
        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.cancelled_buckets, 3);
        assert!(report.is_empty());
    }

    #[test]
    fn test_fetch_failures_do_not_abort() {
        let runner = BatchRunner::new(&EngineConfig::default()).unwrap();
        let request = BatchRequest {
            offices: vec!["01".to_string()],
            range: DateRange::new(ymd(2024, 1, 1), ymd(2024, 2, 29), Granularity::Month),
        };
        let report = runner.run(
            &request,
            Arc::new(indicators()),
            Arc::new(FailingSource),
            &CancellationToken::new(),
        );
        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.failed.len(), 2);
        assert!(report.is_empty());
    }

    #[test]
    fn test_invalid_range_reports_instead_of_failing() {
        let runner = BatchRunner::new(&EngineConfig::default()).unwrap();
        let request = BatchRequest {
            offices: vec!["01".to_string()],
            range: DateRange::new(ymd(2024, 3, 1), ymd(2024, 1, 1), Granularity::Day),
        };
        let report = runner.run(
            &request,
            Arc::new(indicators()),
            Arc::new(source()),
            &CancellationToken::new(),
        );
        assert_eq!(report.status, ReportStatus::Invalid);
        assert!(!report.message.is_empty());
    }
}
