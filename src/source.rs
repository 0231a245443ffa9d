use crate::bucketer::date_key;
use crate::dates::Granularity;
use crate::error::Result;
use crate::schema::{BalanceRecord, DatedResults, IndicatorCatalog, IndicatorDefinition};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::io::Write;

/// Supplies balances for an office on a set of dates.
///
/// Implementations must return an empty list when nothing exists and must
/// tolerate concurrent reads; retries for network or database backends live
/// here, not in the calculation code.
pub trait BalanceSource: Send + Sync {
    fn fetch_balances(&self, office_code: &str, dates: &[NaiveDate]) -> Result<Vec<BalanceRecord>>;
}

pub trait IndicatorSource {
    fn list_indicators(&self) -> Result<Vec<IndicatorDefinition>>;

    fn get_indicator(&self, id: &str) -> Result<Option<IndicatorDefinition>> {
        Ok(self.list_indicators()?.into_iter().find(|i| i.id == id))
    }
}

pub trait ResultSink {
    fn store(&mut self, results: &DatedResults) -> Result<()>;
}

/// Balance source backed by an already-materialized snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBalanceSource {
    records: Vec<BalanceRecord>,
    granularity: Granularity,
}

impl InMemoryBalanceSource {
    pub fn new(records: Vec<BalanceRecord>, granularity: Granularity) -> Self {
        Self {
            records,
            granularity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl BalanceSource for InMemoryBalanceSource {
    /// Daily sources match dates exactly. Monthly sources answer each
    /// requested date with the latest snapshot stored in that month, so one
    /// request never mixes balances from two snapshot dates.
    fn fetch_balances(&self, office_code: &str, dates: &[NaiveDate]) -> Result<Vec<BalanceRecord>> {
        let office: Vec<&BalanceRecord> = self
            .records
            .iter()
            .filter(|r| r.office_code == office_code)
            .collect();

        let snapshot_dates: BTreeSet<NaiveDate> = dates
            .iter()
            .filter_map(|requested| {
                let period = date_key(*requested, self.granularity);
                office
                    .iter()
                    .filter(|r| date_key(r.date, self.granularity) == period)
                    .map(|r| r.date)
                    .max()
            })
            .collect();

        Ok(office
            .into_iter()
            .filter(|r| snapshot_dates.contains(&r.date))
            .cloned()
            .collect())
    }
}

impl IndicatorSource for IndicatorCatalog {
    fn list_indicators(&self) -> Result<Vec<IndicatorDefinition>> {
        Ok(self.indicators.clone())
    }

    fn get_indicator(&self, id: &str) -> Result<Option<IndicatorDefinition>> {
        Ok(self.indicators.iter().find(|i| i.id == id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<DatedResults>,
}

impl ResultSink for MemorySink {
    fn store(&mut self, results: &DatedResults) -> Result<()> {
        self.batches.push(results.clone());
        Ok(())
    }
}

/// Writes each stored batch as one JSON document per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn store(&mut self, results: &DatedResults) -> Result<()> {
        serde_json::to_writer(&mut self.writer, results)?;
        writeln!(self.writer)?;
        Ok(())
    }
}
