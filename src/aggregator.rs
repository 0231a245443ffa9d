use crate::config::ValueScale;
use crate::dates::month_key;
use crate::error::IndicatorError;
use crate::schema::{DatedResults, IndicatorDefinition, MonthlyAverage};
use chrono::NaiveDate;
use log::warn;
use std::collections::{BTreeMap, HashMap, HashSet};

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn scale_value(value: f64, scale: ValueScale) -> f64 {
    match scale {
        ValueScale::Ratio => value,
        ValueScale::Percentage => round2(value * 100.0),
    }
}

/// Applies the display scale to every calculated value. Averages computed
/// from the returned map must not be scaled again.
pub fn scale_results(results: &DatedResults, scale: ValueScale) -> DatedResults {
    results
        .iter()
        .map(|(date, indicators)| {
            let scaled = indicators
                .iter()
                .cloned()
                .map(|mut calc| {
                    calc.value = scale_value(calc.value, scale);
                    calc
                })
                .collect();
            (*date, scaled)
        })
        .collect()
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.sum / self.count as f64)
        }
    }
}

/// One row per month present in `results`, one column per indicator name.
///
/// Values are scaled first, then averaged and rounded to two decimals.
/// Indicators with no values in a month report 0. Results whose indicator id
/// is not among `indicators` are skipped with a warning.
pub fn average_by_month(
    results: &DatedResults,
    indicators: &[IndicatorDefinition],
    scale: ValueScale,
) -> Vec<MonthlyAverage> {
    let names: HashMap<&str, &str> = indicators
        .iter()
        .map(|i| (i.id.as_str(), i.name.as_str()))
        .collect();

    let mut months: BTreeMap<String, HashMap<&str, Accumulator>> = BTreeMap::new();
    let mut unknown: HashSet<&str> = HashSet::new();

    for (date, calculated) in results {
        let month = months.entry(month_key(*date)).or_default();

        for calc in calculated {
            match names.get(calc.indicator_id.as_str()) {
                Some(name) => month
                    .entry(*name)
                    .or_default()
                    .add(scale_value(calc.value, scale)),
                None => {
                    if unknown.insert(calc.indicator_id.as_str()) {
                        warn!(
                            "Skipping monthly average: {}",
                            IndicatorError::UnknownIndicatorReference(calc.indicator_id.clone())
                        );
                    }
                }
            }
        }
    }

    months
        .into_iter()
        .map(|(month, accumulators)| {
            let values = indicators
                .iter()
                .map(|i| {
                    let average = accumulators
                        .get(i.name.as_str())
                        .map(Accumulator::average)
                        .unwrap_or(0.0);
                    (i.name.clone(), average)
                })
                .collect();
            MonthlyAverage { month, values }
        })
        .collect()
}

/// Mean of one indicator's scaled values across every date and office in
/// `results`, or `None` when it has no values.
pub fn average_over_period(
    results: &DatedResults,
    indicator_id: &str,
    scale: ValueScale,
) -> Option<f64> {
    let mut acc = Accumulator::default();
    results
        .values()
        .flatten()
        .filter(|calc| calc.indicator_id == indicator_id)
        .for_each(|calc| acc.add(scale_value(calc.value, scale)));

    (acc.count > 0).then(|| acc.average())
}

/// Keeps monthly rows whose month lies within `[start, end]`.
pub fn filter_by_period(
    rows: &[MonthlyAverage],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<MonthlyAverage> {
    let (from, to) = (month_key(start), month_key(end));
    rows.iter()
        .filter(|row| row.month >= from && row.month <= to)
        .cloned()
        .collect()
}

pub fn filter_results_by_period(
    results: &DatedResults,
    start: NaiveDate,
    end: NaiveDate,
) -> DatedResults {
    if start > end {
        return DatedResults::new();
    }
    results
        .range(start..=end)
        .map(|(date, calc)| (*date, calc.clone()))
        .collect()
}
