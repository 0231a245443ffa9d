use crate::dates::{last_day_of_month, month_key, Granularity};
use crate::schema::BalanceRecord;
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifies one independent unit of calculation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub date: NaiveDate,
    pub office_code: String,
}

/// Calendar period a date falls under. Used to match requested dates against
/// stored snapshots; monthly runs compare by month end.
pub fn date_key(date: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Day => date,
        Granularity::Month => last_day_of_month(date),
    }
}

/// Groups balances by their own date. Monthly data is expected to hold one
/// snapshot per month already, so month granularity only flags months that
/// carry more than one snapshot date.
pub fn bucket_by_date(
    balances: &[BalanceRecord],
    granularity: Granularity,
) -> BTreeMap<NaiveDate, Vec<BalanceRecord>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<BalanceRecord>> = BTreeMap::new();

    for record in balances {
        buckets.entry(record.date).or_default().push(record.clone());
    }

    if granularity == Granularity::Month {
        warn_split_months(buckets.keys().map(|date| (*date, "")));
    }

    buckets
}

/// Splits balances into `(date, office)` buckets. Every record inside a
/// bucket has exactly the bucket's date and office code.
pub fn bucket_by_date_and_office(
    balances: &[BalanceRecord],
    granularity: Granularity,
) -> BTreeMap<BucketKey, Vec<BalanceRecord>> {
    let mut buckets: BTreeMap<BucketKey, Vec<BalanceRecord>> = BTreeMap::new();

    for record in balances {
        let key = BucketKey {
            date: record.date,
            office_code: record.office_code.clone(),
        };
        buckets.entry(key).or_default().push(record.clone());
    }

    if granularity == Granularity::Month {
        warn_split_months(
            buckets
                .keys()
                .map(|key| (key.date, key.office_code.as_str())),
        );
    }

    buckets
}

fn warn_split_months<'a>(keys: impl Iterator<Item = (NaiveDate, &'a str)>) {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for (date, office) in keys {
        let month = (month_key(date), office);
        if !seen.insert(month.clone()) && reported.insert(month.clone()) {
            warn!(
                "Month {} has more than one snapshot date{}{}; each date is calculated separately",
                month.0,
                if office.is_empty() { "" } else { " for office " },
                office
            );
        }
    }
}

/// Narrows a fetched set of balances to a single snapshot: the latest date
/// present for `office_code`. Records for other offices or earlier dates are
/// dropped so they are never summed together.
pub fn latest_snapshot(balances: Vec<BalanceRecord>, office_code: &str) -> Vec<BalanceRecord> {
    let latest = balances
        .iter()
        .filter(|r| r.office_code == office_code)
        .map(|r| r.date)
        .max();
    let Some(latest) = latest else {
        return Vec::new();
    };

    let total = balances.len();
    let snapshot: Vec<BalanceRecord> = balances
        .into_iter()
        .filter(|r| r.office_code == office_code && r.date == latest)
        .collect();
    if snapshot.len() < total {
        warn!(
            "Dropped {} balances outside the {} snapshot of office {}",
            total - snapshot.len(),
            latest,
            office_code
        );
    }
    snapshot
}
