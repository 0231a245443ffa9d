use crate::dates::parse_balance_date;
use crate::error::{IndicatorError, Result};
use crate::schema::{AccountCode, BalanceRecord};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Balance row as delivered by a relational or document-store export.
/// Dates may be `YYYY-MM-DD`, `DD/MM/YYYY` or a timestamp; account codes may
/// be strings or numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBalanceRecord {
    pub date: String,
    #[serde(alias = "office_code", alias = "oficina")]
    pub office_code: String,
    #[serde(default, alias = "office_name")]
    pub office_name: String,
    #[serde(alias = "account_code", alias = "account", alias = "cuenta")]
    pub account_code: AccountCode,
    #[serde(default, alias = "account_name")]
    pub account_name: String,
    #[serde(alias = "saldo")]
    pub balance: f64,
}

impl TryFrom<RawBalanceRecord> for BalanceRecord {
    type Error = IndicatorError;

    fn try_from(raw: RawBalanceRecord) -> Result<Self> {
        let date = parse_balance_date(&raw.date)?;

        if raw.office_code.trim().is_empty() {
            return Err(IndicatorError::ValidationError {
                field: "officeCode".to_string(),
                details: format!("Empty office code on balance dated {}", raw.date),
            });
        }
        if raw.account_code.as_str().is_empty() {
            return Err(IndicatorError::ValidationError {
                field: "accountCode".to_string(),
                details: format!("Empty account code on balance dated {}", raw.date),
            });
        }
        if !raw.balance.is_finite() {
            return Err(IndicatorError::NonFiniteBalance {
                account: raw.account_code.to_string(),
                value: raw.balance,
            });
        }

        Ok(BalanceRecord {
            date,
            office_code: raw.office_code.trim().to_string(),
            office_name: raw.office_name,
            account_code: raw.account_code,
            account_name: raw.account_name,
            balance: raw.balance,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBalances {
    pub records: Vec<BalanceRecord>,
    pub rejected: Vec<RejectedRow>,
}

/// Converts raw rows into balance records, keeping going past bad rows.
pub fn normalize_balances(rows: Vec<RawBalanceRecord>) -> NormalizedBalances {
    let mut normalized = NormalizedBalances::default();

    for (index, row) in rows.into_iter().enumerate() {
        match BalanceRecord::try_from(row) {
            Ok(record) => normalized.records.push(record),
            Err(e) => {
                warn!("Rejected balance row #{}: {}", index, e);
                normalized.rejected.push(RejectedRow {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!(
        "Normalized {} balance rows ({} rejected)",
        normalized.records.len(),
        normalized.rejected.len()
    );

    normalized
}

pub fn load_balances_json(json: &str) -> Result<NormalizedBalances> {
    let rows: Vec<RawBalanceRecord> = serde_json::from_str(json)?;
    Ok(normalize_balances(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_normalizes_dates_and_codes() {
        let json = r#"[
            {"date": "31/01/2024", "officeCode": "01", "accountCode": 1101, "balance": 500.0},
            {"date": "2024-01-31", "office_code": "01", "account": "2101", "balance": -20.5}
        ]"#;
        let normalized = load_balances_json(json).unwrap();
        assert!(normalized.rejected.is_empty());
        assert_eq!(normalized.records.len(), 2);

        let jan_31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(normalized.records[0].date, jan_31);
        assert_eq!(normalized.records[0].account_code, AccountCode::from("1101"));
        assert_eq!(normalized.records[1].date, jan_31);
        assert_eq!(normalized.records[1].balance, -20.5);
    }

    #[test]
    fn test_bad_rows_are_rejected_not_fatal() {
        let json = r#"[
            {"date": "not a date", "officeCode": "01", "accountCode": "1101", "balance": 1.0},
            {"date": "2024-02-29", "officeCode": " ", "accountCode": "1101", "balance": 1.0},
            {"date": "2024-02-29", "officeCode": "02", "accountCode": "1101", "balance": 1.0}
        ]"#;
        let normalized = load_balances_json(json).unwrap();
        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.rejected.len(), 2);
        assert_eq!(normalized.rejected[0].index, 0);
        assert_eq!(normalized.rejected[1].index, 1);
    }

    #[test]
    fn test_balance_record_deserializes_through_normalization() {
        let json = r#"{"date": "15/03/2024", "officeCode": "07", "accountCode": "3101", "balance": 12.0}"#;
        let record: BalanceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(record.office_code, "07");
    }
}
