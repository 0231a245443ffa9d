use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{IndicatorError, Result};
use crate::ingestion::RawBalanceRecord;

/// Canonical account identifier. Sources deliver codes either as strings
/// ("1101") or as numbers (1101); both normalize to the trimmed string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawAccountCode", into = "String")]
pub struct AccountCode(String);

impl JsonSchema for AccountCode {
    fn schema_name() -> String {
        "AccountCode".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAccountCode {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl From<RawAccountCode> for AccountCode {
    fn from(raw: RawAccountCode) -> Self {
        match raw {
            RawAccountCode::Text(s) => AccountCode::new(&s),
            RawAccountCode::Integer(n) => AccountCode(n.to_string()),
            RawAccountCode::Float(f) if f.fract() == 0.0 => AccountCode(format!("{:.0}", f)),
            RawAccountCode::Float(f) => AccountCode(f.to_string()),
        }
    }
}

impl AccountCode {
    pub fn new(code: &str) -> Self {
        AccountCode(code.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountCode {
    fn from(code: &str) -> Self {
        AccountCode::new(code)
    }
}

impl From<String> for AccountCode {
    fn from(code: String) -> Self {
        AccountCode::new(&code)
    }
}

impl From<u64> for AccountCode {
    fn from(code: u64) -> Self {
        AccountCode(code.to_string())
    }
}

impl From<AccountCode> for String {
    fn from(code: AccountCode) -> Self {
        code.0
    }
}

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One account balance for one office on one date. The sign convention
/// (debit vs. credit) is resolved before the record is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawBalanceRecord")]
pub struct BalanceRecord {
    pub date: NaiveDate,
    pub office_code: String,
    pub office_name: String,
    pub account_code: AccountCode,
    pub account_name: String,
    pub balance: f64,
}

impl BalanceRecord {
    pub fn new(
        date: NaiveDate,
        office_code: &str,
        account_code: impl Into<AccountCode>,
        balance: f64,
    ) -> Self {
        Self {
            date,
            office_code: office_code.trim().to_string(),
            office_name: String::new(),
            account_code: account_code.into(),
            account_name: String::new(),
            balance,
        }
    }
}

fn default_coefficient() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Component {
    #[schemars(description = "Account codes whose balances are summed for this component")]
    pub accounts: Vec<AccountCode>,

    #[serde(default = "default_coefficient")]
    #[schemars(description = "Weight applied to the component's sum. Defaults to 1.")]
    pub coefficient: f64,
}

impl Component {
    pub fn new(accounts: Vec<AccountCode>, coefficient: f64) -> Self {
        Self {
            accounts,
            coefficient,
        }
    }
}

/// One side of an indicator formula.
///
/// Catalogs store parts as loosely-shaped JSON objects; the shape is resolved
/// once on load with the precedence `accounts`, then `base`/`suma`/`resta`,
/// then `components`. Only the first matching shape is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFormulaPart", into = "RawFormulaPart")]
pub enum FormulaPart {
    /// Legacy flat list, every account weighted 1.
    Accounts(Vec<AccountCode>),
    /// Legacy `base + suma - resta` form.
    Signed {
        base: Vec<AccountCode>,
        suma: Vec<AccountCode>,
        resta: Vec<AccountCode>,
    },
    Components(Vec<Component>),
    /// No recognized shape; evaluates to zero.
    Unrecognized,
}

impl FormulaPart {
    pub fn accounts<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<AccountCode>,
    {
        FormulaPart::Accounts(codes.into_iter().map(Into::into).collect())
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            FormulaPart::Accounts(_) => "accounts",
            FormulaPart::Signed { .. } => "base/suma/resta",
            FormulaPart::Components(_) => "components",
            FormulaPart::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawFormulaPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Legacy flat list of account codes, each with coefficient 1")]
    pub accounts: Option<Vec<AccountCode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Vec<AccountCode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suma: Option<Vec<AccountCode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Accounts subtracted from the total")]
    pub resta: Option<Vec<AccountCode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Weighted groups of accounts")]
    pub components: Option<Vec<Component>>,
}

impl From<RawFormulaPart> for FormulaPart {
    fn from(raw: RawFormulaPart) -> Self {
        if let Some(accounts) = raw.accounts {
            return FormulaPart::Accounts(accounts);
        }

        if raw.base.is_some() || raw.suma.is_some() || raw.resta.is_some() {
            return FormulaPart::Signed {
                base: raw.base.unwrap_or_default(),
                suma: raw.suma.unwrap_or_default(),
                resta: raw.resta.unwrap_or_default(),
            };
        }

        match raw.components {
            Some(components) => FormulaPart::Components(components),
            None => FormulaPart::Unrecognized,
        }
    }
}

impl From<FormulaPart> for RawFormulaPart {
    fn from(part: FormulaPart) -> Self {
        match part {
            FormulaPart::Accounts(accounts) => RawFormulaPart {
                accounts: Some(accounts),
                ..Default::default()
            },
            FormulaPart::Signed { base, suma, resta } => RawFormulaPart {
                base: Some(base),
                suma: Some(suma),
                resta: Some(resta),
                ..Default::default()
            },
            FormulaPart::Components(components) => RawFormulaPart {
                components: Some(components),
                ..Default::default()
            },
            FormulaPart::Unrecognized => RawFormulaPart::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdBand {
    #[schemars(description = "Display color for values inside the band (e.g. 'green', '#4caf50')")]
    pub color: String,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub label: String,
}

impl ThresholdBand {
    pub fn new(color: &str, min: f64, max: f64) -> Self {
        Self {
            color: color.to_string(),
            min,
            max,
            label: String::new(),
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

fn default_decimals() -> u32 {
    2
}

/// Largest `decimals` a catalog may request for display.
pub const MAX_DECIMALS: u32 = 20;

/// Band definitions plus display settings. Only the bands take part in
/// classification; `decimals`, `alert` and `warning` are for presentation.
///
/// Catalogs write this either as a bare list of bands or as the full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawThresholds")]
pub struct ThresholdConfig {
    pub bands: Vec<ThresholdBand>,

    pub decimals: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
}

/// Object form of the thresholds block.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThresholdSettings {
    #[serde(default)]
    #[schemars(description = "Ordered color bands; the first band containing a value wins")]
    pub bands: Vec<ThresholdBand>,

    #[serde(default = "default_decimals")]
    #[schemars(description = "Digits shown after the decimal point, at most 20")]
    pub decimals: u32,

    #[serde(default)]
    pub alert: Option<f64>,

    #[serde(default)]
    pub warning: Option<f64>,
}

/// Either shape accepted for `thresholds`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawThresholds {
    Bands(Vec<ThresholdBand>),
    Settings(ThresholdSettings),
}

impl From<RawThresholds> for ThresholdConfig {
    fn from(raw: RawThresholds) -> Self {
        match raw {
            RawThresholds::Bands(bands) => Self {
                bands,
                ..Self::default()
            },
            RawThresholds::Settings(settings) => Self {
                bands: settings.bands,
                decimals: settings.decimals,
                alert: settings.alert,
                warning: settings.warning,
            },
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            decimals: default_decimals(),
            alert: None,
            warning: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDefinition {
    #[schemars(description = "Stable identifier referenced by calculated results")]
    pub id: String,

    #[schemars(description = "Display name; also the column name in monthly averages")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[schemars(with = "RawFormulaPart")]
    pub numerator: FormulaPart,

    #[schemars(with = "RawFormulaPart")]
    pub denominator: FormulaPart,

    #[serde(default)]
    #[schemars(description = "Take the absolute value of every numerator balance before summing")]
    pub numerator_absolute: bool,

    #[serde(default)]
    #[schemars(description = "Take the absolute value of every denominator balance before summing")]
    pub denominator_absolute: bool,

    #[serde(default)]
    #[schemars(description = "Target value for the indicator")]
    pub meta: f64,

    #[serde(default = "default_true")]
    pub higher_is_better: bool,

    #[serde(default)]
    #[schemars(with = "RawThresholds")]
    pub thresholds: ThresholdConfig,
}

impl IndicatorDefinition {
    pub fn new(id: &str, name: &str, numerator: FormulaPart, denominator: FormulaPart) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            numerator,
            denominator,
            numerator_absolute: false,
            denominator_absolute: false,
            meta: 0.0,
            higher_is_better: true,
            thresholds: ThresholdConfig::default(),
        }
    }
}

pub type PartDetail = BTreeMap<AccountCode, f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalculationDetail {
    pub numerator: PartDetail,
    pub denominator: PartDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculationComponents {
    pub numerator_total: f64,
    pub denominator_total: f64,
    pub detail: CalculationDetail,
}

/// Output of one indicator over one bucket, before it is tagged with a date
/// and office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub value: f64,
    pub components: CalculationComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedIndicator {
    pub date: NaiveDate,
    pub indicator_id: String,
    pub office_code: String,
    pub value: f64,
    pub components: CalculationComponents,
}

impl CalculatedIndicator {
    pub fn from_result(
        date: NaiveDate,
        indicator_id: &str,
        office_code: &str,
        result: CalculationResult,
    ) -> Self {
        Self {
            date,
            indicator_id: indicator_id.to_string(),
            office_code: office_code.to_string(),
            value: result.value,
            components: result.components,
        }
    }

    /// Stand-in for an indicator whose calculation failed: value 0 over a
    /// denominator of 1, with no account detail.
    pub fn placeholder(date: NaiveDate, indicator_id: &str, office_code: &str) -> Self {
        Self {
            date,
            indicator_id: indicator_id.to_string(),
            office_code: office_code.to_string(),
            value: 0.0,
            components: CalculationComponents {
                numerator_total: 0.0,
                denominator_total: 1.0,
                detail: CalculationDetail::default(),
            },
        }
    }
}

/// Results of a batch keyed by calculation date.
pub type DatedResults = BTreeMap<NaiveDate, Vec<CalculatedIndicator>>;

/// One row per month (`YYYY-MM`), one column per indicator name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyAverage {
    pub month: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IndicatorCatalog {
    #[schemars(description = "All indicator definitions available to the engine")]
    pub indicators: Vec<IndicatorDefinition>,
}

impl IndicatorCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: IndicatorCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for indicator in &self.indicators {
            if indicator.id.trim().is_empty() {
                return Err(IndicatorError::ValidationError {
                    field: "id".to_string(),
                    details: format!("Indicator '{}' has an empty id", indicator.name),
                });
            }
            if !seen.insert(indicator.id.as_str()) {
                return Err(IndicatorError::ValidationError {
                    field: "id".to_string(),
                    details: format!("Duplicate indicator id '{}'", indicator.id),
                });
            }
            if indicator.thresholds.decimals > MAX_DECIMALS {
                return Err(IndicatorError::ValidationError {
                    field: format!("{}.thresholds.decimals", indicator.id),
                    details: format!(
                        "{} decimals requested, at most {} allowed",
                        indicator.thresholds.decimals, MAX_DECIMALS
                    ),
                });
            }
            for band in &indicator.thresholds.bands {
                if band.min > band.max {
                    return Err(IndicatorError::ValidationError {
                        field: format!("{}.thresholds", indicator.id),
                        details: format!(
                            "Band '{}' has min {} greater than max {}",
                            band.color, band.min, band.max
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(IndicatorCatalog)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
