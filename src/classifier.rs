use crate::aggregator::scale_value;
use crate::config::EngineConfig;
use crate::schema::{DatedResults, IndicatorDefinition, ThresholdBand, MAX_DECIMALS};
use serde::{Deserialize, Serialize};

/// Band a value falls into: the first band with `min <= value <= max`, or
/// failing that the band whose midpoint is closest to the value. `None` only
/// when there are no bands.
pub fn resolve_band(value: f64, bands: &[ThresholdBand]) -> Option<&ThresholdBand> {
    if let Some(band) = bands.iter().find(|b| b.contains(value)) {
        return Some(band);
    }

    bands.iter().min_by(|a, b| {
        let da = (a.midpoint() - value).abs();
        let db = (b.midpoint() - value).abs();
        da.total_cmp(&db)
    })
}

pub fn classify(value: f64, bands: &[ThresholdBand], default_color: &str) -> String {
    resolve_band(value, bands)
        .map(|b| b.color.clone())
        .unwrap_or_else(|| default_color.to_string())
}

/// Mean of all band midpoints; the "typical" value of an indicator that has
/// not been calculated yet.
pub fn representative_value(bands: &[ThresholdBand]) -> Option<f64> {
    if bands.is_empty() {
        return None;
    }
    let sum: f64 = bands.iter().map(ThresholdBand::midpoint).sum();
    Some(sum / bands.len() as f64)
}

/// Classifies `value` when present, otherwise the bands' representative value.
pub fn classify_or_representative(
    value: Option<f64>,
    bands: &[ThresholdBand],
    default_color: &str,
) -> String {
    match value.or_else(|| representative_value(bands)) {
        Some(v) => classify(v, bands, default_color),
        None => default_color.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiClassification {
    pub indicator_id: String,
    pub name: String,
    pub value: Option<f64>,
    pub color: String,
    pub label: String,
    pub meets_meta: Option<bool>,
    pub display: String,
}

pub fn classify_indicator(
    indicator: &IndicatorDefinition,
    value: Option<f64>,
    default_color: &str,
) -> KpiClassification {
    let bands = &indicator.thresholds.bands;
    let reference = value.or_else(|| representative_value(bands));
    let band = reference.and_then(|v| resolve_band(v, bands));

    let meets_meta = value.map(|v| {
        if indicator.higher_is_better {
            v >= indicator.meta
        } else {
            v <= indicator.meta
        }
    });

    KpiClassification {
        indicator_id: indicator.id.clone(),
        name: indicator.name.clone(),
        value,
        color: band
            .map(|b| b.color.clone())
            .unwrap_or_else(|| default_color.to_string()),
        label: band.map(|b| b.label.clone()).unwrap_or_default(),
        meets_meta,
        display: value
            .map(|v| {
                let decimals = indicator.thresholds.decimals.min(MAX_DECIMALS) as usize;
                format!("{:.*}", decimals, v)
            })
            .unwrap_or_default(),
    }
}

/// Grades each indicator by its most recent calculated value, optionally
/// restricted to one office. Values are scaled per `config.value_scale`.
pub fn latest_kpis(
    results: &DatedResults,
    indicators: &[IndicatorDefinition],
    office_code: Option<&str>,
    config: &EngineConfig,
) -> Vec<KpiClassification> {
    indicators
        .iter()
        .map(|indicator| {
            let latest = results.values().rev().find_map(|calculated| {
                calculated.iter().find(|c| {
                    c.indicator_id == indicator.id
                        && office_code.map_or(true, |office| c.office_code == office)
                })
            });
            let value = latest.map(|c| scale_value(c.value, config.value_scale));
            classify_indicator(indicator, value, &config.default_color)
        })
        .collect()
}
