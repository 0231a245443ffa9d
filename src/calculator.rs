use crate::error::{IndicatorError, Result};
use crate::evaluator::{evaluate_part, PartEvaluation};
use crate::schema::{
    BalanceRecord, CalculationComponents, CalculationDetail, CalculationResult,
    IndicatorDefinition,
};
use log::{debug, trace};

pub struct IndicatorCalculator<'a> {
    indicator: &'a IndicatorDefinition,
}

impl<'a> IndicatorCalculator<'a> {
    pub fn new(indicator: &'a IndicatorDefinition) -> Self {
        Self { indicator }
    }

    /// Ratio of numerator to denominator over one bucket of balances.
    ///
    /// A zero denominator yields a value of 0 with both totals and details
    /// still reported. Evaluation errors are logged and returned wrapped with
    /// the indicator name.
    pub fn calculate(&self, balances: &[BalanceRecord]) -> Result<CalculationResult> {
        self.evaluate(balances).map_err(|e| {
            debug!("Error calculating indicator '{}': {}", self.indicator.name, e);
            IndicatorError::for_indicator(&self.indicator.name, e)
        })
    }

    fn evaluate(&self, balances: &[BalanceRecord]) -> Result<CalculationResult> {
        let numerator = evaluate_part(
            balances,
            &self.indicator.numerator,
            self.indicator.numerator_absolute,
        )?;
        let denominator = evaluate_part(
            balances,
            &self.indicator.denominator,
            self.indicator.denominator_absolute,
        )?;

        let value = if denominator.total == 0.0 {
            trace!(
                "Denominator of '{}' is zero; reporting 0",
                self.indicator.name
            );
            0.0
        } else {
            numerator.total / denominator.total
        };

        Ok(build_result(value, numerator, denominator))
    }
}

fn build_result(
    value: f64,
    numerator: PartEvaluation,
    denominator: PartEvaluation,
) -> CalculationResult {
    CalculationResult {
        value,
        components: CalculationComponents {
            numerator_total: numerator.total,
            denominator_total: denominator.total,
            detail: CalculationDetail {
                numerator: numerator.detail,
                denominator: denominator.detail,
            },
        },
    }
}

pub fn calculate_indicator(
    indicator: &IndicatorDefinition,
    balances: &[BalanceRecord],
) -> Result<CalculationResult> {
    IndicatorCalculator::new(indicator).calculate(balances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccountCode, Component, FormulaPart};
    use chrono::NaiveDate;

    fn component_part(code: &str) -> FormulaPart {
        FormulaPart::Components(vec![Component::new(vec![AccountCode::from(code)], 1.0)])
    }

    fn indicator() -> IndicatorDefinition {
        IndicatorDefinition::new("liq", "Liquidity", component_part("1101"), component_part("2101"))
    }

    fn balances(numerator: f64, denominator: f64) -> Vec<BalanceRecord> {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        vec![
            BalanceRecord::new(date, "01", "1101", numerator),
            BalanceRecord::new(date, "01", "2101", denominator),
        ]
    }

    #[test]
    fn test_ratio() {
        let result = calculate_indicator(&indicator(), &balances(500.0, 1000.0)).unwrap();
        assert_eq!(result.value, 0.5);
        assert_eq!(result.components.numerator_total, 500.0);
        assert_eq!(result.components.denominator_total, 1000.0);
        assert_eq!(
            result.components.detail.numerator.get(&AccountCode::from("1101")),
            Some(&500.0)
        );
    }

    #[test]
    fn test_zero_denominator_is_safe_zero() {
        let result = calculate_indicator(&indicator(), &balances(500.0, 0.0)).unwrap();
        assert_eq!(result.value, 0.0);
        assert_eq!(result.components.numerator_total, 500.0);
        assert_eq!(result.components.denominator_total, 0.0);
        assert_eq!(result.components.detail.denominator.len(), 1);
    }

    #[test]
    fn test_absolute_flags() {
        let mut def = indicator();
        def.numerator_absolute = true;
        def.denominator_absolute = true;
        let result = calculate_indicator(&def, &balances(-250.0, -1000.0)).unwrap();
        assert_eq!(result.value, 0.25);
    }

    #[test]
    fn test_failure_is_wrapped_with_indicator_name() {
        let mut def = indicator();
        def.numerator = FormulaPart::Components(vec![Component::new(
            vec![AccountCode::from("1101")],
            f64::INFINITY,
        )]);
        let err = calculate_indicator(&def, &balances(1.0, 1.0)).unwrap_err();
        match err {
            IndicatorError::IndicatorCalculationFailure { indicator, .. } => {
                assert_eq!(indicator, "Liquidity")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
