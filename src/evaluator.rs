use crate::error::{IndicatorError, Result};
use crate::schema::{AccountCode, BalanceRecord, Component, FormulaPart, PartDetail};
use log::debug;

/// Signed total of one formula part plus the value each account contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartEvaluation {
    pub total: f64,
    pub detail: PartDetail,
}

/// Evaluates one side of a formula against a bucket of balances.
///
/// Accounts match by exact code equality. When `apply_abs` is set every
/// matched balance is made non-negative before it is summed or weighted.
/// The per-account detail keeps the last matched value for a code rather
/// than accumulating repeats; totals always include every match.
pub fn evaluate_part(
    balances: &[BalanceRecord],
    part: &FormulaPart,
    apply_abs: bool,
) -> Result<PartEvaluation> {
    match part {
        FormulaPart::Accounts(accounts) => evaluate_accounts(balances, accounts, apply_abs),
        FormulaPart::Signed { base, suma, resta } => {
            evaluate_signed(balances, base, suma, resta, apply_abs)
        }
        FormulaPart::Components(components) => {
            evaluate_components(balances, components, apply_abs)
        }
        FormulaPart::Unrecognized => {
            debug!(
                "{}",
                IndicatorError::InvalidFormulaShape(
                    "expected accounts, base/suma/resta or components; evaluating as zero"
                        .to_string()
                )
            );
            Ok(PartEvaluation::default())
        }
    }
}

fn matched_value(record: &BalanceRecord, apply_abs: bool) -> Result<f64> {
    if !record.balance.is_finite() {
        return Err(IndicatorError::NonFiniteBalance {
            account: record.account_code.to_string(),
            value: record.balance,
        });
    }
    Ok(if apply_abs {
        record.balance.abs()
    } else {
        record.balance
    })
}

fn matching<'a>(
    balances: &'a [BalanceRecord],
    accounts: &'a [AccountCode],
) -> impl Iterator<Item = &'a BalanceRecord> + 'a {
    balances
        .iter()
        .filter(move |b| accounts.contains(&b.account_code))
}

fn evaluate_accounts(
    balances: &[BalanceRecord],
    accounts: &[AccountCode],
    apply_abs: bool,
) -> Result<PartEvaluation> {
    let mut evaluation = PartEvaluation::default();

    for record in matching(balances, accounts) {
        let value = matched_value(record, apply_abs)?;
        evaluation.total += value;
        evaluation.detail.insert(record.account_code.clone(), value);
    }

    Ok(evaluation)
}

fn evaluate_signed(
    balances: &[BalanceRecord],
    base: &[AccountCode],
    suma: &[AccountCode],
    resta: &[AccountCode],
    apply_abs: bool,
) -> Result<PartEvaluation> {
    let mut evaluation = PartEvaluation::default();

    for (segment, sign) in [(base, 1.0), (suma, 1.0), (resta, -1.0)] {
        for record in matching(balances, segment) {
            let value = sign * matched_value(record, apply_abs)?;
            evaluation.total += value;
            evaluation.detail.insert(record.account_code.clone(), value);
        }
    }

    Ok(evaluation)
}

fn evaluate_components(
    balances: &[BalanceRecord],
    components: &[Component],
    apply_abs: bool,
) -> Result<PartEvaluation> {
    let mut evaluation = PartEvaluation::default();

    for component in components {
        if !component.coefficient.is_finite() {
            return Err(IndicatorError::NonFiniteCoefficient {
                coefficient: component.coefficient,
            });
        }

        let mut component_sum = 0.0;
        for record in matching(balances, &component.accounts) {
            let value = matched_value(record, apply_abs)?;
            component_sum += value;
            evaluation
                .detail
                .insert(record.account_code.clone(), value * component.coefficient);
        }
        evaluation.total += component_sum * component.coefficient;
    }

    Ok(evaluation)
}
