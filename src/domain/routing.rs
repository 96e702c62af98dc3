//! Routing score and guaranteed-pool recommendations

use std::cmp::Ordering;
use std::collections::HashSet;

use rust_decimal::Decimal;

use super::{is_eligible_for_guaranteed, GuaranteedRules, Loan, LoanId, LoanPreferences};

const BASE_SCORE: i64 = 100;
const TERM_CAP: i64 = 20;

/// Score used to rank leads for guaranteed routing.
///
/// 100 plus a credit term, an amount term and (when a DTI ratio is known) a
/// DTI term. Each term is capped at 20 and the DTI term floors at 0.
pub fn routing_score(loan: &Loan) -> Decimal {
    let cap = Decimal::from(TERM_CAP);
    let mut score = Decimal::from(BASE_SCORE);

    let credit = Decimal::from(loan.fico_score - 600) / Decimal::TEN;
    score += credit.min(cap);

    let amount = loan.amount / Decimal::from(50_000);
    score += amount.min(cap);

    if let Some(dti) = loan.debt_to_income_ratio {
        let dti_term = cap - dti / Decimal::TWO;
        score += dti_term.max(Decimal::ZERO);
    }

    score.round_dp(2)
}

/// Descending score, missing scores last, then ascending id.
fn by_routing_priority(a: &Loan, b: &Loan) -> Ordering {
    match (a.routing_score, b.routing_score) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.id.cmp(&b.id))
}

/// Pick at most `limit` unassigned eligible loans that match the preferences.
pub fn recommend<'a, I>(
    loans: I,
    prefs: &LoanPreferences,
    assigned: &HashSet<LoanId>,
    rules: &GuaranteedRules,
    limit: usize,
) -> Vec<Loan>
where
    I: IntoIterator<Item = &'a Loan>,
{
    let mut candidates: Vec<&Loan> = loans
        .into_iter()
        .filter(|l| !assigned.contains(&l.id))
        .filter(|l| is_eligible_for_guaranteed(l, rules))
        .filter(|l| prefs.matches(l))
        .collect();
    candidates.sort_by(|a, b| by_routing_priority(a, b));
    candidates.into_iter().take(limit).cloned().collect()
}
