//! Deterministic planning of multi-currency consumption.

use super::currency::{Amount, CurrencyKind};
use crate::error::LedgerError;

/// Which balances may pay for a request, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionPolicy {
    /// Only the given kind; no cross-currency fallback.
    Single(CurrencyKind),
    /// Every kind, following [`CurrencyKind::PRIORITY`].
    Priority,
}

impl ConsumptionPolicy {
    pub fn for_kind(kind: Option<CurrencyKind>) -> Self {
        kind.map_or(Self::Priority, Self::Single)
    }

    /// The kind charged first.
    pub fn primary(&self) -> CurrencyKind {
        match self {
            Self::Single(kind) => *kind,
            Self::Priority => CurrencyKind::Paid,
        }
    }

    pub fn order(&self) -> &[CurrencyKind] {
        match self {
            Self::Single(kind) => std::slice::from_ref(kind),
            Self::Priority => &CurrencyKind::PRIORITY,
        }
    }
}

/// Current amounts of both currency kinds for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Available {
    pub paid: i64,
    pub free: i64,
}

impl Available {
    pub fn get(&self, kind: CurrencyKind) -> i64 {
        match kind {
            CurrencyKind::Paid => self.paid,
            CurrencyKind::Free => self.free,
        }
    }

    pub fn set(&mut self, kind: CurrencyKind, amount: i64) {
        match kind {
            CurrencyKind::Paid => self.paid = amount,
            CurrencyKind::Free => self.free = amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionLeg {
    pub kind: CurrencyKind,
    pub amount: Amount,
}

/// Ordered deductions whose amounts sum to the requested total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionPlan {
    legs: Vec<ConsumptionLeg>,
}

impl ConsumptionPlan {
    pub fn legs(&self) -> &[ConsumptionLeg] {
        &self.legs
    }

    pub fn total(&self) -> i64 {
        self.legs.iter().map(|leg| leg.amount.value()).sum()
    }
}

/// Splits `target` across the kinds allowed by `policy`.
///
/// Each kind is drained fully before the next one is touched, and no leg
/// exceeds the kind's available amount. Either the whole target is covered
/// or `InsufficientBalance` is returned with no legs at all.
pub fn plan(
    target: Amount,
    policy: ConsumptionPolicy,
    available: Available,
) -> Result<ConsumptionPlan, LedgerError> {
    let order = policy.order();
    let total_available: i64 = order
        .iter()
        .map(|kind| available.get(*kind).max(0))
        .fold(0i64, |acc, amount| acc.saturating_add(amount));

    if total_available < target.value() {
        return Err(LedgerError::InsufficientBalance {
            requested: target.value(),
            available: total_available,
        });
    }

    let mut remaining = target.value();
    let mut legs = Vec::with_capacity(order.len());
    for kind in order {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(available.get(*kind).max(0));
        // Kinds with nothing available contribute no leg.
        if let Ok(amount) = Amount::new(take) {
            legs.push(ConsumptionLeg {
                kind: *kind,
                amount,
            });
            remaining -= take;
        }
    }

    Ok(ConsumptionPlan { legs })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(value: i64) -> Amount {
        Amount::new(value).unwrap()
    }

    fn legs(plan: &ConsumptionPlan) -> Vec<(CurrencyKind, i64)> {
        plan.legs()
            .iter()
            .map(|leg| (leg.kind, leg.amount.value()))
            .collect()
    }

    #[test]
    fn test_priority_drains_paid_before_free() {
        let available = Available {
            paid: 500,
            free: 300,
        };
        let plan = plan(amount(700), ConsumptionPolicy::Priority, available).unwrap();
        assert_eq!(
            legs(&plan),
            vec![(CurrencyKind::Paid, 500), (CurrencyKind::Free, 200)]
        );
        assert_eq!(plan.total(), 700);
    }

    #[test]
    fn test_priority_single_leg_when_paid_suffices() {
        let available = Available {
            paid: 500,
            free: 300,
        };
        let plan = plan(amount(120), ConsumptionPolicy::Priority, available).unwrap();
        assert_eq!(legs(&plan), vec![(CurrencyKind::Paid, 120)]);
    }

    #[test]
    fn test_priority_skips_empty_kind() {
        let available = Available { paid: 0, free: 300 };
        let plan = plan(amount(300), ConsumptionPolicy::Priority, available).unwrap();
        assert_eq!(legs(&plan), vec![(CurrencyKind::Free, 300)]);
    }

    #[test]
    fn test_priority_insufficient_produces_no_plan() {
        let available = Available {
            paid: 500,
            free: 300,
        };
        let result = plan(amount(900), ConsumptionPolicy::Priority, available);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance {
                requested: 900,
                available: 800
            })
        ));
    }

    #[test]
    fn test_single_kind_ignores_other_kind() {
        let available = Available {
            paid: 500,
            free: 300,
        };
        let plan = plan(
            amount(300),
            ConsumptionPolicy::Single(CurrencyKind::Free),
            available,
        )
        .unwrap();
        assert_eq!(legs(&plan), vec![(CurrencyKind::Free, 300)]);

        let result = plan_single_free(400, available);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance {
                requested: 400,
                available: 300
            })
        ));
    }

    fn plan_single_free(target: i64, available: Available) -> Result<ConsumptionPlan, LedgerError> {
        plan(
            amount(target),
            ConsumptionPolicy::Single(CurrencyKind::Free),
            available,
        )
    }

    #[test]
    fn test_exact_total_consumes_everything() {
        let available = Available {
            paid: 500,
            free: 300,
        };
        let plan = plan(amount(800), ConsumptionPolicy::Priority, available).unwrap();
        assert_eq!(
            legs(&plan),
            vec![(CurrencyKind::Paid, 500), (CurrencyKind::Free, 300)]
        );
    }
}
