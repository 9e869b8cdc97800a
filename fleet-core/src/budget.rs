//! Budget configuration: global and per-creature daily spend caps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What happens when a budget is exceeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetAction {
    /// Reject the request and put the creature to sleep.
    Sleep,
    /// Log a warning but allow the request.
    Warn,
    /// Enforcement disabled entirely.
    Off,
}

/// A daily spend cap and the action to take when it's exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub daily_cap_usd: Decimal,
    pub action: BudgetAction,
}

impl Budget {
    pub fn new(daily_cap_usd: Decimal, action: BudgetAction) -> Self {
        Self {
            daily_cap_usd,
            action,
        }
    }

    /// Whether `spent` exceeds this budget's cap. Always `false` when
    /// enforcement is `off`.
    pub fn is_exceeded(&self, spent: Decimal) -> bool {
        self.action != BudgetAction::Off && spent > self.daily_cap_usd
    }
}

/// Resolves the effective budget for a creature: its own override if set,
/// else the global default.
#[derive(Debug, Clone)]
pub struct BudgetRegistry {
    pub global: Budget,
    pub per_creature: std::collections::HashMap<String, Budget>,
}

impl BudgetRegistry {
    pub fn new(global: Budget) -> Self {
        Self {
            global,
            per_creature: std::collections::HashMap::new(),
        }
    }

    /// The budget that applies to `name`: its override if set, else global.
    pub fn effective(&self, name: &str) -> &Budget {
        self.per_creature.get(name).unwrap_or(&self.global)
    }

    pub fn set_creature_budget(&mut self, name: impl Into<String>, budget: Budget) {
        self.per_creature.insert(name.into(), budget);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_budget_never_exceeded() {
        let b = Budget::new(Decimal::ONE, BudgetAction::Off);
        assert!(!b.is_exceeded(Decimal::new(1000, 0)));
    }

    #[test]
    fn sleep_budget_exceeded_above_cap() {
        let b = Budget::new(Decimal::ONE, BudgetAction::Sleep);
        assert!(b.is_exceeded(Decimal::new(10001, 4))); // 1.0001
        assert!(!b.is_exceeded(Decimal::new(5, 1))); // 0.5
    }

    #[test]
    fn per_creature_override_wins() {
        let mut reg = BudgetRegistry::new(Budget::new(Decimal::ONE, BudgetAction::Sleep));
        reg.set_creature_budget("alpha", Budget::new(Decimal::TEN, BudgetAction::Warn));
        assert_eq!(reg.effective("alpha").action, BudgetAction::Warn);
        assert_eq!(reg.effective("beta").action, BudgetAction::Sleep);
    }
}
