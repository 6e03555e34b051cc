//! Shared service-restart budget.
//!
//! The updater and the escalator draw from one counter so neither can burn
//! through restarts the other needs. A restart is reserved up front with
//! [`ServiceRestartBudget::reserve`]; the permit is refunded on drop unless
//! it is committed once the restart actually happens.
//!
//! The counter lives for the lifetime of the process; a process restart
//! starts from a full budget.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

use crate::logging::event_names;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("service restart budget exhausted ({used}/{max})")]
pub struct BudgetExhausted {
    pub used: u32,
    pub max: u32,
}

impl From<BudgetExhausted> for gw_common::Error {
    fn from(err: BudgetExhausted) -> Self {
        gw_common::Error::BudgetExceeded {
            resource: "service restart".to_string(),
            used: err.used,
            max: err.max,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub used: u32,
    pub max: u32,
}

impl BudgetUsage {
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }
}

#[derive(Debug)]
pub struct ServiceRestartBudget {
    used: Mutex<u32>,
    max: u32,
}

impl ServiceRestartBudget {
    pub fn new(max: u32) -> Self {
        Self {
            used: Mutex::new(0),
            max,
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            used: *self.lock(),
            max: self.max,
        }
    }

    /// Reserve one restart for `holder`.
    pub fn reserve(&self, holder: &str) -> Result<RestartPermit<'_>, BudgetExhausted> {
        let mut used = self.lock();
        if *used >= self.max {
            warn!(
                target: event_names::RECOVERY_BUDGET_EXHAUSTED,
                holder,
                used = *used,
                max = self.max,
                "Service restart budget exhausted"
            );
            return Err(BudgetExhausted {
                used: *used,
                max: self.max,
            });
        }
        *used += 1;
        info!(holder, used = *used, max = self.max, "Service restart reserved");
        Ok(RestartPermit {
            budget: self,
            committed: false,
        })
    }

    fn refund(&self) {
        let mut used = self.lock();
        *used = used.saturating_sub(1);
    }

    /// Give the whole budget back on an operator `service` reset.
    pub fn reset(&self) {
        let mut used = self.lock();
        *used = 0;
        info!(target: event_names::RECOVERY_RESET, domain = "service", "Restart budget reset");
    }
}

/// A reserved restart. Dropping it without [`commit`](Self::commit) returns
/// the restart to the budget.
#[derive(Debug)]
pub struct RestartPermit<'a> {
    budget: &'a ServiceRestartBudget,
    committed: bool,
}

impl RestartPermit<'_> {
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RestartPermit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.budget.refund();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_permit_is_refunded() {
        let budget = ServiceRestartBudget::new(1);
        {
            let _permit = budget.reserve("update").unwrap();
            assert_eq!(budget.usage().used, 1);
        }
        assert_eq!(budget.usage().used, 0);
    }

    #[test]
    fn test_committed_permits_exhaust() {
        let budget = ServiceRestartBudget::new(2);
        budget.reserve("network").unwrap().commit();
        budget.reserve("update").unwrap().commit();

        let err = budget.reserve("memory").unwrap_err();
        assert_eq!(err, BudgetExhausted { used: 2, max: 2 });
        assert_eq!(budget.usage().remaining(), 0);

        budget.reset();
        assert!(budget.reserve("memory").is_ok());
    }
}
