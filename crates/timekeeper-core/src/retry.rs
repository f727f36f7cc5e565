// Bounded consecutive-failure counter
// Counts failures until a threshold is crossed; any success resets it

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Still within budget; `attempt` failures so far out of `max`
    Retry { attempt: u32, max: u32 },
    /// Budget exceeded after `attempts` consecutive failures
    Exhausted { attempts: u32 },
}

/// Consecutive failure budget
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_failures: u32,
    failures: u32,
}

impl RetryBudget {
    /// Allow up to `max_failures` consecutive failures; the next one exhausts the budget
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            failures: 0,
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_failures {
            RetryDecision::Exhausted {
                attempts: self.failures,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.failures,
                max: self.max_failures,
            }
        }
    }

    /// Record a successful attempt, resetting the count
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Current consecutive failure count
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seventh_failure_exhausts_budget_of_six() {
        let mut budget = RetryBudget::new(6);
        for attempt in 1..=6 {
            assert_eq!(
                budget.record_failure(),
                RetryDecision::Retry { attempt, max: 6 }
            );
        }
        assert_eq!(
            budget.record_failure(),
            RetryDecision::Exhausted { attempts: 7 }
        );
    }

    #[test]
    fn test_success_resets_count() {
        let mut budget = RetryBudget::new(6);
        for _ in 0..6 {
            budget.record_failure();
        }
        budget.record_success();
        assert_eq!(budget.failures(), 0);
        assert_eq!(
            budget.record_failure(),
            RetryDecision::Retry { attempt: 1, max: 6 }
        );
    }

    #[test]
    fn test_zero_budget_fails_immediately() {
        let mut budget = RetryBudget::new(0);
        assert_eq!(
            budget.record_failure(),
            RetryDecision::Exhausted { attempts: 1 }
        );
    }
}
