use crate::types::PollBudget;
use backoff::backoff::{Backoff, Constant};
use std::future::Future;

/// What a single attempt decided.
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    Retry,
}

/// Bounded fixed-delay retry: wait `interval`, run the attempt, repeat until
/// it returns [`Step::Done`] or `max_attempts` attempts have been made.
///
/// Attempts are numbered from 1. Returns `None` when the budget runs out.
pub async fn fixed_interval<T, F, Fut>(budget: &PollBudget, mut attempt: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Step<T>>,
{
    let mut delays = Constant::new(budget.interval);

    for number in 1..=budget.max_attempts {
        if let Some(delay) = delays.next_backoff() {
            tokio::time::sleep(delay).await;
        }
        if let Step::Done(value) = attempt(number).await {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_done() {
        let budget = PollBudget::new(500, 10);
        let mut seen = Vec::new();
        let result = fixed_interval(&budget, |n| {
            seen.push(n);
            async move {
                if n == 3 {
                    Step::Done(n * 10)
                } else {
                    Step::Retry
                }
            }
        })
        .await;
        assert_eq!(result, Some(30));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_with_fixed_delay() {
        let budget = PollBudget::new(2_000, 3);
        let started = Instant::now();
        let mut attempts = 0;
        let result: Option<()> = fixed_interval(&budget, |_| {
            attempts += 1;
            async { Step::Retry }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(attempts, 3);
        assert!(started.elapsed() >= Duration::from_millis(6_000));
        assert!(started.elapsed() < Duration::from_millis(6_500));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_never_runs() {
        let budget = PollBudget::new(1_000, 0);
        let result: Option<u32> = fixed_interval(&budget, |_| async { Step::Done(1) }).await;
        assert!(result.is_none());
    }
}
