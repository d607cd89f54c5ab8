//! Strategy selection by failure kind.

use std::time::Duration;

use portage_core::FailureKind;

use super::strategy::RetryStrategy;

/// One routing entry: any of `kinds` selects `strategy`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRule {
    pub kinds: Vec<FailureKind>,
    pub strategy: RetryStrategy,
}

/// Ordered rules plus a fallback. The first rule naming the failure's kind wins.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategyLibrary {
    rules: Vec<RetryRule>,
    default: RetryStrategy,
}

impl RetryStrategyLibrary {
    pub fn new(default: RetryStrategy) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Same strategy for every failure kind.
    pub fn uniform(strategy: RetryStrategy) -> Self {
        Self::new(strategy)
    }

    pub fn with_rule(mut self, kinds: impl IntoIterator<Item = FailureKind>, strategy: RetryStrategy) -> Self {
        self.rules.push(RetryRule {
            kinds: kinds.into_iter().collect(),
            strategy,
        });
        self
    }

    pub fn strategy_for(&self, kind: FailureKind) -> &RetryStrategy {
        self.rules
            .iter()
            .find(|rule| rule.kinds.contains(&kind))
            .map(|rule| &rule.strategy)
            .unwrap_or(&self.default)
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }
}

impl Default for RetryStrategyLibrary {
    fn default() -> Self {
        Self::new(RetryStrategy::simple(3, Duration::from_millis(1_000)))
            .with_rule(
                [FailureKind::Transport],
                RetryStrategy::exponential(5, Duration::from_millis(500), 2.0),
            )
            .with_rule(
                [FailureKind::RateLimited],
                RetryStrategy::exponential(6, Duration::from_secs(2), 3.0),
            )
            .with_rule(
                [FailureKind::Unauthorized, FailureKind::Permanent],
                RetryStrategy::NoRetry,
            )
    }
}
