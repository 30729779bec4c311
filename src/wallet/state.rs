use std::time::Duration;

use tokio::time::Instant;

use crate::Amount;

/// Where a user's withdrawal dialogue stands.
///
/// `Idle` means no dialogue is known. `Submitted` and `Cancelled` are
/// terminal: the session keeps them until it is replaced or swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WithdrawalState {
    #[default]
    Idle,
    AwaitingAmount,
    AwaitingAddress {
        amount: Amount,
    },
    Submitted,
    Cancelled,
}

impl WithdrawalState {
    pub fn is_open(self) -> bool {
        matches!(
            self,
            WithdrawalState::AwaitingAmount | WithdrawalState::AwaitingAddress { .. }
        )
    }
}

/// One user's in-memory withdrawal session. Never persisted.
#[derive(Debug)]
pub struct Session {
    pub state: WithdrawalState,
    touched: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: WithdrawalState::AwaitingAmount,
            touched: Instant::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn advance(&mut self, state: WithdrawalState) {
        self.state = state;
        self.touched = Instant::now();
    }

    /// End the dialogue in a terminal state.
    pub fn finish(&mut self, outcome: WithdrawalState) {
        debug_assert!(!outcome.is_open());
        self.advance(outcome);
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.touched.elapsed() >= ttl
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
