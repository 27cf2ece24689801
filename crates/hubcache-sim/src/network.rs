use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault injection configuration for simulated request/response delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum response delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of requests that fail before reaching the server.
    pub request_failure_percent: u8,
    /// Percentage of responses lost after the server applied the request.
    pub response_loss_percent: u8,
    /// Percentage chance of reversing the ready responses at each tick.
    pub reorder_rate_percent: u8,
}

impl FaultConfig {
    /// No faults and no delay: every response arrives in the round its
    /// request was sent, in send order.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_delay_rounds: 0,
            request_failure_percent: 0,
            response_loss_percent: 0,
            reorder_rate_percent: 0,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 3,
            request_failure_percent: 5,
            response_loss_percent: 5,
            reorder_rate_percent: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending<T> {
    deliver_at_round: u64,
    message: T,
}

/// Result of delivering all ready responses for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome<T> {
    pub delivered: Vec<T>,
    /// Whether delivery order was reversed.
    pub reordered: bool,
}

/// Deterministic delaying and reordering queue of responses to the viewer.
///
/// Failures are decided by the caller via [`SimulatedNetwork::fails_request`]
/// and [`SimulatedNetwork::loses_response`]; a lost response is still
/// delivered, as a transport error, so the viewer's loading guards release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork<T> {
    pending: Vec<Pending<T>>,
    fault: FaultConfig,
}

impl<T> SimulatedNetwork<T> {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Number of in-flight responses.
    #[must_use]
    pub const fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn fails_request(&self, rng: &mut DeterministicRng) -> bool {
        rng.hit_rate_percent(self.fault.request_failure_percent)
    }

    #[must_use]
    pub fn loses_response(&self, rng: &mut DeterministicRng) -> bool {
        rng.hit_rate_percent(self.fault.response_loss_percent)
    }

    /// Queue a response with a random delay. Returns the delay in rounds.
    pub fn send(&mut self, message: T, round: u64, rng: &mut DeterministicRng) -> u8 {
        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay =
            u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);

        self.pending.push(Pending {
            deliver_at_round: round.saturating_add(u64::from(delay)),
            message,
        });
        delay
    }

    /// Deliver all responses whose delivery round has arrived.
    #[must_use]
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome<T> {
        let mut ready = Vec::new();
        let mut future = Vec::new();

        for pending in self.pending.drain(..) {
            if pending.deliver_at_round <= round {
                ready.push(pending.message);
            } else {
                future.push(pending);
            }
        }

        self.pending = future;

        let should_reorder =
            ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if should_reorder {
            ready.reverse();
        }

        DeliverOutcome {
            delivered: ready,
            reordered: should_reorder,
        }
    }

    /// Deliver everything still in flight, in delivery-round order.
    #[must_use]
    pub fn drain(&mut self) -> Vec<T> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| p.deliver_at_round);
        pending.into_iter().map(|p| p.message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_delivers_same_round_in_order() {
        let mut rng = DeterministicRng::new(1);
        let mut net = SimulatedNetwork::new(FaultConfig::none());
        for n in 0..4 {
            assert_eq!(net.send(n, 5, &mut rng), 0);
        }
        let out = net.deliver_ready(5, &mut rng);
        assert_eq!(out.delivered, [0, 1, 2, 3]);
        assert!(!out.reordered);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn delayed_messages_wait_for_their_round() {
        let mut rng = DeterministicRng::new(9);
        let fault = FaultConfig {
            max_delay_rounds: 5,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let delays: Vec<u8> = (0..20).map(|n| net.send(n, 0, &mut rng)).collect();

        let now = net.deliver_ready(0, &mut rng).delivered.len();
        let immediate = delays.iter().filter(|&&d| d == 0).count();
        assert_eq!(now, immediate);
        assert_eq!(net.drain().len(), 20 - immediate);
    }

    #[test]
    fn no_faults_never_fail() {
        let mut rng = DeterministicRng::new(3);
        let net: SimulatedNetwork<u8> = SimulatedNetwork::new(FaultConfig::none());
        for _ in 0..100 {
            assert!(!net.fails_request(&mut rng));
            assert!(!net.loses_response(&mut rng));
        }
    }
}
