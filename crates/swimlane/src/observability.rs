//! Protocol metrics
//!
//! Counters and gauges go through the `metrics` facade, so any recorder the
//! embedding application installs (Prometheus, statsd, ...) picks them up.
//!
//! # Feature Flags
//!
//! ```toml
//! # Cargo.toml
//! swimlane = { version = "0.1", features = ["metrics"] }
//! ```
//!
//! Without the `metrics` feature every call compiles to nothing.

use crate::member::MemberState;
use crate::message::MessageType;

// ============================================================================
// Membership Metrics
// ============================================================================

/// Membership and failure detection metrics
pub struct SwimMetrics;

impl SwimMetrics {
    // ---- Counters ----

    /// Probe rounds started
    pub fn increment_probes() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_probes_total").increment(1);
    }

    /// Probes that ended without an ack
    pub fn increment_probe_timeouts() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_probe_timeouts_total").increment(1);
    }

    /// Indirect probe requests sent
    pub fn increment_indirect_probes(count: usize) {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_indirect_probes_total").increment(count as u64);
        let _ = count;
    }

    /// Suspicions about the local node that we refuted
    pub fn increment_refutations() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_refutations_total").increment(1);
    }

    /// Accepted state transitions, labelled by target state
    pub fn increment_transitions(state: MemberState) {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_transitions_total", "state" => state.to_string())
            .increment(1);
        let _ = state;
    }

    /// Accepted facts queued for gossip
    pub fn increment_updates_learned() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_updates_learned_total").increment(1);
    }

    /// Queued facts handed to outgoing messages
    pub fn increment_updates_disseminated(count: usize) {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_updates_disseminated_total").increment(count as u64);
        let _ = count;
    }

    /// Faulty records evicted from the table
    pub fn increment_evictions() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_evictions_total").increment(1);
    }

    // ---- Gauges ----

    /// Visible members, including the local node
    pub fn set_member_count(count: usize) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("swimlane_members").set(count as f64);
        let _ = count;
    }

    /// Updates waiting to be piggybacked
    pub fn set_pending_updates(count: usize) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("swimlane_pending_updates").set(count as f64);
        let _ = count;
    }

    /// Current local incarnation
    pub fn set_incarnation(incarnation: u64) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("swimlane_incarnation").set(incarnation as f64);
        let _ = incarnation;
    }
}

// ============================================================================
// Network Metrics
// ============================================================================

/// Datagram traffic metrics
pub struct NetworkMetrics;

impl NetworkMetrics {
    /// Messages sent, labelled by type
    pub fn increment_sent(kind: MessageType, bytes: usize) {
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("swimlane_messages_sent_total", "type" => kind.to_string())
                .increment(1);
            metrics::counter!("swimlane_bytes_sent_total").increment(bytes as u64);
        }
        let _ = (kind, bytes);
    }

    /// Messages received, labelled by type
    pub fn increment_received(kind: MessageType, bytes: usize) {
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("swimlane_messages_received_total", "type" => kind.to_string())
                .increment(1);
            metrics::counter!("swimlane_bytes_received_total").increment(bytes as u64);
        }
        let _ = (kind, bytes);
    }

    /// Datagrams that could not be decoded
    pub fn increment_decode_errors() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_decode_errors_total").increment(1);
    }

    /// Sends that failed at the transport
    pub fn increment_send_errors() {
        #[cfg(feature = "metrics")]
        metrics::counter!("swimlane_send_errors_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swim_metrics_compile() {
        // Just verify metrics calls compile without panicking
        SwimMetrics::increment_probes();
        SwimMetrics::increment_probe_timeouts();
        SwimMetrics::increment_transitions(MemberState::Suspect);
        SwimMetrics::increment_updates_learned();
        SwimMetrics::increment_updates_disseminated(3);
        SwimMetrics::set_member_count(3);
        SwimMetrics::set_incarnation(7);
    }

    #[test]
    fn test_network_metrics_compile() {
        NetworkMetrics::increment_sent(MessageType::Ping, 64);
        NetworkMetrics::increment_received(MessageType::Ack, 64);
        NetworkMetrics::increment_decode_errors();
    }
}
