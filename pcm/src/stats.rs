//! Transfer statistics.
//!
//! Every session keeps a [`PipelineStats`] record so lossy outcomes
//! (truncated or failed flushes, dropped encode windows) are observable
//! without Prometheus. When a [`MetricsContext`] is attached, the same
//! events are mirrored into its counters.

use bt_pcm_common::MetricsContext;
use tracing::info;

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    // ---
    /// Media packets handed to the transport (including truncated ones)
    pub media_packets_sent: u64,

    /// Media bytes the transport accepted
    pub media_bytes_sent: u64,

    /// Short or blocked sends that led to another attempt
    pub send_retries: u64,

    /// Packets whose tail was dropped after the last attempt
    pub flushes_truncated: u64,

    /// Packets dropped because the transport reported an error
    pub flushes_failed: u64,

    /// PCM windows the encoder rejected
    pub encode_errors: u64,

    /// SBC frames produced
    pub sbc_frames_encoded: u64,

    /// Raw packets sent
    pub raw_packets_sent: u64,

    /// Raw packets received
    pub raw_packets_received: u64,
}

impl PipelineStats {
    // ---
    /// Packets lost in whole or in part.
    pub fn lossy_flushes(&self) -> u64 {
        // ---
        self.flushes_truncated + self.flushes_failed
    }

    /// Logs a one-line summary.
    pub fn log(&self) {
        // ---
        info!(
            "Stats: media_packets={}, media_bytes={}, retries={}, truncated={}, failed={}, \
             encode_errors={}, sbc_frames={}, raw_sent={}, raw_received={}",
            self.media_packets_sent,
            self.media_bytes_sent,
            self.send_retries,
            self.flushes_truncated,
            self.flushes_failed,
            self.encode_errors,
            self.sbc_frames_encoded,
            self.raw_packets_sent,
            self.raw_packets_received,
        );
    }
}

/// Stats record plus the optional Prometheus mirror.
#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    // ---
    pub(crate) stats: PipelineStats,
    pub(crate) metrics: Option<MetricsContext>,
}

impl Telemetry {
    // ---
    pub(crate) fn packet_sent(&mut self, bytes: usize) {
        // ---
        self.stats.media_packets_sent += 1;
        self.stats.media_bytes_sent += bytes as u64;
        if let Some(m) = &self.metrics {
            m.media_packets_sent_total.inc();
            m.media_bytes_sent_total.inc_by(bytes as u64);
        }
    }

    pub(crate) fn retry(&mut self) {
        // ---
        self.stats.send_retries += 1;
        if let Some(m) = &self.metrics {
            m.send_retries_total.inc();
        }
    }

    pub(crate) fn truncated(&mut self) {
        // ---
        self.stats.flushes_truncated += 1;
        if let Some(m) = &self.metrics {
            m.flushes_truncated_total.inc();
        }
    }

    pub(crate) fn failed(&mut self) {
        // ---
        self.stats.flushes_failed += 1;
        if let Some(m) = &self.metrics {
            m.flushes_failed_total.inc();
        }
    }

    pub(crate) fn encode_error(&mut self) {
        // ---
        self.stats.encode_errors += 1;
        if let Some(m) = &self.metrics {
            m.encode_errors_total.inc();
        }
    }

    pub(crate) fn frame_encoded(&mut self, seconds: Option<f64>) {
        // ---
        self.stats.sbc_frames_encoded += 1;
        if let Some(m) = &self.metrics {
            m.sbc_frames_encoded_total.inc();
            if let Some(s) = seconds {
                m.encode_seconds.observe(s);
            }
        }
    }

    pub(crate) fn raw_sent(&mut self) {
        // ---
        self.stats.raw_packets_sent += 1;
        if let Some(m) = &self.metrics {
            m.raw_packets_sent_total.inc();
        }
    }

    pub(crate) fn raw_received(&mut self) {
        // ---
        self.stats.raw_packets_received += 1;
        if let Some(m) = &self.metrics {
            m.raw_packets_received_total.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_counts_without_metrics() {
        // ---
        let mut t = Telemetry::default();
        t.packet_sent(100);
        t.packet_sent(50);
        t.retry();
        t.truncated();
        t.failed();

        assert_eq!(t.stats.media_packets_sent, 2);
        assert_eq!(t.stats.media_bytes_sent, 150);
        assert_eq!(t.stats.send_retries, 1);
        assert_eq!(t.stats.lossy_flushes(), 2);
    }

    #[test]
    fn test_mirrors_into_metrics() {
        // ---
        let metrics = MetricsContext::new("test").expect("metrics");
        let mut t = Telemetry {
            stats: PipelineStats::default(),
            metrics: Some(metrics.clone()),
        };

        t.truncated();
        t.frame_encoded(Some(0.0001));
        t.raw_received();

        assert_eq!(metrics.flushes_truncated_total.get(), 1);
        assert_eq!(metrics.sbc_frames_encoded_total.get(), 1);
        assert_eq!(metrics.raw_packets_received_total.get(), 1);
        assert_eq!(t.stats.raw_packets_received, 1);
    }
}
