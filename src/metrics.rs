use std::time::Duration;

// Result of a single send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { bytes: usize, latency: Duration },
    Failed,
}

// Counters accumulated while the producer loop runs
#[derive(Clone, Debug, Default)]
pub struct RunMetrics {
    pub sent_messages: u64,
    pub failed_messages: u64,
    pub bytes_sent: u64,
    pub total_send_time: Duration,
}

impl RunMetrics {
    pub fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Sent { bytes, latency } => {
                self.sent_messages += 1;
                self.bytes_sent += bytes as u64;
                self.total_send_time += latency;
            }
            SendOutcome::Failed => self.failed_messages += 1,
        }
    }

    pub fn attempted(&self) -> u64 {
        self.sent_messages + self.failed_messages
    }

    pub fn finish(self, elapsed: Duration, interrupted: bool) -> RunSummary {
        let avg_send_latency = if self.sent_messages > 0 {
            let nanos = self.total_send_time.as_nanos() / u128::from(self.sent_messages);
            Some(Duration::from_nanos(nanos as u64))
        } else {
            None
        };

        RunSummary {
            sent: self.sent_messages,
            failed: self.failed_messages,
            bytes_sent: self.bytes_sent,
            avg_send_latency,
            elapsed,
            interrupted,
        }
    }
}

/// Totals reported once the producer loop ends.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub sent: u64,
    pub failed: u64,
    pub bytes_sent: u64,
    pub avg_send_latency: Option<Duration>,
    /// Wall-clock time from the first send to the end of the loop.
    pub elapsed: Duration,
    /// The loop was stopped by the operator before sending everything.
    pub interrupted: bool,
}

impl RunSummary {
    /// Messages actually delivered per second, `None` when no time elapsed.
    pub fn throughput(&self) -> Option<f64> {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            Some(self.sent as f64 / seconds)
        } else {
            None
        }
    }
}
