use anyhow::{Context, Result};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

use crate::{
    config::MessageConfig,
    message::PayloadGenerator,
    metrics::{RunMetrics, RunSummary, SendOutcome},
    session::BrokerSession,
};

/// Connects, runs the send loop and disconnects.
///
/// A failed connect returns before any message is generated. Once connected
/// the session is disconnected however the loop ends.
pub async fn produce<S, R, F>(
    config: &MessageConfig,
    queue_name: &str,
    session: &mut S,
    generator: &mut PayloadGenerator<R>,
    shutdown: F,
) -> Result<RunSummary>
where
    S: BrokerSession + ?Sized,
    R: Rng,
    F: Future<Output = ()>,
{
    session
        .connect()
        .await
        .context("Failed to connect to broker")?;

    let result = run(config, queue_name, session, generator, shutdown).await;
    if session.is_connected() {
        session.disconnect().await;
    }
    result
}

/// Sends `config.count` generated messages, pausing `1 / rate` seconds
/// between sends.
///
/// A failed send is counted and the loop moves on. Completion of `shutdown`
/// aborts the loop at once, even mid-send or mid-pause.
#[instrument(
    name = "producer::run",
    skip_all,
    fields(queue.name = queue_name, messages.count = config.count)
)]
pub async fn run<S, R, F>(
    config: &MessageConfig,
    queue_name: &str,
    session: &mut S,
    generator: &mut PayloadGenerator<R>,
    shutdown: F,
) -> Result<RunSummary>
where
    S: BrokerSession + ?Sized,
    R: Rng,
    F: Future<Output = ()>,
{
    let content_type = config.format.content_type();
    let delay = config.delay();
    let mut metrics = RunMetrics::default();
    let mut interrupted = false;

    tokio::pin!(shutdown);
    // Elapsed time counts from the first send
    let mut started: Option<Instant> = None;

    for i in 0..config.count {
        let message = generator.generate(config.target_size_bytes)?;

        let send_started = Instant::now();
        started.get_or_insert(send_started);
        let result = tokio::select! {
            result = session.send(queue_name, &message.body, content_type) => result,
            () = &mut shutdown => {
                interrupted = true;
                break;
            }
        };

        match result {
            Ok(()) => {
                metrics.record(SendOutcome::Sent {
                    bytes: message.actual_size_bytes,
                    latency: send_started.elapsed(),
                });
                info!(
                    "[{}/{}] {} {} message ({} bytes)",
                    metrics.sent_messages,
                    config.count,
                    session.delivery_verb(),
                    config.format,
                    message.actual_size_bytes
                );
            }
            Err(e) => {
                metrics.record(SendOutcome::Failed);
                debug!("Message {} of {} failed: {}", i + 1, config.count, e);
            }
        }

        let is_last = i + 1 == config.count;
        if let Some(delay) = delay.filter(|_| !is_last) {
            tokio::select! {
                () = sleep(delay) => {}
                () = &mut shutdown => {
                    interrupted = true;
                    break;
                }
            }
        }
    }

    debug!(
        attempted = metrics.attempted(),
        interrupted, "Producer loop finished"
    );
    let elapsed = started.map(|at| at.elapsed()).unwrap_or_default();
    Ok(metrics.finish(elapsed, interrupted))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        config::{BrokerConfig, MessageFormat},
        session::{DryRunSession, SessionError, StompSession},
        stomp::{Frame, read_frame, write_frame},
    };

    // In-memory session; attempts listed in `fail_on` are rejected
    #[derive(Default)]
    struct ScriptedSession {
        refuse_connect: bool,
        fail_on: HashSet<usize>,
        send_latency: Option<Duration>,
        attempts: usize,
        bodies: Vec<String>,
        content_types: Vec<String>,
        connected: bool,
        connects: usize,
        disconnects: usize,
    }

    #[async_trait::async_trait()]
    impl BrokerSession for ScriptedSession {
        async fn connect(&mut self) -> Result<(), SessionError> {
            self.connects += 1;
            if self.refuse_connect {
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            self.connected = true;
            Ok(())
        }

        async fn send(
            &mut self,
            _queue_name: &str,
            body: &str,
            content_type: &str,
        ) -> Result<(), SessionError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if let Some(latency) = self.send_latency {
                sleep(latency).await;
            }
            if self.fail_on.contains(&attempt) {
                return Err(SessionError::Rejected("queue full".to_string()));
            }
            self.bodies.push(body.to_string());
            self.content_types.push(content_type.to_string());
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.disconnects += 1;
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn config(count: u64, rate_per_second: f64) -> MessageConfig {
        MessageConfig {
            format: MessageFormat::Json,
            target_size_bytes: 256,
            count,
            rate_per_second,
        }
    }

    fn generator() -> PayloadGenerator<StdRng> {
        PayloadGenerator::new(MessageFormat::Json, StdRng::seed_from_u64(8))
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(
            diff <= Duration::from_millis(10),
            "elapsed {actual:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_sends_nothing() {
        let mut session = ScriptedSession::default();
        let summary = run(
            &config(0, 1.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(session.attempts, 0);
        assert!(!summary.interrupted);
        // nothing was sent, so the clock never started
        assert_eq!(summary.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_loop_continues() {
        let mut session = ScriptedSession {
            fail_on: HashSet::from([1, 4]),
            ..Default::default()
        };
        let summary = run(
            &config(6, 0.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.sent, 4);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.sent + summary.failed, 6);
        assert_eq!(session.attempts, 6);
        assert_eq!(summary.bytes_sent, 4 * (256 - 10));
        assert!(session.content_types.iter().all(|ct| ct == "application/json"));
    }

    #[tokio::test(start_paused = true)]
    async fn every_body_is_fresh() {
        let mut session = ScriptedSession::default();
        run(
            &config(5, 0.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        let unique: HashSet<&String> = session.bodies.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_between_sends() {
        let mut session = ScriptedSession::default();
        let summary = run(
            &config(5, 2.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.sent, 5);
        // no pause after the last send
        assert_close(summary.elapsed, Duration::from_secs(2));
        let throughput = summary.throughput().unwrap();
        assert!((throughput - 2.5).abs() < 0.05, "{throughput}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_rate_has_no_delay() {
        for rate in [0.0, -1.0] {
            let mut session = ScriptedSession::default();
            let summary = run(
                &config(20, rate),
                "orders",
                &mut session,
                &mut generator(),
                std::future::pending(),
            )
            .await
            .unwrap();

            assert_eq!(summary.sent, 20);
            assert!(summary.elapsed < Duration::from_millis(1), "{rate}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_pause_stops_loop() {
        let mut session = ScriptedSession::default();
        let summary = run(
            &config(10, 1.0),
            "orders",
            &mut session,
            &mut generator(),
            sleep(Duration::from_millis(2500)),
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.sent, 3);
        assert_eq!(session.attempts, 3);
        assert_close(summary.elapsed, Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_send_stops_loop() {
        let mut session = ScriptedSession {
            send_latency: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let summary = run(
            &config(10, 0.0),
            "orders",
            &mut session,
            &mut generator(),
            sleep(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(session.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn produce_disconnects_after_run() {
        let mut session = ScriptedSession::default();
        let summary = produce(
            &config(3, 10.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.sent, 3);
        assert_eq!(session.connects, 1);
        assert_eq!(session.disconnects, 1);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn produce_disconnects_after_interrupt() {
        let mut session = ScriptedSession::default();
        let summary = produce(
            &config(10, 1.0),
            "orders",
            &mut session,
            &mut generator(),
            sleep(Duration::from_millis(500)),
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.sent, 1);
        assert_eq!(session.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_skips_run() {
        let mut session = ScriptedSession {
            refuse_connect: true,
            ..Default::default()
        };
        let err = produce(
            &config(10, 1.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Failed to connect"), "{err:#}");
        assert_eq!(session.attempts, 0);
        assert_eq!(session.disconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_generates_at_the_configured_rate() {
        let mut session = DryRunSession::new();
        let summary = produce(
            &config(3, 2.0),
            "orders",
            &mut session,
            &mut generator(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.sent, 3);
        assert_eq!(summary.bytes_sent, 3 * (256 - 10));
        assert_close(summary.elapsed, Duration::from_secs(1));
    }

    // Real session against a broker that accepts the connection and then
    // stops reading, so the first large SEND blocks on a full socket
    #[tokio::test]
    async fn interrupt_during_blocked_send_still_returns() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = tokio::io::BufStream::new(socket);
            read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, &Frame::new("CONNECTED").header("version", "1.2"))
                .await
                .unwrap();
            sleep(Duration::from_secs(60)).await;
        });

        let mut session = StompSession::new(BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
            credentials: None,
            receipts: false,
        })
        .with_disconnect_timeout(Duration::from_secs(1));
        let config = MessageConfig {
            format: MessageFormat::Json,
            target_size_bytes: 16 << 20,
            count: 1_000,
            rate_per_second: 0.0,
        };

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            produce(
                &config,
                "orders",
                &mut session,
                &mut generator(),
                sleep(Duration::from_millis(500)),
            ),
        )
        .await
        .expect("produce should return after the interrupt")
        .unwrap();

        assert!(summary.interrupted);
        assert!(summary.sent < 1_000);
        assert!(!session.is_connected());

        broker.abort();
    }
}
