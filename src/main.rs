use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use message::PayloadGenerator;
use metrics::RunSummary;
use rand::{SeedableRng, rngs::StdRng};
use session::{BrokerSession, DryRunSession, StompSession};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod message;
mod metrics;
mod producer;
mod session;
mod stomp;

const RULE_WIDTH: usize = 60;

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    print_banner(&cli);

    let message_config = cli.message_config();
    let mut session: Box<dyn BrokerSession> = if cli.dry_run {
        Box::new(DryRunSession::new())
    } else {
        Box::new(StompSession::new(cli.broker_config()))
    };
    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut generator = PayloadGenerator::new(message_config.format, rng);

    let result = producer::produce(
        &message_config,
        cli.queue_name(),
        session.as_mut(),
        &mut generator,
        shutdown_signal(),
    )
    .await;

    match &result {
        Ok(summary) => {
            if summary.interrupted {
                warn!("Interrupted by user");
            }
            print_summary(summary);
        }
        Err(e) => error!("{:#}", e),
    }
    ExitCode::from(exit_status(&result))
}

// Interrupted runs and runs with failed sends still count as success
fn exit_status(result: &anyhow::Result<RunSummary>) -> u8 {
    match result {
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_FAILED,
    }
}

// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_banner(cli: &Cli) {
    let rule = "=".repeat(RULE_WIDTH);
    let format: config::MessageFormat = cli.format.into();

    println!("{rule}");
    println!("STOMP Message Producer");
    println!("{rule}");
    println!("Configuration:");
    if cli.dry_run {
        println!("  Host:     none (dry run)");
    } else {
        println!("  Host:     {}:{}", cli.host, cli.port);
    }
    println!("  Queue:    {}", cli.queue_name());
    println!("  Count:    {} messages", cli.count);
    println!("  Size:     {} bytes", cli.size);
    println!("  Rate:     {} msg/sec", cli.rate);
    println!("  Format:   {format}");
    println!("{rule}");
}

fn print_summary(summary: &RunSummary) {
    let rule = "=".repeat(RULE_WIDTH);

    println!("{rule}");
    println!("Summary:");
    println!("  Messages sent:     {}", summary.sent);
    println!("  Messages failed:   {}", summary.failed);
    println!("  Bytes sent:        {}", summary.bytes_sent);
    println!(
        "  Total time:        {:.2} seconds",
        summary.elapsed.as_secs_f64()
    );
    match summary.throughput() {
        Some(rate) => println!("  Actual rate:       {rate:.2} msg/sec"),
        None => println!("  Actual rate:       n/a"),
    }
    if let Some(latency) = summary.avg_send_latency {
        println!(
            "  Avg send latency:  {:.2} ms",
            latency.as_secs_f64() * 1000.0
        );
    }
    println!("{rule}");
}
