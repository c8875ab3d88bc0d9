//
// print_frames.rs
//
// Prints every frame received on a bus behind a socketcand bridge,
// until interrupted with Ctrl-C.
//

use anyhow::Context;
use clap::Parser;

use socketcand::{Bus, ShouldRetry};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// How often the loop wakes up to check for an interrupt.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Host running socketcand
    #[clap(long, value_parser, default_value = "192.168.0.16")]
    host: String,

    /// TCP port of the bridge
    #[clap(long, value_parser, default_value_t = 29536)]
    port: u16,

    /// CAN bus on the bridge
    #[clap(long, value_parser, default_value = "can0")]
    channel: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut bus = Bus::open(&args.host, args.port, &args.channel).with_context(|| {
        format!(
            "Failed to open bus {} on {}:{}",
            args.channel, args.host, args.port
        )
    })?;

    println!("Reading on {}", args.channel);

    let shutdown = AtomicBool::new(false);
    let shutdown = Arc::new(shutdown);
    let signal_shutdown = shutdown.clone();

    ctrlc::set_handler(move || {
        signal_shutdown.store(true, Ordering::Relaxed);
    })
    .context("Failed to set signal handler")?;

    let res = loop {
        if shutdown.load(Ordering::Relaxed) {
            break Ok(());
        }
        match bus.read_message_timeout(POLL_INTERVAL) {
            Ok(msg) => println!("{}", msg),
            Err(err) if err.should_retry() => {}
            Err(err) => break Err(err).context("Failed to read from the bus"),
        }
    };

    bus.shutdown().context("Failed to close the bus")?;
    res
}
