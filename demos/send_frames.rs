//
// send_frames.rs
//
// Sends an FD frame to a bus behind a socketcand bridge once a second,
// until interrupted with Ctrl-C.
//

use anyhow::{anyhow, Context};
use clap::Parser;

use socketcand::{Bus, CanFdFrame, EmbeddedFrame, ExtendedId, Message};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_ID: u32 = 0xC0FFEE;
const FRAME_DATA: &[u8] = &[0, 1, 2, 3];

const PERIOD: Duration = Duration::from_secs(1);

// How often the wait wakes up to check for an interrupt.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

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

/// Sleeps for `period`, returning early if `shutdown` gets set.
fn wait(period: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + period;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
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

    let shutdown = AtomicBool::new(false);
    let shutdown = Arc::new(shutdown);
    let signal_shutdown = shutdown.clone();

    ctrlc::set_handler(move || {
        signal_shutdown.store(true, Ordering::Relaxed);
    })
    .context("Failed to set signal handler")?;

    let id = ExtendedId::new(FRAME_ID).ok_or_else(|| anyhow!("Invalid ID {:X}", FRAME_ID))?;

    let res = loop {
        if shutdown.load(Ordering::Relaxed) {
            break Ok(());
        }

        let frame = match CanFdFrame::new(id, FRAME_DATA) {
            Some(frame) => frame,
            None => break Err(anyhow!("Failed to create the frame")),
        };
        println!("{}", Message::new(frame.clone()));

        if let Err(err) = bus.write_frame(&frame) {
            break Err(err).context("Failed to send the frame");
        }

        wait(PERIOD, &shutdown);
    };

    bus.shutdown().context("Failed to close the bus")?;
    res
}
