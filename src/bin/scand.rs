// socketcand/src/bin/scand.rs
//
// Command-line tool for talking to a socketcand bridge.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Simple CLI tool to run basic CAN bus functionality against a socketcand
//! bridge, similar to 'candump' and 'cansend' from can-utils.

use anyhow::{anyhow, Context, Result};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use socketcand::{beacon, Bus, BusAddr, CanAnyFrame, Error, DEFAULT_PORT};
use std::{process, time::Duration};

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

/// Gets the bus address from the command line.
///
/// A `can://host:port/channel` URL wins over the separate options.
fn bus_addr(opts: &ArgMatches) -> Result<BusAddr> {
    if let Some(url) = opts.get_one::<String>("url") {
        return url
            .parse()
            .with_context(|| format!("Invalid bus URL '{}'", url));
    }

    let host = opts
        .get_one::<String>("host")
        .ok_or_else(|| anyhow!("Missing host"))?;
    let port = opts.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT);
    let channel = opts
        .get_one::<String>("channel")
        .ok_or_else(|| anyhow!("Missing channel"))?;
    Ok(BusAddr::new(host.as_str(), port, channel.as_str()))
}

fn open_bus(opts: &ArgMatches) -> Result<Bus> {
    let addr = bus_addr(opts)?;
    Bus::open_addr(&addr).with_context(|| format!("Failed to open bus {}", addr))
}

/// Process the 'dump' subcommand.
///
/// Prints every message on the bus until the bridge hangs up.
fn dump_cmd(opts: &ArgMatches) -> Result<()> {
    let bus = open_bus(opts)?;
    for msg in bus {
        println!("{}", msg.context("Failed to read from the bus")?);
    }
    Ok(())
}

/// Process the 'send' subcommand.
fn send_cmd(opts: &ArgMatches) -> Result<()> {
    let text = opts
        .get_one::<String>("frame")
        .ok_or_else(|| anyhow!("Missing frame"))?;
    let frame: CanAnyFrame = text
        .parse()
        .with_context(|| format!("Invalid frame '{}'", text))?;

    let mut bus = open_bus(opts)?;
    bus.write_frame(&frame)
        .with_context(|| format!("Failed to send {}", text))?;
    // socketcand does not acknowledge sends
    bus.echo().context("Bridge did not answer the echo")?;
    bus.shutdown()?;
    Ok(())
}

/// Process the 'discover' subcommand.
fn discover_cmd(sub_opts: &ArgMatches) -> Result<()> {
    let secs = sub_opts.get_one::<u64>("timeout").copied().unwrap_or(3);

    match beacon::detect_beacon(Duration::from_secs(secs))
        .context("Failed to listen for beacons")?
    {
        Some(beacon) => {
            println!(
                "{} ({}) at {}:{}",
                beacon.name, beacon.device_type, beacon.host, beacon.port
            );
            if let Some(desc) = &beacon.description {
                println!("  {}", desc);
            }
            for addr in beacon.bus_addrs() {
                println!("  {}", addr);
            }
        }
        None => println!("No bridge found within {}s", secs),
    }
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    env_logger::init();

    let opts = Command::new("scand")
        .version(VERSION)
        .about("Command line tool to interact with a CAN bus through a socketcand bridge")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            arg!(-h --host <host> "The bridge host")
                .required(false)
                .default_value("192.168.0.16")
                .global(true),
        )
        .arg(
            arg!(-p --port <port> "The bridge TCP port")
                .required(false)
                .default_value("29536")
                .value_parser(value_parser!(u16))
                .global(true),
        )
        .arg(
            arg!(-c --channel <channel> "The bus on the bridge, like 'can0'")
                .required(false)
                .default_value("can0")
                .global(true),
        )
        .arg(
            arg!(-u --url <url> "The bus as a URL, like 'can://host:port/can0'")
                .required(false)
                .global(true),
        )
        .subcommand(Command::new("dump").about("Print the frames received on the bus"))
        .subcommand(
            Command::new("send")
                .about("Send a single frame to the bus")
                .arg(
                    arg!(<frame> "The frame, as <id>#<data>, <id>#R[len] or <id>##<flags><data>")
                        .required(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            Command::new("discover")
                .about("Listen for a bridge announcing itself on the local network")
                .arg(
                    arg!(-t --timeout <secs> "How long to listen, in seconds")
                        .required(false)
                        .value_parser(value_parser!(u64)),
                ),
        )
        .get_matches();

    let res = match opts.subcommand() {
        Some(("dump", sub_opts)) => dump_cmd(sub_opts),
        Some(("send", sub_opts)) => send_cmd(sub_opts),
        Some(("discover", sub_opts)) => discover_cmd(sub_opts),
        _ => Err(anyhow!("Need to specify a subcommand (-? for help).")),
    };

    if let Err(err) = res {
        if let Some(Error::Handshake(text)) = err.downcast_ref::<Error>() {
            eprintln!("The bridge refused the connection: {}", text);
        } else {
            eprintln!("{:#}", err);
        }
        process::exit(1);
    }
}
