//
// tokio_print_frames.rs
//
// Prints every frame received on a bus behind a socketcand bridge, using
// tokio, until interrupted with Ctrl-C.
//

use socketcand::{tokio::AsyncBus, Error, Result};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut bus = AsyncBus::open("192.168.0.16", 29536, "can0").await?;

    println!("Reading on {}", bus.channel());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let res = loop {
        tokio::select! {
            res = bus.read_message() => match res {
                Ok(msg) => println!("{}", msg),
                Err(Error::Closed) => break Ok(()),
                Err(err) => break Err(err),
            },
            _ = &mut ctrl_c => break Ok(()),
        }
    };

    bus.shutdown().await?;
    res
}
