//! Inventory demo - stream tag reads from a reader on a serial port.
//!
//! ```text
//! cargo run --example inventory --features serial -- reader.json 10
//! ```
//!
//! `reader.json` is a `DriverConfig`, for example:
//!
//! ```json
//! { "model": "vmr64", "serial": { "path": "/dev/ttyUSB0" } }
//! ```
//!
//! Set `RUST_LOG=rfidwire=trace` to see every frame on the wire.

use std::time::Duration;

use rfidwire::{DriverBuilder, DriverConfig, DriverEvent, InventoryMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => DriverConfig::from_file(path)?,
        None => DriverConfig::default(),
    };
    let seconds: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);

    if config.serial.is_none() {
        eprintln!("No serial port configured. Available ports:");
        for port in rfidwire::transport::available_ports()? {
            eprintln!("  {}", port.port_name);
        }
        return Ok(());
    }

    let driver = DriverBuilder::from_config(config).connect_serial().await?;
    let mut events = driver.subscribe();

    driver.start_inventory(InventoryMode::FastSwitch).await?;
    println!("Reading tags for {seconds}s on a {} reader...", driver.model());

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(DriverEvent::TagRead(tag)) => {
                    seen += 1;
                    println!(
                        "{}  ant {}  {:>4} dBm  {:.1} MHz",
                        tag.epc, tag.antenna, tag.rssi, tag.frequency
                    );
                }
                Ok(DriverEvent::Notification(notice)) => println!("Reader: {notice:?}"),
                Ok(DriverEvent::Disconnected) => {
                    eprintln!("Reader disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => eprintln!("Event stream: {e}"),
            },
        }
    }

    println!("{seen} tag reads");
    driver.shutdown().await?;
    Ok(())
}
