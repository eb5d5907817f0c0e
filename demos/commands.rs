//! Commands demo - configuration round trips against a simulated reader.
//!
//! Runs without hardware: a task on the other end of an in-memory duplex
//! stream answers VMR64 commands the way a reader does.
//!
//! ```text
//! RUST_LOG=rfidwire=debug cargo run --example commands
//! ```

use rfidwire::protocol::{vmr64, Extracted, Reassembler};
use rfidwire::{BeeperMode, ReaderDriver, ReaderModel};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::EnvFilter;

/// Answer power, beeper and RF profile commands until the driver hangs up.
async fn simulated_reader(mut stream: DuplexStream) -> std::io::Result<()> {
    let mut reassembler = Reassembler::new(ReaderModel::Vmr64.descriptor());
    let mut powers = [30u8, 30, 30, 30];
    let mut profile = 0xD1u8;
    let mut buf = [0u8; 1024];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for item in reassembler.push(&buf[..n]) {
            let Extracted::Frame(frame) = item else { continue };
            let Some(request) = vmr64::parse_frame(frame.as_bytes()) else { continue };

            let reply = match request.command {
                vmr64::cmd::PWR => {
                    powers.copy_from_slice(&request.payload[..4]);
                    vec![0x10]
                }
                vmr64::cmd::PWR_GET => powers.to_vec(),
                vmr64::cmd::BEEPER => vec![0x10],
                vmr64::cmd::SET_RF_PROFILE => {
                    profile = request.payload[0];
                    vec![0x10]
                }
                vmr64::cmd::GET_RF_PROFILE => vec![profile],
                _ => continue,
            };

            let frame = vmr64::build_command(vmr64::READER_ADDRESS, request.command, &reply)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            stream.write_all(&frame).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (client, server) = tokio::io::duplex(4096);
    let reader = tokio::spawn(simulated_reader(server));

    let driver = ReaderDriver::builder()
        .model(ReaderModel::Vmr64)
        .connect_stream(client)
        .await?;

    println!("Power: {:?}", driver.get_power().await?);
    driver.set_power([30, 28, 26, 24]).await?;
    println!("Power after set: {:?}", driver.get_power().await?);

    driver.set_beeper(BeeperMode::BeepAfterTag).await?;
    println!("Beeper set to beep after each tag");

    println!("Profile: {}", driver.get_rf_profile().await?.description);
    let profile = driver.set_rf_profile(3).await?;
    println!("Switched to {} ({})", profile.name, profile.description);

    if let Err(e) = driver.set_power([34, 30, 30, 30]).await {
        println!("Refused as expected: {e}");
    }

    driver.shutdown().await?;
    reader.await??;
    Ok(())
}
