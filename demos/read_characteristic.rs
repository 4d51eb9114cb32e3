//! Hardware example: connect to the first named peripheral and read a characteristic
//!
//! Run with: cargo run --example read_characteristic -- <characteristic-uuid>
//!
//! Without an argument the standard Device Name characteristic (0x2A00) is read.

use ble_operation_queue::{BleClient, ConnectionSetup, Result};
use btleplug::api::{Peripheral as _, ScanFilter};
use std::time::Duration;
use uuid::Uuid;

const DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_operation_queue=info".parse().unwrap()),
        )
        .init();

    let characteristic = std::env::args()
        .nth(1)
        .and_then(|arg| Uuid::parse_str(&arg).ok())
        .unwrap_or(DEVICE_NAME);

    let client = BleClient::new().await?;

    println!("Scanning for 5 seconds...");
    client.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    client.stop_scan().await?;

    let mut target = None;
    for peripheral in client.peripherals().await? {
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);
        if let Some(name) = name {
            println!("Found {} ({})", name, peripheral.address());
            target = Some(peripheral);
            break;
        }
    }

    let Some(peripheral) = target else {
        println!("No named peripheral found");
        return Ok(());
    };

    let connection = client
        .connect(peripheral, ConnectionSetup::default())
        .await?;
    println!("Connected to {}", connection.address());

    match connection.read_characteristic(characteristic).await {
        Ok(value) => println!("{} = {:02X?}", characteristic, value),
        Err(e) => println!("Read failed: {}", e),
    }

    connection.disconnect().await?;
    println!("Disconnected");

    Ok(())
}
