//! BLE utility for taggr groups
//!
//! Central-role helper around the taggr protocols: scan for joiners
//! advertising the bootstrap service, push a session attribute pair into a
//! joiner as the group initiator, or fire a one-shot tag write against a
//! marked device. The marked/joiner posture needs a platform peripheral
//! adapter and is not covered here.

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use clap::{Parser, Subcommand};
use std::time::Duration;
use uuid::Uuid;

use taggr_core::DeviceIdentity;
use taggr_device::FileStore;
use taggr_proto::{
    BOOTSTRAP_SERVICE_UUID, SessionAttributes, TAG_CHARACTERISTIC_ID_UUID, TAG_SERVICE_ID_UUID,
    wire,
};

#[derive(Parser)]
#[command(name = "taggr-ble")]
#[command(about = "BLE utility for taggr groups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices, flagging ones open for group bootstrap
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Configure a joiner: write a session attribute pair into its
    /// bootstrap characteristics
    Configure {
        /// Device name or address to connect to (any bootstrap peer if omitted)
        #[arg(short, long)]
        device: Option<String>,
        /// Session service UUID (generated when omitted)
        #[arg(long)]
        session_service: Option<Uuid>,
        /// Session characteristic UUID (generated when omitted)
        #[arg(long)]
        session_characteristic: Option<Uuid>,
    },
    /// Tag a marked device: write this install's identity to its session
    /// characteristic
    Tag {
        /// Session service UUID the marked device advertises
        #[arg(long)]
        service: Uuid,
        /// Session characteristic UUID to write the identity to
        #[arg(long)]
        characteristic: Uuid,
        /// Device name or address to connect to (any match if omitted)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Print this installation's stable device identity
    Identity,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Identity = cli.command {
        let mut store = FileStore::open_default()?;
        let identity = DeviceIdentity::load_or_create(&mut store)?;
        println!("{identity}");
        return Ok(());
    }

    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or("No Bluetooth adapter found")?;

    match cli.command {
        Commands::Scan { duration } => {
            scan_devices(&adapter, duration).await?;
        }
        Commands::Configure { device, session_service, session_characteristic } => {
            let attributes = SessionAttributes {
                service: session_service.unwrap_or_else(Uuid::new_v4),
                characteristic: session_characteristic.unwrap_or_else(Uuid::new_v4),
            };
            configure_joiner(&adapter, device.as_deref(), attributes).await?;
        }
        Commands::Tag { service, characteristic, device } => {
            tag_device(&adapter, device.as_deref(), service, characteristic).await?;
        }
        Commands::Identity => unreachable!(),
    }

    Ok(())
}

async fn scan_devices(adapter: &Adapter, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning ({} seconds)...", duration);

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let peripherals = adapter.peripherals().await?;

    println!("\nFound {} devices:", peripherals.len());
    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let addr = peripheral.address();
            let rssi = props
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "N/A".to_string());

            let is_joiner = props.services.contains(&BOOTSTRAP_SERVICE_UUID);
            let marker = if is_joiner { " [TAGGR]" } else { "" };

            println!("  {} ({}) RSSI: {}{}", name, addr, rssi, marker);
        }
    }

    adapter.stop_scan().await?;
    Ok(())
}

async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    service: Uuid,
) -> Result<Peripheral, Box<dyn std::error::Error>> {
    println!("Scanning for peers...");

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => props.services.contains(&service),
            };

            if matches {
                adapter.stop_scan().await?;
                println!("Found device: {} ({})", name, addr);
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err("no matching device found".into())
}

async fn configure_joiner(
    adapter: &Adapter,
    target: Option<&str>,
    attributes: SessionAttributes,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = find_device(adapter, target, BOOTSTRAP_SERVICE_UUID).await?;

    println!("Connecting...");
    device.connect().await?;

    println!("Discovering services...");
    device.discover_services().await?;

    let characteristics = device.characteristics();

    let service_char = characteristics
        .iter()
        .find(|c| c.uuid == TAG_SERVICE_ID_UUID)
        .ok_or("session service id characteristic not found")?;

    let characteristic_char = characteristics
        .iter()
        .find(|c| c.uuid == TAG_CHARACTERISTIC_ID_UUID)
        .ok_or("session characteristic id characteristic not found")?;

    println!("Writing session attributes...");
    device
        .write(service_char, &wire::encode_uuid(attributes.service), WriteType::WithResponse)
        .await?;
    device
        .write(
            characteristic_char,
            &wire::encode_uuid(attributes.characteristic),
            WriteType::WithResponse,
        )
        .await?;

    println!("Joiner configured with session:");
    println!("  service:        {}", attributes.service);
    println!("  characteristic: {}", attributes.characteristic);

    device.disconnect().await?;
    Ok(())
}

async fn tag_device(
    adapter: &Adapter,
    target: Option<&str>,
    service: Uuid,
    characteristic: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FileStore::open_default()?;
    let identity = DeviceIdentity::load_or_create(&mut store)?;

    let device = find_device(adapter, target, service).await?;

    println!("Connecting...");
    device.connect().await?;

    println!("Discovering services...");
    device.discover_services().await?;

    let characteristics = device.characteristics();
    let tag_char = characteristics
        .iter()
        .find(|c| c.uuid == characteristic)
        .ok_or("session characteristic not found on device")?;

    println!("Tagging as {}...", identity);
    device
        .write(tag_char, &wire::encode_uuid(identity.as_uuid()), WriteType::WithResponse)
        .await?;

    println!("Tag acknowledged; you are marked now.");

    let _ = device.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
