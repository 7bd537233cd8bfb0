//! Device control example

use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use zklink::{Device, DeviceTime, EventFlags};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ip = std::env::var("DEVICE_IP").unwrap_or_else(|_| "192.168.1.201".to_string());

    let mut device = Device::new(ip, 4370);
    device.connect().await?;

    println!("Device connected!");

    // Disable device (show "Working...")
    println!("Disabling device...");
    device.disable_device().await?;

    let now = DeviceTime::try_from(chrono::Local::now().naive_local())?;
    println!("Setting clock to {}", now);
    device.set_time(now).await?;

    sleep(Duration::from_secs(3)).await;

    // Enable device (resume normal operation)
    println!("Enabling device...");
    device.enable_device().await?;

    println!("Waiting 30s for punches...");
    device.enable_realtime(EventFlags::ATTLOG).await?;
    while let Some(event) = device.next_realtime_event(Duration::from_secs(30)).await? {
        println!("  {} punched {:?} at {}", event.user_id, event.punch, event.time);
    }

    println!("Done!");

    device.disconnect().await?;

    Ok(())
}

