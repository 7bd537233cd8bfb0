//! Read users and the attendance log

use tracing_subscriber::EnvFilter;
use zklink::{Device, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ip = std::env::var("DEVICE_IP").unwrap_or_else(|_| "192.168.1.201".to_string());

    let mut device = Device::new(ip, 4370);
    device.connect().await?;

    println!("{} attendance records stored", device.get_attendance_size().await?);

    let users = device.get_users().await?;
    for user in &users {
        println!("  {}", user);
    }

    device.disable_device().await?;

    let result = device
        .get_attendances(|done, total| println!("  {done}/{total} bytes"))
        .await;

    device.enable_device().await?;

    match result {
        Ok(records) => {
            for record in &records {
                println!("  {}", record);
            }
            println!("{} records", records.len());
        }
        Err(Error::TransferStalled { partial, remaining_chunks }) => {
            println!("Transfer stalled: {} bytes, {} chunk(s) missing", partial.len(), remaining_chunks);
        }
        Err(e) => return Err(e.into()),
    }

    device.disconnect().await?;

    Ok(())
}
