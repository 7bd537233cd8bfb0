//! UDP connection example

use tracing_subscriber::EnvFilter;
use zklink::Device;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG=zklink=trace shows every frame
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Change to your device IP
    let ip = std::env::var("DEVICE_IP").unwrap_or_else(|_| "192.168.1.201".to_string());

    println!("Connecting to {} via UDP...", ip);

    let mut device = Device::new_udp(ip, 4370);

    device.connect().await?;
    println!("✓ Connected (session {:?})", device.session_id());

    let info = device.get_device_info().await?;
    println!("✓ Device: {}", info);
    if let Some(sizes) = info.free_sizes {
        println!("  {} users, {}/{} logs", sizes.users, sizes.logs, sizes.log_capacity);
    }

    println!("  Time: {}", device.get_time().await?);

    device.disconnect().await?;
    println!("✓ Disconnected");

    Ok(())
}
