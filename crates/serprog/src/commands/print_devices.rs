use anyhow::Result;
use serprog_core::DEVICES;

pub fn run() -> Result<()> {
    println!("{:<5} {:<20} {:<8} {:<12} {:<12}", "id", "name", "proto", "userapp@", "size");
    for device in DEVICES {
        println!(
            "{:<5} {:<20} {:<8} {:<#12x} {:<#12x}",
            device.id, device.name, device.protocol_version, device.userapp_start, device.userapp_size
        );
    }
    Ok(())
}
