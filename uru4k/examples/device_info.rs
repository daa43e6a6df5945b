//! Open the reader, print its identity and hardware status

use uru4k::{Device, Register};

fn main() -> uru4k::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut device = Device::new_usb();
    let info = device.open()?;
    println!("Device: {}", info);
    println!("  model:        {}", info.model());
    println!("  interface:    {}", info.interface);
    println!("  bulk-in:      0x{:02X}", info.bulk_in_endpoint);

    let hw_status = device.read_register(Register::HwStat)?;
    println!("  {}: 0x{:02X}", Register::HwStat, hw_status);

    device.release();
    device.close();

    Ok(())
}
