//! Serial port discovery.
//!
//! Lists the ports a cash device could be attached to so a caller can pick
//! the `port` for [`crate::SessionConfig`]. Nothing here opens a port.

use serde::Serialize;
use tracing::debug;

/// Physical link behind a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Usb,
    Bluetooth,
    Pci,
    Unknown,
}

/// One serial port visible to this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn from_serialport(port: serialport::SerialPortInfo) -> Self {
        let mut info = Self {
            name: port.port_name,
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.kind = PortKind::Usb;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
            }
            serialport::SerialPortType::BluetoothPort => info.kind = PortKind::Bluetooth,
            serialport::SerialPortType::PciPort => info.kind = PortKind::Pci,
            serialport::SerialPortType::Unknown => {}
        }
        info
    }
}

/// Enumerate serial ports on this system.
pub fn available_ports() -> Result<Vec<PortInfo>, serialport::Error> {
    let ports: Vec<PortInfo> = serialport::available_ports()?
        .into_iter()
        .map(PortInfo::from_serialport)
        .collect();
    debug!(count = ports.len(), "Serial ports enumerated");
    Ok(ports)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
