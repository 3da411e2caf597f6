//! Identifier helpers shared by the btleplug transport.

use btleplug::platform::PeripheralId;

/// Zero address reported by CoreBluetooth, which hides MAC addresses.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Render a peripheral ID without its `PeripheralId(..)` wrapper.
///
/// On macOS this is a UUID; elsewhere it is usually the MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Pick the identifier a scan reports for a peripheral.
///
/// Uses the Bluetooth address when the platform exposes one and falls
/// back to the peripheral ID where it does not.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_hidden_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_hidden_address(address: &str) -> bool {
    address.is_empty() || address == HIDDEN_ADDRESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_address_detection() {
        assert!(is_hidden_address("00:00:00:00:00:00"));
        assert!(is_hidden_address(""));
        assert!(!is_hidden_address("0C:95:41:CB:23:FF"));
    }
}
