use network_interface::{NetworkInterface, NetworkInterfaceConfig};

/// Names of host interfaces that look like TAP devices.
pub fn tap_interfaces() -> Vec<String> {
    match NetworkInterface::show() {
        Ok(interfaces) => filter_tap(interfaces.into_iter().map(|i| i.name)),
        Err(e) => {
            debug!("cannot list network interfaces: {e}");
            vec![]
        }
    }
}

fn filter_tap(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut taps: Vec<String> = names.filter(|n| n.starts_with("tap")).collect();
    taps.sort();
    taps.dedup();
    taps
}

/// Bridged mode relies on a TAP interface set up outside of this tool.
pub fn warn_if_no_tap() {
    let taps = tap_interfaces();
    if taps.is_empty() {
        warn!("bridged networking selected but no tap interface exists on this host");
    } else {
        debug!("tap interfaces: {}", taps.join(", "));
    }
}
