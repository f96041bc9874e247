// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use rusb::UsbContext;

use crate::error::Result;
use crate::error::RtlsdrError::RtlsdrErr;

use super::KNOWN_DEVICES;

/// One entry in the enumerated device table, as returned by
/// `RtlSdr::list_devices`/`RtlSdr::get_device_info`.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

pub fn count() -> Result<usize> {
    Ok(enumerate()?.len())
}

pub fn enumerate() -> Result<Vec<DeviceDescriptor>> {
    let context = rusb::Context::new()?;
    let devices = context
        .devices()
        .map_err(|e| RtlsdrErr(format!("failed to list USB devices: {}", e)))?;

    let mut found = Vec::new();
    let mut index = 0;
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !KNOWN_DEVICES
            .iter()
            .any(|d| d.vid == desc.vendor_id() && d.pid == desc.product_id())
        {
            continue;
        }

        let (manufacturer, product, serial) = match device.open() {
            Ok(handle) => {
                let timeout = Duration::from_millis(100);
                let langs = handle.read_languages(timeout).unwrap_or_default();
                match langs.first() {
                    Some(lang) => (
                        handle
                            .read_manufacturer_string(*lang, &desc, timeout)
                            .unwrap_or_default(),
                        handle
                            .read_product_string(*lang, &desc, timeout)
                            .unwrap_or_default(),
                        handle
                            .read_serial_number_string(*lang, &desc, timeout)
                            .unwrap_or_default(),
                    ),
                    None => (String::new(), String::new(), String::new()),
                }
            }
            Err(_) => (String::new(), String::new(), String::new()),
        };

        found.push(DeviceDescriptor {
            index,
            manufacturer,
            product,
            serial,
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
        });
        index += 1;
    }
    Ok(found)
}

pub fn get_device_info(index: usize) -> Result<DeviceDescriptor> {
    enumerate()?
        .into_iter()
        .nth(index)
        .ok_or_else(|| RtlsdrErr(format!("no device found at index {}", index)))
}
