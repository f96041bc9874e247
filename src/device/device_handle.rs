// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use crate::error::Result;
use crate::error::RtlsdrError::RtlsdrErr;
use crate::DeviceId;
use log::info;
use rusb::{Context, UsbContext};

use super::KNOWN_DEVICES;

const STRING_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct DeviceHandle {
    handle: rusb::DeviceHandle<Context>,
}
impl DeviceHandle {
    pub fn open(device_id: DeviceId) -> Result<Self> {
        let mut context = Context::new()?;
        let handle = match device_id {
            DeviceId::Index(index) => DeviceHandle::open_device(&mut context, index)?,
            DeviceId::Fd(fd) => DeviceHandle::open_device_with_fd(&mut context, fd)?,
            DeviceId::Serial(serial) => {
                DeviceHandle::open_device_by_serial(&mut context, &serial)?
            }
        };
        Ok(DeviceHandle { handle })
    }

    pub fn open_device<T: UsbContext>(
        context: &mut T,
        index: usize,
    ) -> Result<rusb::DeviceHandle<T>> {
        let devices = context.devices().map_err(|e| {
            info!("Failed to get devices: {:?}", e);
            RtlsdrErr(format!("Error: {:?}", e))
        })?;

        let mut device_count = 0;

        for (i, found) in devices.iter().enumerate() {
            let device_desc = match found.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    info!("Failed to get device descriptor for device {}: {:?}", i, e);
                    continue;
                }
            };

            for dev in KNOWN_DEVICES.iter() {
                if device_desc.vendor_id() == dev.vid && device_desc.product_id() == dev.pid {
                    info!(
                        "Found device at index {} Vendor ID = {:04x}, Product ID = {:04x}",
                        i,
                        device_desc.vendor_id(),
                        device_desc.product_id()
                    );

                    if device_count == index {
                        info!("Opening device at index {}", index);
                        return found.open().map_err(|e| {
                            info!("Failed to open device: {:?}", e);
                            RtlsdrErr(format!("Error: {:?}", e))
                        });
                    }
                    device_count += 1;
                }
            }
        }

        info!(
            "No matching device found at the requested index {}. Total matched devices: {}",
            index, device_count
        );

        Err(RtlsdrErr(format!("No device found at index {}", index)))
    }

    pub fn open_device_by_serial<T: UsbContext>(
        context: &mut T,
        serial: &str,
    ) -> Result<rusb::DeviceHandle<T>> {
        let devices = context
            .devices()
            .map_err(|e| RtlsdrErr(format!("Error: {:?}", e)))?;

        for found in devices.iter() {
            let device_desc = match found.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if !KNOWN_DEVICES
                .iter()
                .any(|d| d.vid == device_desc.vendor_id() && d.pid == device_desc.product_id())
            {
                continue;
            }
            let handle = match found.open() {
                Ok(h) => h,
                Err(_) => continue,
            };
            let langs = match handle.read_languages(STRING_TIMEOUT) {
                Ok(l) => l,
                Err(_) => continue,
            };
            let Some(lang) = langs.first() else {
                continue;
            };
            let this_serial = handle
                .read_serial_number_string(*lang, &device_desc, STRING_TIMEOUT)
                .ok();
            if this_serial.as_deref() == Some(serial) {
                info!("Opening device with serial '{}'", serial);
                return Ok(handle);
            }
        }
        Err(RtlsdrErr(format!(
            "No device found with serial '{}'",
            serial
        )))
    }

    #[cfg(unix)]
    pub fn open_device_with_fd<T: UsbContext>(
        context: &mut T,
        fd: i32,
    ) -> Result<rusb::DeviceHandle<T>> {
        use std::os::unix::io::RawFd;

        info!("Opening device with file descriptor {}", fd);

        unsafe {
            context.open_device_with_fd(fd as RawFd).map_err(|e| {
                info!("Failed to open device with fd {}: {:?}", fd, e);
                RtlsdrErr(format!("Error opening device with fd {}: {:?}", fd, e))
            })
        }
    }

    #[cfg(not(unix))]
    pub fn open_device_with_fd<T: UsbContext>(
        _context: &mut T,
        _fd: i32,
    ) -> Result<rusb::DeviceHandle<T>> {
        Err(RtlsdrErr(
            "File descriptor opening is only supported on Unix systems".to_string(),
        ))
    }

    pub fn claim_interface(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.claim_interface(iface)?)
    }
    pub fn reset(&mut self) -> Result<()> {
        Ok(self.handle.reset()?)
    }

    pub fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    pub fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, buf, timeout)?)
    }

    pub fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }

    /// Manufacturer/product/serial strings read off the device descriptor.
    pub fn get_usb_strings(&self) -> Result<(Option<String>, Option<String>, Option<String>)> {
        let desc = self.handle.device().device_descriptor()?;
        let langs = self.handle.read_languages(STRING_TIMEOUT)?;
        let Some(lang) = langs.first() else {
            return Ok((None, None, None));
        };
        let manufacturer = self
            .handle
            .read_manufacturer_string(*lang, &desc, STRING_TIMEOUT)
            .ok();
        let product = self
            .handle
            .read_product_string(*lang, &desc, STRING_TIMEOUT)
            .ok();
        let serial = self
            .handle
            .read_serial_number_string(*lang, &desc, STRING_TIMEOUT)
            .ok();
        Ok((manufacturer, product, serial))
    }
}
