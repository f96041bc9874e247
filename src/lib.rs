// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver core and network servers for RTL2832U-based SDR dongles.
//!
//! [`RtlSdr`] owns the USB register bus and the probed tuner, and is the
//! entry point for opening a device. The `server` module builds the
//! `rtl_tcp`/`rtl_udp` network services on top of it.

pub mod agc;
pub mod device;
pub mod error;
pub mod server;
pub mod stream;
pub mod tuners;

mod rtlsdr;

pub use device::DeviceDescriptor;
pub use rtlsdr::{RtlSdr, DEFAULT_BUF_LENGTH};

use error::Result;
use error::RtlsdrError::RtlsdrErr;

/// Which physical dongle to open. Index and serial number are resolved
/// through `rusb` enumeration; `Fd` is for embedded/Android hosts where
/// the file descriptor is handed to the process pre-opened and
/// enumeration is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceId {
    Index(usize),
    Fd(i32),
    Serial(String),
}

/// Tuner sampling mode. `On`/`OnSwap` bypass the tuner's mixer entirely
/// and feed the ADC straight from the RF front end, trading tuning range
/// for the ability to receive below the tuner's lower frequency limit.
/// This is the raw register-level tri-state the `rtl_tcp` wire protocol's
/// "set direct sampling mode" command carries; see [`DirectSamplingPolicy`]
/// for the higher-level policy that decides when to apply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectSampleMode {
    Off,
    On,
    OnSwap,
}

/// Policy governing when direct sampling is engaged, paired with a
/// threshold frequency for the two `BelowThreshold` variants. Set once
/// (typically at startup) via `RtlSdr::set_ds_mode`; `set_center_freq`
/// re-evaluates it against the threshold on every retune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectSamplingPolicy {
    /// Never force direct sampling; the tuner's mixer always handles it.
    Iq,
    /// Always sample directly, non-swapped.
    I,
    /// Always sample directly, swapped.
    Q,
    /// Sample directly (non-swapped) only below the threshold frequency.
    IBelowThreshold,
    /// Sample directly (swapped) only below the threshold frequency.
    QBelowThreshold,
}

/// Snapshot of `device::enumerate`'s results, taken once at construction.
/// Most callers want a single consistent listing rather than having the
/// USB bus re-walked on every lookup.
#[derive(Debug, Clone)]
pub struct DeviceDescriptors(Vec<DeviceDescriptor>);

impl DeviceDescriptors {
    pub fn new() -> Result<Self> {
        Ok(DeviceDescriptors(device::enumerate::enumerate()?))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceDescriptor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl RtlSdr {
    /// Opens and initializes a device identified by `device_id`.
    pub fn open(device_id: DeviceId) -> Result<RtlSdr> {
        let handle = device::Device::new(device_id)?;
        let mut sdr = RtlSdr::new(handle);
        sdr.init()?;
        Ok(sdr)
    }

    /// Opens the first supported device found on the bus.
    pub fn open_first_available() -> Result<RtlSdr> {
        RtlSdr::open(DeviceId::Index(0))
    }

    pub fn open_with_index(index: usize) -> Result<RtlSdr> {
        RtlSdr::open(DeviceId::Index(index))
    }

    pub fn open_with_serial(serial: &str) -> Result<RtlSdr> {
        RtlSdr::open(DeviceId::Serial(serial.to_string()))
    }

    /// Number of supported devices currently attached.
    pub fn get_device_count() -> Result<usize> {
        device::enumerate::count()
    }

    /// Full descriptor list for every supported device currently attached.
    pub fn list_devices() -> Result<Vec<DeviceDescriptor>> {
        device::enumerate::enumerate()
    }

    pub fn get_device_info(index: usize) -> Result<DeviceDescriptor> {
        device::enumerate::get_device_info(index)
    }

    pub fn get_device_serial(index: usize) -> Result<String> {
        Ok(device::enumerate::get_device_info(index)?.serial)
    }

    /// Tears down the tuner and powers off the demodulator. The device
    /// handle itself is released when `RtlSdr` is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.deinit_baseband().map_err(|e| RtlsdrErr(format!("error closing device: {}", e)))
    }
}
