// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{error, fmt, result};

/// A result of a function that may return a `RtlsdrError`.
pub type Result<T> = result::Result<T, RtlsdrError>;

/// Error kinds produced by the device driver core and the network servers.
#[derive(Debug)]
pub enum RtlsdrError {
    /// Propagated straight from a USB control/bulk transfer.
    Usb(rusb::Error),
    /// Rate out of band, FIR tap out of range, zero-length buffer, etc.
    InvalidArgument(String),
    /// Transfer errors hit the configured threshold, or a NoDevice status arrived.
    DeviceLost,
    /// A command the bound tuner doesn't support (e.g. offset tuning on R820T).
    TunerUnsupported(String),
    /// `read_async` while already running, `cancel_async` while not running, etc.
    StateViolation(String),
    /// Consumer/reader observed a socket error or a timeout; session torn down.
    ClientDisconnect(String),
    /// Generic driver error without a more specific kind above. Kept for
    /// parity with the string-based errors the rest of the driver raises.
    RtlsdrErr(String),
}

impl fmt::Display for RtlsdrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RtlsdrError::Usb(e) => write!(f, "USB error: {}", e),
            RtlsdrError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            RtlsdrError::DeviceLost => write!(f, "device lost"),
            RtlsdrError::TunerUnsupported(msg) => write!(f, "unsupported on this tuner: {}", msg),
            RtlsdrError::StateViolation(msg) => write!(f, "illegal state transition: {}", msg),
            RtlsdrError::ClientDisconnect(msg) => write!(f, "client disconnected: {}", msg),
            RtlsdrError::RtlsdrErr(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<rusb::Error> for RtlsdrError {
    fn from(e: rusb::Error) -> Self {
        RtlsdrError::Usb(e)
    }
}

impl error::Error for RtlsdrError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RtlsdrError::Usb(e) => Some(e),
            _ => None,
        }
    }
}
