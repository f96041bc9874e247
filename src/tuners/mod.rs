pub mod e4000;
pub mod fc0012;
pub mod fc0013;
pub mod fc2580;
pub mod r820t;

use std::fmt;

use crate::device::Device;
use crate::error::Result;
use crate::error::RtlsdrError::TunerUnsupported;

/// Static identity used to probe and describe a tuner chip.
#[derive(Debug, Clone, Copy)]
pub struct TunerInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub i2c_addr: u8,
    pub check_addr: u8,
    pub check_val: u8,
    /// Applied to the probe read before comparing against `check_val`.
    /// Every tuner but the FC2580 checks the full byte (`0xff`); the
    /// FC2580 only guarantees its low 7 bits.
    pub mask: u8,
}

/// Gain control mode, mirroring the on-wire `rtl_tcp` gain commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerGain {
    Auto,
    Manual(i32),
}

/// Dispatch surface every supported tuner chip implements. Operations a
/// given chip doesn't support return `TunerUnsupported` rather than being
/// absent, so callers always have a slot to call into.
pub trait Tuner: fmt::Debug + Send {
    fn init(&mut self, handle: &Device) -> Result<()>;
    fn exit(&mut self, handle: &Device) -> Result<()>;
    fn get_info(&self) -> Result<TunerInfo>;
    fn set_freq(&mut self, handle: &Device, freq: u32) -> Result<()>;
    /// Returns the bandwidth actually applied, which may differ from `bw`.
    fn set_bandwidth(&mut self, handle: &Device, bw: u32, rate: u32) -> Result<u32>;
    fn set_bandwidth_center(&mut self, _handle: &Device, _offset: i32) -> Result<()> {
        Err(TunerUnsupported(format!(
            "{} has no bandwidth-center adjustment",
            self.get_info().map(|i| i.id).unwrap_or("tuner")
        )))
    }
    fn set_gain(&mut self, handle: &Device, gain: TunerGain) -> Result<()>;
    fn get_gains(&self) -> Result<Vec<i32>>;
    fn read_gain(&self, _handle: &Device) -> Result<i32> {
        Err(TunerUnsupported(
            "this tuner does not report instantaneous gain".to_string(),
        ))
    }
    fn set_if_gain(&mut self, _handle: &Device, _stage: u16, _gain_tenths_db: i16) -> Result<()> {
        Err(TunerUnsupported(
            "this tuner has no separately addressable IF gain stages".to_string(),
        ))
    }
    fn get_if_freq(&self) -> Result<u32>;
    fn get_xtal_freq(&self) -> Result<u32>;
    fn set_xtal_freq(&mut self, freq: u32) -> Result<()>;
    fn set_i2c_register(&mut self, _handle: &Device, _reg: u8, _data: u8, _mask: u8) -> Result<()> {
        Err(TunerUnsupported(
            "raw I2C register writes are not supported on this tuner".to_string(),
        ))
    }
    /// Like `set_i2c_register`, but bypasses the tuner's own shadow-register
    /// bookkeeping and pokes the chip directly. Used by the TCP/UDP "I2C
    /// override" commands, distinct from the regular register write.
    fn set_i2c_override(&mut self, _handle: &Device, _reg: u8, _data: u8, _mask: u8) -> Result<()> {
        Err(TunerUnsupported(
            "raw I2C register overrides are not supported on this tuner".to_string(),
        ))
    }
    fn get_i2c_register(&self, _handle: &Device, _reg: u8) -> Result<u8> {
        Err(TunerUnsupported(
            "raw I2C register reads are not supported on this tuner".to_string(),
        ))
    }
}

/// Tuners probed, in order, when bringing up a new device. Mirrors the
/// `rtlsdr_search_tuner` order from the baseband engine: E4000, FC0013,
/// R820T, R828D, then (after a GPIO pin-4 reset pulse) FC2580 and FC0012.
pub const KNOWN_TUNERS: [TunerInfo; 6] = [
    e4000::TUNER_INFO,
    fc0013::TUNER_INFO,
    r820t::TUNER_INFO,
    r820t::TUNER_INFO_R828D,
    fc2580::TUNER_INFO,
    fc0012::TUNER_INFO,
];
