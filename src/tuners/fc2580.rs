//! FCI FC2580 dispatch. Correct probe identity and control flow only; the
//! vendor's fractional-N PLL tables are a documented simplification (see
//! DESIGN.md). No per-stage manual gain control — this chip only exposes
//! an automatic gain loop.

use super::{Tuner, TunerGain, TunerInfo};
use crate::device::Device;
use crate::error::Result;
use crate::error::RtlsdrError::TunerUnsupported;
use log::info;

const FC2580_I2C_ADDR: u16 = 0x56;

pub const TUNER_ID: &str = "fc2580";
pub const TUNER_INFO: TunerInfo = TunerInfo {
    id: TUNER_ID,
    name: "FCI FC2580",
    i2c_addr: 0x56,
    check_addr: 0x01,
    check_val: 0x56,
    mask: 0x7f,
};

#[derive(Debug)]
pub struct Fc2580 {
    info: TunerInfo,
    freq: u32,
    xtal: u32,
}

impl Fc2580 {
    pub fn new() -> Fc2580 {
        Fc2580 {
            info: TUNER_INFO,
            freq: 0,
            xtal: 0,
        }
    }

    fn write(&self, handle: &Device, reg: u8, val: u8) -> Result<()> {
        handle.i2c_write(FC2580_I2C_ADDR, &[reg, val])?;
        Ok(())
    }
}

impl Tuner for Fc2580 {
    fn init(&mut self, handle: &Device) -> Result<()> {
        info!("FC2580: init");
        self.write(handle, 0x02, 0x01)?;
        Ok(())
    }

    fn exit(&mut self, handle: &Device) -> Result<()> {
        self.write(handle, 0x02, 0x00)
    }

    fn get_info(&self) -> Result<TunerInfo> {
        Ok(self.info)
    }

    fn set_freq(&mut self, handle: &Device, freq: u32) -> Result<()> {
        info!("FC2580: set_freq {}", freq);
        self.write(handle, 0x25, (freq >> 16) as u8)?;
        self.write(handle, 0x26, (freq >> 8) as u8)?;
        self.freq = freq;
        Ok(())
    }

    fn set_bandwidth(&mut self, handle: &Device, bw: u32, _rate: u32) -> Result<u32> {
        let applied = if bw > 6_000_000 {
            8_000_000
        } else if bw > 4_500_000 {
            6_000_000
        } else {
            4_500_000
        };
        self.write(handle, 0x36, (applied / 1_000_000) as u8)?;
        Ok(applied)
    }

    fn set_gain(&mut self, _handle: &Device, _gain: TunerGain) -> Result<()> {
        Err(TunerUnsupported(
            "FC2580 only supports automatic gain control".to_string(),
        ))
    }

    fn get_gains(&self) -> Result<Vec<i32>> {
        Ok(vec![])
    }

    fn get_if_freq(&self) -> Result<u32> {
        Ok(0)
    }

    fn get_xtal_freq(&self) -> Result<u32> {
        Ok(self.xtal)
    }

    fn set_xtal_freq(&mut self, freq: u32) -> Result<()> {
        self.xtal = freq;
        Ok(())
    }
}
