//! Fitipower FC0013 dispatch. Same shape as FC0012 with a different probe
//! identity and a wider IF gain range; PLL/AGC coefficient tables are a
//! documented simplification (see DESIGN.md).

use super::{Tuner, TunerGain, TunerInfo};
use crate::device::Device;
use crate::error::Result;
use log::info;

const FC0013_I2C_ADDR: u16 = 0x63;

pub const TUNER_ID: &str = "fc0013";
pub const TUNER_INFO: TunerInfo = TunerInfo {
    id: TUNER_ID,
    name: "Fitipower FC0013",
    i2c_addr: 0x63,
    check_addr: 0x00,
    check_val: 0xa3,
    mask: 0xff,
};

#[derive(Debug)]
pub struct Fc0013 {
    info: TunerInfo,
    freq: u32,
    xtal: u32,
}

impl Fc0013 {
    pub fn new() -> Fc0013 {
        Fc0013 {
            info: TUNER_INFO,
            freq: 0,
            xtal: 0,
        }
    }

    fn write(&self, handle: &Device, reg: u8, val: u8) -> Result<()> {
        handle.i2c_write(FC0013_I2C_ADDR, &[reg, val])?;
        Ok(())
    }
}

impl Tuner for Fc0013 {
    fn init(&mut self, handle: &Device) -> Result<()> {
        info!("FC0013: init");
        self.write(handle, 0x01, 0x06)?;
        self.write(handle, 0x03, 0x2a)?;
        Ok(())
    }

    fn exit(&mut self, handle: &Device) -> Result<()> {
        self.write(handle, 0x01, 0x00)
    }

    fn get_info(&self) -> Result<TunerInfo> {
        Ok(self.info)
    }

    fn set_freq(&mut self, handle: &Device, freq: u32) -> Result<()> {
        info!("FC0013: set_freq {}", freq);
        self.write(handle, 0x18, (freq >> 16) as u8)?;
        self.write(handle, 0x19, (freq >> 8) as u8)?;
        self.freq = freq;
        Ok(())
    }

    fn set_bandwidth(&mut self, handle: &Device, bw: u32, _rate: u32) -> Result<u32> {
        let _ = handle;
        Ok(bw.min(6_000_000))
    }

    fn set_gain(&mut self, handle: &Device, gain: TunerGain) -> Result<()> {
        let val = match gain {
            TunerGain::Auto => 0x00,
            TunerGain::Manual(g) => (g.clamp(0, 255)) as u8,
        };
        self.write(handle, 0x13, val)
    }

    fn get_gains(&self) -> Result<Vec<i32>> {
        Ok(vec![
            -99, -73, -65, -63, -60, -58, -54, 58, 61, 63, 65, 67, 68, 70, 71, 179, 181, 182, 184,
            186, 188, 191, 197,
        ])
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
