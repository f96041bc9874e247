use crate::device::{
    Device, BLOCK_SYS, BLOCK_USB, DEMOD_CTL, DEMOD_CTL_1, EEPROM_SIZE, USB_EPA_CTL,
    USB_EPA_MAXPKT, USB_SYSCTL,
};
use crate::error::Result;
use crate::error::RtlsdrError::{InvalidArgument, RtlsdrErr, StateViolation, TunerUnsupported};
use crate::tuners::e4000::E4000;
use crate::tuners::fc0012::Fc0012;
use crate::tuners::fc0013::Fc0013;
use crate::tuners::fc2580::Fc2580;
use crate::tuners::r820t::{Chip, R820T, R82XX_IF_FREQ, TUNER_ID, TUNER_ID_R828D};
use crate::tuners::{Tuner, TunerGain, TunerInfo, KNOWN_TUNERS};
use crate::{DirectSampleMode, DirectSamplingPolicy};
use log::{error, info};

#[cfg(test)]
mod rtlsdr_test;

const INTERFACE_ID: u8 = 0;

const DEF_RTL_XTAL_FREQ: u32 = 28_800_000;
const MIN_RTL_XTAL_FREQ: u32 = DEF_RTL_XTAL_FREQ - 1000;
const MAX_RTL_XTAL_FREQ: u32 = DEF_RTL_XTAL_FREQ + 1000;

pub(crate) const FIR_LEN: usize = 16;
const DEFAULT_FIR: &'static [i32; FIR_LEN] = &[
    -54, -36, -41, -40, -32, -14, 14, 53, // i8
    101, 156, 215, 273, 327, 372, 404, 421, // i12
];

/// Default host-side read buffer size, in bytes, used by the TCP server's
/// producer thread and by `demos/`. Must be a multiple of 512 to line up
/// with USB bulk transfer packet boundaries.
pub const DEFAULT_BUF_LENGTH: usize = 16 * 16384;

/// Placeholder dispatched before a real tuner has been probed. Every
/// method reports the violation rather than silently no-op'ing.
#[derive(Debug)]
struct NoTuner;

impl Tuner for NoTuner {
    fn init(&mut self, _handle: &Device) -> Result<()> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn exit(&mut self, _handle: &Device) -> Result<()> {
        Ok(())
    }
    fn get_info(&self) -> Result<TunerInfo> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn set_freq(&mut self, _handle: &Device, _freq: u32) -> Result<()> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn set_bandwidth(&mut self, _handle: &Device, _bw: u32, _rate: u32) -> Result<u32> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn set_gain(&mut self, _handle: &Device, _gain: TunerGain) -> Result<()> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn get_gains(&self) -> Result<Vec<i32>> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn get_if_freq(&self) -> Result<u32> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn get_xtal_freq(&self) -> Result<u32> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
    fn set_xtal_freq(&mut self, _freq: u32) -> Result<()> {
        Err(StateViolation("no tuner bound yet".to_string()))
    }
}

#[derive(Debug)]
pub struct RtlSdr {
    handle: Device,
    tuner: Box<dyn Tuner>,
    freq: u32, // Hz
    rate: u32, // Hz
    bw: u32,
    direct_sampling: DirectSampleMode,
    ds_policy: DirectSamplingPolicy,
    ds_threshold: u32,
    /// Fixed offset folded into the R82XX IF center on every bandwidth
    /// change, set via `set_tuner_band_center`. Zero unless a caller has
    /// asked for it; unsupported on non-R82XX tuners.
    if_band_center: i32,
    xtal: u32,
    tuner_xtal: u32,
    ppm_correction: u32,
    offset_freq: u32,
    corr: i32, // PPM
    force_bt: bool,
    force_ds: bool,
    fir: [i32; FIR_LEN],
}

impl RtlSdr {
    pub fn new(handle: Device) -> Self {
        RtlSdr {
            handle,
            tuner: Box::new(NoTuner {}),
            freq: 0,
            rate: 0,
            bw: 0,
            ppm_correction: 0,
            xtal: DEF_RTL_XTAL_FREQ,
            tuner_xtal: DEF_RTL_XTAL_FREQ,
            direct_sampling: DirectSampleMode::Off,
            ds_policy: DirectSamplingPolicy::Iq,
            ds_threshold: 0,
            if_band_center: 0,
            offset_freq: 0,
            corr: 0,
            force_bt: false,
            force_ds: false,
            fir: *DEFAULT_FIR,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.handle.claim_interface(INTERFACE_ID)?;
        self.handle.test_write()?;
        self.init_baseband()?;
        self.handle.set_i2c_repeater(true)?;

        let tuner_id = self.search_tuner();
        match tuner_id {
            Some(tid) => {
                info!("Got tuner ID {}", tid);
                self.tuner = self.make_tuner(tid)?;
            }
            None => {
                info!("No supported tuner found");
            }
        }
        // Use the RTL clock value by default
        self.tuner_xtal = self.xtal;
        if tuner_id.is_some() {
            self.tuner.set_xtal_freq(self.get_tuner_xtal_freq())?;

            // disable Zero-IF mode
            self.handle.demod_write_reg(1, 0xb1, 0x1a, 1)?;

            // only enable In-phase ADC input
            self.handle.demod_write_reg(0, 0x08, 0x4d, 1)?;

            // the R82XX use 3.57 MHz IF for the DVB-T 6 MHz mode, and
            // 4.57 MHz for the 8 MHz mode
            self.set_if_freq(R82XX_IF_FREQ)?;

            // enable spectrum inversion
            self.handle.demod_write_reg(1, 0x15, 0x01, 1)?;
        }

        // Hack to force the Bias T to always be on if we set the IR-Endpoint bit in the EEPROM to 0. Default on EEPROM is 1.
        let mut buf: [u8; EEPROM_SIZE] = [0; EEPROM_SIZE];
        self.handle.read_eeprom(&mut buf, 0, EEPROM_SIZE)?;
        self.force_bt = buf[7] & 0x02 == 0;
        // Hack to force direct sampling mode to always be on if we set the remote-enabled bit in the EEPROM to 1. Default on EEPROM is 0.
        self.force_ds = buf[7] & 0x01 != 0;

        if tuner_id.is_none() {
            // No supported tuner responded to any probe; fall back to
            // direct sampling rather than failing the whole device open.
            self.handle.set_i2c_repeater(false)?;
            self.set_direct_sampling(DirectSampleMode::On)?;
            info!("Init complete (direct sampling fallback)");
            return Ok(());
        }

        info!("Init tuner");
        self.tuner.init(&self.handle)?;

        // Finished Init
        self.handle.set_i2c_repeater(false)?;
        info!("Init complete");
        Ok(())
    }

    /// Swaps in a test double in place of the real tuner dispatch, bypassing
    /// USB probing. Used by `rtlsdr_test` and by the `tests/` integration
    /// suite, neither of which can probe a real tuner over a mock bus.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_tuner_for_test(&mut self, tuner: Box<dyn Tuner>) {
        self.tuner = tuner;
    }

    fn make_tuner(&self, tuner_id: &'static str) -> Result<Box<dyn Tuner>> {
        Ok(match tuner_id {
            TUNER_ID => Box::new(R820T::new_variant(Chip::R820T)),
            TUNER_ID_R828D => Box::new(R820T::new_variant(Chip::R828D)),
            crate::tuners::e4000::TUNER_ID => Box::new(E4000::new()),
            crate::tuners::fc0012::TUNER_ID => Box::new(Fc0012::new()),
            crate::tuners::fc0013::TUNER_ID => Box::new(Fc0013::new()),
            crate::tuners::fc2580::TUNER_ID => Box::new(Fc2580::new()),
            other => return Err(RtlsdrErr(format!("unrecognized tuner id: {}", other))),
        })
    }

    pub fn get_tuner_id(&self) -> Result<String> {
        Ok(self.tuner.get_info()?.id.to_string())
    }

    /// Probes the tuner's PLL lock bit. Only meaningful on R820T/R828D,
    /// which expose it on register 2; other tuners report
    /// `TunerUnsupported` through `get_i2c_register`'s default.
    pub fn pll_locked(&self) -> Result<bool> {
        self.handle.set_i2c_repeater(true)?;
        let reg = self.tuner.get_i2c_register(&self.handle, 0x02);
        self.handle.set_i2c_repeater(false)?;
        Ok(reg? & 0x40 != 0)
    }

    /// Raw I2C register access used by the TCP server's extended
    /// register-poke commands.
    pub fn set_tuner_i2c_register(&mut self, reg: u8, data: u8, mask: u8) -> Result<()> {
        self.handle.set_i2c_repeater(true)?;
        let res = self.tuner.set_i2c_register(&self.handle, reg, data, mask);
        self.handle.set_i2c_repeater(false)?;
        res
    }

    /// Like `set_tuner_i2c_register`, but reads the live chip state as the
    /// base value instead of the tuner's cached register shadow. Used by
    /// the TCP/UDP I2C override commands, distinct from the plain register
    /// write.
    pub fn set_tuner_i2c_override(&mut self, reg: u8, data: u8, mask: u8) -> Result<()> {
        self.handle.set_i2c_repeater(true)?;
        let res = self.tuner.set_i2c_override(&self.handle, reg, data, mask);
        self.handle.set_i2c_repeater(false)?;
        res
    }

    /// Raw I2C register read, used by the UDP controller's `g` command
    /// and to save/restore the filter register around retuning.
    pub fn get_tuner_i2c_register(&self, reg: u8) -> Result<u8> {
        self.handle.set_i2c_repeater(true)?;
        let res = self.tuner.get_i2c_register(&self.handle, reg);
        self.handle.set_i2c_repeater(false)?;
        res
    }

    pub fn get_tuner_gains(&self) -> Result<Vec<i32>> {
        self.tuner.get_gains()
    }

    // TunerGain has mode and gain, so this replaces rtlsdr_set_tuner_gain_mode
    pub fn set_tuner_gain(&mut self, gain: TunerGain) -> Result<()> {
        self.handle.set_i2c_repeater(true)?;
        self.tuner.set_gain(&self.handle, gain)?;
        self.handle.set_i2c_repeater(false)?;
        Ok(())
    }

    pub fn set_tuner_if_gain(&mut self, stage: u16, gain_tenths_db: i16) -> Result<()> {
        self.handle.set_i2c_repeater(true)?;
        let res = self.tuner.set_if_gain(&self.handle, stage, gain_tenths_db);
        self.handle.set_i2c_repeater(false)?;
        res
    }

    pub fn reset_buffer(&self) -> Result<()> {
        self.handle.write_reg(BLOCK_USB, USB_EPA_CTL, 0x1002, 2)?;
        self.handle.write_reg(BLOCK_USB, USB_EPA_CTL, 0x0000, 2)?;
        Ok(())
    }

    pub fn get_center_freq(&self) -> u32 {
        self.freq
    }

    pub fn set_center_freq(&mut self, freq: u32) -> Result<()> {
        if matches!(
            self.ds_policy,
            DirectSamplingPolicy::IBelowThreshold | DirectSamplingPolicy::QBelowThreshold
        ) {
            self.update_ds(freq)?;
        }
        if !matches!(self.direct_sampling, DirectSampleMode::Off) {
            self.set_if_freq(freq)?;
        } else {
            self.handle.set_i2c_repeater(true)?;
            self.tuner
                .set_freq(&self.handle, freq.saturating_sub(self.offset_freq))?;
            self.handle.set_i2c_repeater(false)?;
        }
        self.freq = freq;
        Ok(())
    }

    pub fn set_if_freq(&self, freq: u32) -> Result<()> {
        // Get corrected clock value - start with default
        let rtl_xtal: u32 = DEF_RTL_XTAL_FREQ;
        // Apply PPM correction
        let base = 1u32 << 22;
        let if_freq: i32 = (freq as f64 * base as f64 / rtl_xtal as f64 * -1f64) as i32;

        let tmp = ((if_freq >> 16) as u16) & 0x3f;
        self.handle.demod_write_reg(1, 0x19, tmp, 1)?;
        let tmp = ((if_freq >> 8) as u16) & 0xff;
        self.handle.demod_write_reg(1, 0x1a, tmp, 1)?;
        let tmp = if_freq as u16 & 0xff;
        self.handle.demod_write_reg(1, 0x1b, tmp, 1)?;
        Ok(())
    }

    pub fn get_freq_correction(&self) -> i32 {
        self.corr
    }

    pub fn set_freq_correction(&mut self, ppm: i32) -> Result<()> {
        if self.corr == ppm {
            return Ok(());
        }
        self.corr = ppm;
        self.set_sample_freq_correction(ppm)?;

        // Read corrected clock value into tuner
        self.tuner.set_xtal_freq(self.get_tuner_xtal_freq())?;

        // Retune to apply new correction value
        self.set_center_freq(self.freq)?;
        Ok(())
    }

    pub fn get_sample_rate(&self) -> u32 {
        self.rate
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        // Check if rate is supported by the resampler
        if rate <= 225_000 || rate > 3_200_000 || (rate > 300000 && rate <= 900000) {
            return Err(InvalidArgument(format!("Invalid sample rate: {} Hz", rate)));
        }

        // Compute exact sample rate
        let rsamp_ratio =
            ((self.xtal as u128 * 2_u128.pow(22) / rate as u128) & 0x0ffffffc) as u128;
        info!(
            "set_sample_rate: rate: {}, xtal: {}, rsamp_ratio: {}",
            rate, self.xtal, rsamp_ratio
        );
        let real_resamp_ratio = rsamp_ratio | ((rsamp_ratio & 0x08000000) << 1);
        info!("real_resamp_ratio: {}", real_resamp_ratio);
        let real_rate = (self.xtal as u128 * 2_u128.pow(22)) as f64 / real_resamp_ratio as f64;
        if rate as f64 != real_rate {
            info!("Exact sample rate is {} Hz", real_rate);
        }
        // Save exact rate
        self.rate = real_rate as u32;

        // Configure tuner
        self.handle.set_i2c_repeater(true)?;
        let val = if self.bw > 0 { self.bw } else { self.rate };
        self.tuner.set_bandwidth(&self.handle, val, self.rate)?;
        self.handle.set_i2c_repeater(false)?;
        if self.is_r82xx_tuner()? {
            self.set_if_freq(self.combined_if_freq()?)?;
            self.set_center_freq(self.freq)?;
        }

        let mut tmp: u16 = (rsamp_ratio >> 16) as u16;
        self.handle.demod_write_reg(1, 0x9f, tmp, 2)?;
        tmp = (rsamp_ratio & 0xffff) as u16;
        self.handle.demod_write_reg(1, 0xa1, tmp, 2)?;

        self.set_sample_freq_correction(self.corr)?;

        // Reset demod (bit 3, soft_rst)
        self.handle.demod_write_reg(1, 0x01, 0x14, 1)?;
        self.handle.demod_write_reg(1, 0x01, 0x10, 1)?;

        // Recalculate offset frequency if offset tuning is enabled
        if self.offset_freq != 0 {
            self.set_offset_tuning(true)?;
        }
        Ok(())
    }

    pub fn set_tuner_bandwidth(&mut self, mut bw: u32) -> Result<()> {
        bw = if bw > 0 { bw } else { self.rate };
        self.handle.set_i2c_repeater(true)?;
        let applied = self.tuner.set_bandwidth(&self.handle, bw, self.rate)?;
        self.handle.set_i2c_repeater(false)?;
        if self.is_r82xx_tuner()? {
            self.set_if_freq(self.combined_if_freq()?)?;
            self.set_center_freq(self.freq)?;
        }
        self.bw = applied;
        Ok(())
    }

    /// Shifts the R82XX IF center by a fixed offset, reapplied on top of
    /// whatever bandwidth setting last ran. Used to dodge spurs that land
    /// on the IF frequency a given bandwidth would otherwise pick.
    /// Unsupported on tuners other than R820T/R828D.
    pub fn set_tuner_band_center(&mut self, if_band_center: i32) -> Result<()> {
        self.handle.set_i2c_repeater(true)?;
        let result = self.tuner.set_bandwidth_center(&self.handle, if_band_center);
        self.handle.set_i2c_repeater(false)?;
        result?;
        self.if_band_center = if_band_center;
        self.set_if_freq(self.combined_if_freq()?)?;
        self.set_center_freq(self.freq)
    }

    fn combined_if_freq(&self) -> Result<u32> {
        Ok((self.tuner.get_if_freq()? as i32 + self.if_band_center) as u32)
    }

    pub fn set_testmode(&mut self, on: bool) -> Result<()> {
        match on {
            true => {
                self.handle.demod_write_reg(0, 0x19, 0x03, 1)?;
            }
            false => {
                self.handle.demod_write_reg(0, 0x19, 0x05, 1)?;
            }
        }
        Ok(())
    }

    pub fn set_direct_sampling(&mut self, mut mode: DirectSampleMode) -> Result<()> {
        if self.force_ds {
            mode = DirectSampleMode::OnSwap;
        }
        match mode {
            DirectSampleMode::On | DirectSampleMode::OnSwap => {
                self.handle.set_i2c_repeater(true)?;
                self.tuner.exit(&self.handle)?;
                self.handle.set_i2c_repeater(false)?;

                // Disable Zero-IF mode
                self.handle.demod_write_reg(1, 0xb1, 0x1a, 1)?;

                // Disable spectrum inversion
                self.handle.demod_write_reg(1, 0x15, 0x00, 1)?;

                // Only enable in-phase ADC input
                self.handle.demod_write_reg(0, 0x08, 0x4d, 1)?;

                // Check whether to swap I and Q ADC
                if matches!(mode, DirectSampleMode::OnSwap) {
                    self.handle.demod_write_reg(0, 0x06, 0x90, 1)?;
                    info!("Enabled direct sampling mode: ON (swapped)");
                } else {
                    self.handle.demod_write_reg(0, 0x06, 0x80, 1)?;
                    info!("Enabled direct sampling mode: ON");
                }
                self.direct_sampling = mode;
            }
            DirectSampleMode::Off => {
                self.handle.set_i2c_repeater(true)?;
                self.tuner.init(&self.handle)?;
                self.handle.set_i2c_repeater(false)?;

                if !self.is_r82xx_tuner()? {
                    self.set_if_freq(0)?;

                    // Enable in-phase + Quadrature ADC input
                    self.handle.demod_write_reg(0, 0x08, 0xcd, 1)?;

                    // Enable Zero-IF mode
                    self.handle.demod_write_reg(1, 0xb1, 0x1b, 1)?;
                }
                // opt_adc_iq = 0, default ADC_I/ADC_Q datapath
                self.handle.demod_write_reg(0, 0x06, 0x80, 1)?;
                info!("Disabled direct sampling mode");
                self.direct_sampling = DirectSampleMode::Off;
            }
        }
        self.set_center_freq(self.freq)?;
        Ok(())
    }

    /// Configures the direct-sampling policy and (re)tunes to pick it up.
    /// `freq_threshold` of `0` falls back to a per-tuner default, since
    /// "below what frequency" only makes sense relative to the bound
    /// tuner's usable range.
    pub fn set_ds_mode(&mut self, mode: DirectSamplingPolicy, freq_threshold: u32) -> Result<()> {
        if self.freq == 0 {
            return Err(StateViolation(
                "cannot configure direct-sampling policy before a center frequency has been set"
                    .to_string(),
            ));
        }

        self.ds_threshold = if freq_threshold == 0 {
            self.default_ds_threshold()?
        } else {
            freq_threshold
        };
        self.ds_policy = mode;

        match mode {
            DirectSamplingPolicy::Iq => self.set_direct_sampling(DirectSampleMode::Off)?,
            DirectSamplingPolicy::I => self.set_direct_sampling(DirectSampleMode::On)?,
            DirectSamplingPolicy::Q => self.set_direct_sampling(DirectSampleMode::OnSwap)?,
            DirectSamplingPolicy::IBelowThreshold | DirectSamplingPolicy::QBelowThreshold => {}
        }

        self.set_center_freq(self.freq)
    }

    fn default_ds_threshold(&self) -> Result<u32> {
        Ok(match self.tuner.get_info()?.id {
            crate::tuners::e4000::TUNER_ID => 50_000_000,
            TUNER_ID => 24_000_000,
            _ => 28_800_000,
        })
    }

    /// Re-evaluates the `BelowThreshold` policies against `freq` and
    /// applies the raw direct-sampling register if the decision changed.
    fn update_ds(&mut self, freq: u32) -> Result<()> {
        let wanted = match self.ds_policy {
            DirectSamplingPolicy::Iq => DirectSampleMode::Off,
            DirectSamplingPolicy::I => DirectSampleMode::On,
            DirectSamplingPolicy::Q => DirectSampleMode::OnSwap,
            DirectSamplingPolicy::IBelowThreshold => {
                if freq < self.ds_threshold {
                    DirectSampleMode::On
                } else {
                    DirectSampleMode::Off
                }
            }
            DirectSamplingPolicy::QBelowThreshold => {
                if freq < self.ds_threshold {
                    DirectSampleMode::OnSwap
                } else {
                    DirectSampleMode::Off
                }
            }
        };
        if wanted != self.direct_sampling {
            self.set_direct_sampling(wanted)?;
        }
        Ok(())
    }

    fn is_r82xx_tuner(&self) -> Result<bool> {
        let id = self.tuner.get_info()?.id;
        Ok(id == TUNER_ID || id == TUNER_ID_R828D)
    }

    /// Offsets the tuner's local oscillator away from the requested center
    /// frequency and shifts the IF digitally in software, avoiding the DC
    /// spike Zero-IF tuners otherwise leave at the center of the spectrum.
    /// Not supported on R820T/R828D, which don't need it (they already
    /// tune with a nonzero IF), and not combinable with direct sampling.
    pub fn set_offset_tuning(&mut self, enable: bool) -> Result<()> {
        if self.is_r82xx_tuner()? {
            return Err(TunerUnsupported(
                "offset tuning is not supported with the R820T/R828D tuner".to_string(),
            ));
        }
        if !matches!(self.direct_sampling, DirectSampleMode::Off) {
            return Err(StateViolation(
                "offset tuning cannot be combined with direct sampling".to_string(),
            ));
        }

        self.offset_freq = if enable {
            ((self.rate as f64 / 2.0) * 1.7) as u32
        } else {
            0
        };
        self.set_if_freq(self.offset_freq)?;

        if enable {
            self.handle.set_i2c_repeater(true)?;
            self.tuner
                .set_bandwidth(&self.handle, 2 * self.offset_freq, self.rate)?;
            self.handle.set_i2c_repeater(false)?;
        }

        self.set_center_freq(self.freq)?;
        Ok(())
    }

    pub fn set_bias_tee(&self, on: bool) -> Result<()> {
        self.set_gpio(0, on)
    }

    #[allow(dead_code)]
    pub fn get_xtal_freq(&self) -> u32 {
        (self.xtal as f32 * (1.0 + self.ppm_correction as f32 / 1e6)) as u32
    }

    pub fn get_tuner_xtal_freq(&self) -> u32 {
        (self.tuner_xtal as f32 * (1.0 + self.ppm_correction as f32 / 1e6)) as u32
    }

    #[allow(dead_code)]
    pub fn set_xtal_freq(&mut self, rtl_freq: u32, tuner_freq: u32) -> Result<()> {
        if rtl_freq > 0 && (rtl_freq < MIN_RTL_XTAL_FREQ || rtl_freq > MAX_RTL_XTAL_FREQ) {
            return Err(RtlsdrErr(format!(
                "set_xtal_freq error: rtl_freq {} out of bounds",
                rtl_freq
            )));
        }
        if rtl_freq > 0 && self.xtal != rtl_freq {
            self.xtal = rtl_freq;

            // Update xtal-dependent settings
            if self.rate != 0 {
                self.set_sample_rate(self.rate)?;
            }
        }

        if self.tuner.get_xtal_freq()? != tuner_freq {
            if tuner_freq == 0 {
                self.tuner_xtal = self.xtal;
            } else {
                self.tuner_xtal = tuner_freq;
            }

            // Read corrected clock value into tuner
            self.tuner.set_xtal_freq(self.get_tuner_xtal_freq())?;

            // Update xtal-dependent settings
            if self.freq != 0 {
                self.set_center_freq(self.freq)?;
            }
        }
        Ok(())
    }

    pub fn read_sync(&self, buf: &mut [u8]) -> Result<usize> {
        self.handle.bulk_transfer(buf)
    }

    pub(crate) fn device(&self) -> &Device {
        &self.handle
    }

    fn init_baseband(&self) -> Result<()> {
        // Init baseband
        self.handle.write_reg(BLOCK_USB, USB_SYSCTL, 0x09, 1)?;
        self.handle
            .write_reg(BLOCK_USB, USB_EPA_MAXPKT, 0x0002, 2)?;
        self.handle.write_reg(BLOCK_USB, USB_EPA_CTL, 0x1002, 2)?;

        // Power-on demod
        self.handle.write_reg(BLOCK_SYS, DEMOD_CTL_1, 0x22, 1)?;
        self.handle.write_reg(BLOCK_SYS, DEMOD_CTL, 0xe8, 1)?;

        // Reset demod (bit 3, soft_rst)
        self.handle.reset_demod()?;

        // Disable spectrum inversion and adjust channel rejection
        self.handle.demod_write_reg(1, 0x15, 0x00, 1)?;
        self.handle.demod_write_reg(1, 0x16, 0x00, 2)?;

        // Clear DDC shift and IF registers
        for i in 0..5 {
            self.handle.demod_write_reg(1, 0x16 + i, 0x00, 1)?;
        }
        self.set_fir(DEFAULT_FIR)?;

        // Enable SDR mode, disable DAGC (bit 5)
        self.handle.demod_write_reg(0, 0x19, 0x05, 1)?;

        // Init FSM state-holding register
        self.handle.demod_write_reg(1, 0x93, 0xf0, 1)?;
        self.handle.demod_write_reg(1, 0x94, 0x0f, 1)?;

        // Disable AGC (en_dagc, bit 0) (seems to have no effect)
        self.handle.demod_write_reg(1, 0x11, 0x00, 1)?;

        // Disable RF and IF AGC loop
        self.handle.demod_write_reg(1, 0x04, 0x00, 1)?;

        // Disable PID filter
        self.handle.demod_write_reg(0, 0x61, 0x60, 1)?;

        // opt_adc_iq = 0, default ADC_I/ADC_Q datapath
        self.handle.demod_write_reg(0, 0x06, 0x80, 1)?;

        // Enable Zero-IF mode, DC cancellation, and IQ estimation/compensation
        self.handle.demod_write_reg(1, 0xb1, 0x1b, 1)?;

        // Disable 4.096 MHz clock output on pin TP_CK0
        self.handle.demod_write_reg(0, 0x0d, 0x83, 1)?;

        Ok(())
    }

    pub fn deinit_baseband(&mut self) -> Result<()> {
        // Deinitialize tuner
        self.handle.set_i2c_repeater(true)?;
        self.tuner.exit(&self.handle)?;
        self.handle.set_i2c_repeater(false)?;

        // Power-off demodulator and ADCs
        self.handle.write_reg(BLOCK_SYS, DEMOD_CTL, 0x20, 1)?;
        Ok(())
    }

    fn set_sample_freq_correction(&self, ppm: i32) -> Result<()> {
        let offs = (ppm * (-1) * 2_i32.pow(24) / 1_000_000) as i16;
        self.handle
            .demod_write_reg(1, 0x3f, (offs & 0xff) as u16, 1)?;
        self.handle
            .demod_write_reg(1, 0x3e, ((offs >> 8) & 0x3f) as u16, 1)?;
        Ok(())
    }

    fn set_gpio(&self, gpio_pin: u8, mut on: bool) -> Result<()> {
        // If force_bt is on from the EEPROM, do not allow bias tee to turn off
        if self.force_bt {
            on = true;
        }
        self.handle.set_gpio_output(gpio_pin)?;
        self.handle.set_gpio_bit(gpio_pin, on)
    }

    pub fn set_fir(&self, fir: &[i32; FIR_LEN]) -> Result<()> {
        const TMP_LEN: usize = 20;
        let mut tmp: [u8; TMP_LEN] = [0; TMP_LEN];
        // First 8 values are i8
        for i in 0..8 {
            let val = fir[i];
            if val < -128 || val > 127 {
                return Err(InvalidArgument(format!("i8 FIR coefficient out of bounds: {}", val)));
            }
            tmp[i] = val as u8;
        }
        // Next 12 are i12, so don't line up with byte boundaries and need to unpack
        // 12 i12 values from 4 pairs of bytes in fir. Example:
        // fir: 4b5, 7f8, 3e8, 619
        // tmp: 4b, 57, f8, 3e, 86, 19
        for i in (0..8).step_by(2) {
            let val0 = fir[8 + i];
            let val1 = fir[8 + i + 1];
            if val0 < -2048 || val0 > 2047 {
                return Err(InvalidArgument(format!("i12 FIR coefficient out of bounds: {}", val0)));
            } else if val1 < -2048 || val1 > 2047 {
                return Err(InvalidArgument(format!("i12 FIR coefficient out of bounds: {}", val1)));
            }
            tmp[8 + i * 3 / 2] = (val0 >> 4) as u8;
            tmp[8 + i * 3 / 2 + 1] = ((val0 << 4) | ((val1 >> 8) & 0x0f)) as u8;
            tmp[8 + i * 3 / 2 + 2] = val1 as u8;
        }

        for i in 0..TMP_LEN {
            self.handle
                .demod_write_reg(1, 0x1c + i as u16, tmp[i] as u16, 1)?;
        }
        Ok(())
    }

    /// Probes for a tuner chip in the order the baseband engine actually
    /// checks them in: E4000, FC0013, R820T, R828D directly, then a GPIO
    /// pin-4 reset pulse, then FC2580 (masked check byte) and FC0012. Not a
    /// plain iteration over `KNOWN_TUNERS` because the GPIO reset and the
    /// FC2580 mask only apply partway through the sequence.
    fn search_tuner(&self) -> Option<&'static str> {
        for tuner_info in &KNOWN_TUNERS[0..4] {
            if self.probe_tuner(tuner_info) {
                return Some(tuner_info.id);
            }
        }

        // Reset the analog front end before probing the two tuners that
        // need it settled: a high-then-low pulse on GPIO pin 4.
        if let Err(e) = self.handle.set_gpio_output(4) {
            error!("failed to configure GPIO pin 4 for tuner reset: {}", e);
        }
        if let Err(e) = self.handle.set_gpio_bit(4, true) {
            error!("failed to pulse GPIO pin 4 high: {}", e);
        }
        if let Err(e) = self.handle.set_gpio_bit(4, false) {
            error!("failed to pulse GPIO pin 4 low: {}", e);
        }

        let fc2580 = &KNOWN_TUNERS[4];
        if self.probe_tuner(fc2580) {
            return Some(fc2580.id);
        }

        let fc0012 = &KNOWN_TUNERS[5];
        if self.probe_tuner(fc0012) {
            if let Err(e) = self.handle.set_gpio_output(6) {
                error!("failed to configure GPIO pin 6 for the FC0012: {}", e);
            }
            return Some(fc0012.id);
        }

        None
    }

    fn probe_tuner(&self, tuner_info: &TunerInfo) -> bool {
        info!(
            "Probing I2C address {:#02x} checking address {:#02x}",
            tuner_info.i2c_addr, tuner_info.check_addr
        );
        match self
            .handle
            .i2c_read_reg(tuner_info.i2c_addr, tuner_info.check_addr)
        {
            Ok(val) => val & tuner_info.mask == tuner_info.check_val,
            Err(e) => {
                error!("Reading failed, continuing. Err: {}", e);
                false
            }
        }
    }
}
