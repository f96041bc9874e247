// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command frame decoding for the TCP control channel. Generalizes the
//! teaching example's `ControlMessage` enum (codes 0x01-0x0e only) to
//! the full command set, including the i2c/IF/GPIO/PLL-lock/dithering
//! extensions. Unknown codes are reported as `Command::Unknown` so the
//! caller can log and ignore them, per spec.

/// A decoded five-byte command frame: `[u8 cmd][u32 param be]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetFrequency(u32),
    SetSampleRate(u32),
    SetGainMode(bool),
    SetGain(i32),
    SetFreqCorrection(i32),
    SetIfStageGain { stage: u16, gain_tenths_db: i16 },
    SetTestMode(bool),
    SetAgcMode(bool),
    SetDirectSampling(u32),
    SetOffsetTuning(bool),
    SetRtlXtal(u32),
    SetTunerXtal(u32),
    SetGainByIndex(u32),
    SetBiasTee(bool),
    SetTunerBandwidth(u32),
    SetFreqHi32(u32),
    SetI2cTunerRegister(u32),
    SetI2cTunerOverride(u32),
    SetTunerBwIfCenter(i32),
    SetTunerIfMode(u32),
    SetSideband(bool),
    ReportI2cRegs(bool),
    GpioSetOutputMode(u32),
    GpioSetInputMode(u32),
    GpioGetIoStatus,
    GpioWritePin { pin: u8, on: bool },
    GpioReadPin(u8),
    GpioGetByte,
    IsTunerPllLocked,
    SetDithering(bool),
    UdpTerminate,
    Unknown(u8, u32),
}

/// `freq_hi32 << 32 | freq_lo32` is only assembled once both halves have
/// arrived, matching spec §4.6's "combined with prior SET_FREQ_HI32 if
/// present". `FrameDecoder` carries that one byte of state across calls.
/// `set_center_freq` only accepts a `u32`, so a nonzero high word
/// saturates to `u32::MAX` rather than wrapping.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending_freq_hi32: Option<u32>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    pub fn decode(&mut self, frame: &[u8; 5]) -> Command {
        let cmd = frame[0];
        let param_bytes = [frame[1], frame[2], frame[3], frame[4]];
        let param_u32 = u32::from_be_bytes(param_bytes);
        let param_i32 = i32::from_be_bytes(param_bytes);

        match cmd {
            0x01 => {
                let freq = match self.pending_freq_hi32.take() {
                    Some(hi) => {
                        let combined = (hi as u64) << 32 | param_u32 as u64;
                        combined.min(u32::MAX as u64) as u32
                    }
                    None => param_u32,
                };
                Command::SetFrequency(freq)
            }
            0x02 => Command::SetSampleRate(param_u32),
            0x03 => Command::SetGainMode(param_u32 != 0),
            0x04 => Command::SetGain(param_i32),
            0x05 => Command::SetFreqCorrection(param_i32),
            0x06 => Command::SetIfStageGain {
                stage: (param_u32 >> 16) as u16,
                gain_tenths_db: (param_u32 & 0xffff) as i16,
            },
            0x07 => Command::SetTestMode(param_u32 != 0),
            0x08 => Command::SetAgcMode(param_u32 != 0),
            0x09 => Command::SetDirectSampling(param_u32),
            0x0a => Command::SetOffsetTuning(param_u32 != 0),
            0x0b => Command::SetRtlXtal(param_u32),
            0x0c => Command::SetTunerXtal(param_u32),
            0x0d => Command::SetGainByIndex(param_u32),
            0x0e => Command::SetBiasTee(param_u32 != 0),
            0x0f => Command::SetTunerBandwidth(param_u32),
            0x10 => {
                self.pending_freq_hi32 = Some(param_u32);
                Command::SetFreqHi32(param_u32)
            }
            0x11 => Command::SetI2cTunerRegister(param_u32),
            0x12 => Command::SetI2cTunerOverride(param_u32),
            0x13 => Command::SetTunerBwIfCenter(param_i32),
            0x14 => Command::SetTunerIfMode(param_u32),
            0x15 => Command::SetSideband(param_u32 != 0),
            0x16 => Command::ReportI2cRegs(param_u32 != 0),
            0x17 => Command::GpioSetOutputMode(param_u32),
            0x18 => Command::GpioSetInputMode(param_u32),
            0x19 => Command::GpioGetIoStatus,
            0x1a => Command::GpioWritePin {
                pin: (param_u32 >> 8) as u8,
                on: (param_u32 & 0xff) != 0,
            },
            0x1b => Command::GpioReadPin(param_u32 as u8),
            0x1c => Command::GpioGetByte,
            0x1d => Command::IsTunerPllLocked,
            0x1e => Command::SetDithering(param_u32 != 0),
            0x1f => Command::UdpTerminate,
            other => Command::Unknown(other, param_u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_set_frequency() {
        let mut decoder = FrameDecoder::new();
        let frame = [0x01, 0x05, 0xf5, 0xe1, 0x00];
        assert_eq!(decoder.decode(&frame), Command::SetFrequency(100_000_000));
    }

    #[test]
    fn freq_hi32_saturates_the_u32_frequency() {
        let mut decoder = FrameDecoder::new();
        let hi = [0x10, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(decoder.decode(&hi), Command::SetFreqHi32(1));
        let lo = [0x01, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decoder.decode(&lo), Command::SetFrequency(u32::MAX));
    }

    #[test]
    fn no_pending_hi32_leaves_frequency_unchanged() {
        let mut decoder = FrameDecoder::new();
        let frame = [0x01, 0x00, 0x00, 0x00, 0x64];
        assert_eq!(decoder.decode(&frame), Command::SetFrequency(100));
    }

    #[test]
    fn unknown_command_code_is_reported_not_panicked() {
        let mut decoder = FrameDecoder::new();
        let frame = [0xfe, 0, 0, 0, 7];
        assert_eq!(decoder.decode(&frame), Command::Unknown(0xfe, 7));
    }

    #[test]
    fn decodes_if_stage_gain_split_fields() {
        let mut decoder = FrameDecoder::new();
        let param: u32 = (2u32 << 16) | (0xfffbu32 & 0xffff); // stage 2, gain -5 (tenths dB)
        let frame = [0x06, (param >> 24) as u8, (param >> 16) as u8, (param >> 8) as u8, param as u8];
        assert_eq!(
            decoder.decode(&frame),
            Command::SetIfStageGain {
                stage: 2,
                gain_tenths_db: -5
            }
        );
    }
}
