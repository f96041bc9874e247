// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex};

use crate::device::mock_device_handle::MockDeviceHandle;
use crate::device::Device;
use crate::error::RtlsdrError;
use crate::tuners::{Tuner, TunerGain, TunerInfo};

use super::*;

/// Dummy tuner double: not an R820T/R828D, so the resampler's r82xx
/// retune branch is skipped, and every call just records its argument.
#[derive(Debug, Default)]
struct FakeTuner;

impl Tuner for FakeTuner {
    fn init(&mut self, _handle: &Device) -> Result<()> {
        Ok(())
    }
    fn exit(&mut self, _handle: &Device) -> Result<()> {
        Ok(())
    }
    fn get_info(&self) -> Result<TunerInfo> {
        Ok(TunerInfo {
            id: "fake",
            name: "Fake Tuner",
            i2c_addr: 0,
            check_addr: 0,
            check_val: 0,
        })
    }
    fn set_freq(&mut self, _handle: &Device, _freq: u32) -> Result<()> {
        Ok(())
    }
    fn set_bandwidth(&mut self, _handle: &Device, bw: u32, _rate: u32) -> Result<u32> {
        Ok(bw)
    }
    fn set_gain(&mut self, _handle: &Device, _gain: TunerGain) -> Result<()> {
        Ok(())
    }
    fn get_gains(&self) -> Result<Vec<i32>> {
        Ok(vec![0, 90, 190])
    }
    fn get_if_freq(&self) -> Result<u32> {
        Ok(0)
    }
    fn get_xtal_freq(&self) -> Result<u32> {
        Ok(DEF_RTL_XTAL_FREQ)
    }
    fn set_xtal_freq(&mut self, _freq: u32) -> Result<()> {
        Ok(())
    }
}

/// Vendor control transfers that always succeed and echo back zeroed data.
/// Good enough for paths that don't care what the device returns.
fn permissive_mock() -> MockDeviceHandle {
    let mut mock = MockDeviceHandle::new();
    mock.expect_write_control()
        .returning(|_, _, _, _, data, _| Ok(data.len()));
    mock.expect_read_control().returning(|_, _, _, _, data, _| {
        if let Some(byte) = data.first_mut() {
            *byte = 0;
        }
        Ok(data.len().max(1))
    });
    mock
}

fn build_sdr_with_fake_tuner() -> RtlSdr {
    let device = Device::for_test(permissive_mock());
    let mut sdr = RtlSdr::new(device);
    sdr.set_tuner_for_test(Box::new(FakeTuner));
    sdr
}

#[test]
fn set_sample_rate_quantizes_within_tolerance() {
    let mut sdr = build_sdr_with_fake_tuner();
    let requested = 2_048_000u32;
    sdr.set_sample_rate(requested).unwrap();
    let actual = sdr.get_sample_rate();
    let delta = (actual as i64 - requested as i64).abs();
    assert!(
        delta <= 32_000,
        "quantized rate {} too far from requested {}",
        actual,
        requested
    );
}

#[test]
fn set_sample_rate_rejects_unsupported_gap() {
    let mut sdr = build_sdr_with_fake_tuner();
    let err = sdr.set_sample_rate(500_000).unwrap_err();
    assert!(matches!(err, RtlsdrError::InvalidArgument(_)));
}

#[test]
fn set_sample_rate_rejects_too_low() {
    let mut sdr = build_sdr_with_fake_tuner();
    let err = sdr.set_sample_rate(200_000).unwrap_err();
    assert!(matches!(err, RtlsdrError::InvalidArgument(_)));
}

#[test]
fn set_center_freq_succeeds_with_bound_tuner() {
    let mut sdr = build_sdr_with_fake_tuner();
    sdr.set_center_freq(100_000_000).unwrap();
    assert_eq!(sdr.get_center_freq(), 100_000_000);
}

#[test]
fn set_center_freq_fails_without_a_bound_tuner() {
    let device = Device::for_test(permissive_mock());
    let mut sdr = RtlSdr::new(device);
    let err = sdr.set_center_freq(100_000_000).unwrap_err();
    assert!(matches!(err, RtlsdrError::StateViolation(_)));
}

#[test]
fn set_fir_packs_i8_and_i12_coefficients() {
    let mut fir = [0i32; FIR_LEN];
    fir[8] = 0x4b5;
    fir[9] = 0x7f8;
    fir[10] = 0x3e8;
    fir[11] = 0x619;

    let captured = Arc::new(Mutex::new(Vec::new()));
    let captured_writer = captured.clone();
    let mut mock = MockDeviceHandle::new();
    mock.expect_write_control()
        .returning(move |_, _, _, _, data, _| {
            captured_writer.lock().unwrap().push(data[0]);
            Ok(data.len())
        });
    mock.expect_read_control().returning(|_, _, _, _, data, _| {
        data[0] = 0;
        Ok(1)
    });

    let device = Device::for_test(mock);
    let sdr = RtlSdr::new(device);
    sdr.set_fir(&fir).unwrap();

    let mut expected = vec![0u8; 8];
    expected.extend_from_slice(&[0x4b, 0x57, 0xf8, 0x3e, 0x86, 0x19]);
    expected.extend_from_slice(&[0u8; 6]);
    assert_eq!(*captured.lock().unwrap(), expected);
}

#[test]
fn set_fir_rejects_out_of_range_i8_coefficient_without_touching_device() {
    let sdr = RtlSdr::new(Device::for_test(MockDeviceHandle::new()));
    let mut fir = [0i32; FIR_LEN];
    fir[0] = 128;
    let err = sdr.set_fir(&fir).unwrap_err();
    assert!(matches!(err, RtlsdrError::InvalidArgument(_)));
}

#[test]
fn set_fir_rejects_out_of_range_i12_coefficient_without_touching_device() {
    let sdr = RtlSdr::new(Device::for_test(MockDeviceHandle::new()));
    let mut fir = [0i32; FIR_LEN];
    fir[8] = 2048;
    let err = sdr.set_fir(&fir).unwrap_err();
    assert!(matches!(err, RtlsdrError::InvalidArgument(_)));
}
