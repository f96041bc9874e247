// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives `server::tcp::serve_client` over a real loopback socket against a
//! mock device/tuner, exercising the handshake and command decoding paths
//! without any physical dongle attached.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtl_sdr_server::agc::SoftAgc;
use rtl_sdr_server::device::mock_device_handle::MockDeviceHandle;
use rtl_sdr_server::device::Device;
use rtl_sdr_server::error::Result;
use rtl_sdr_server::server::tcp::{serve_client, TcpServerConfig};
use rtl_sdr_server::tuners::{Tuner, TunerGain, TunerInfo};
use rtl_sdr_server::RtlSdr;

/// Stands in for an R820T: reports the right tuner id for the banner's
/// `tuner_type` field and records the last frequency it was asked to tune.
#[derive(Debug)]
struct FakeR820T {
    last_freq: Arc<Mutex<Option<u32>>>,
}

impl Tuner for FakeR820T {
    fn init(&mut self, _handle: &Device) -> Result<()> {
        Ok(())
    }
    fn exit(&mut self, _handle: &Device) -> Result<()> {
        Ok(())
    }
    fn get_info(&self) -> Result<TunerInfo> {
        Ok(TunerInfo {
            id: "r820t",
            name: "R820T",
            i2c_addr: 0x34,
            check_addr: 0,
            check_val: 0,
        })
    }
    fn set_freq(&mut self, _handle: &Device, freq: u32) -> Result<()> {
        *self.last_freq.lock().unwrap() = Some(freq);
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
        Ok(3_570_000)
    }
    fn get_xtal_freq(&self) -> Result<u32> {
        Ok(28_800_000)
    }
    fn set_xtal_freq(&mut self, _freq: u32) -> Result<()> {
        Ok(())
    }
}

/// Vendor transfers succeed and echo zeros; bulk reads hand back a filled
/// buffer on a slow drip so the producer loop doesn't spin hot while the
/// test is exercising the command channel.
fn mock_device() -> MockDeviceHandle {
    let mut mock = MockDeviceHandle::new();
    mock.expect_write_control()
        .returning(|_, _, _, _, data, _| Ok(data.len()));
    mock.expect_read_control().returning(|_, _, _, _, data, _| {
        if let Some(byte) = data.first_mut() {
            *byte = 0;
        }
        Ok(data.len().max(1))
    });
    mock.expect_read_bulk().returning(|_, buf, _| {
        thread::sleep(Duration::from_millis(5));
        for b in buf.iter_mut() {
            *b = 0;
        }
        Ok(buf.len())
    });
    mock
}

#[test]
fn banner_and_frequency_command_round_trip() {
    let device = Device::for_test(mock_device());
    let mut sdr = RtlSdr::new(device);
    let last_freq = Arc::new(Mutex::new(None));
    sdr.set_tuner_for_test(Box::new(FakeR820T {
        last_freq: last_freq.clone(),
    }));
    let sdr = Arc::new(Mutex::new(sdr));

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let config = TcpServerConfig::default();
    let agc: Arc<Mutex<Option<SoftAgc>>> = Arc::new(Mutex::new(None));
    let shutdown = Arc::new(AtomicBool::new(false));

    let server_sdr = sdr.clone();
    let server_agc = agc.clone();
    let server_shutdown = shutdown.clone();
    let server_handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_client(server_sdr, stream, &config, server_agc, server_shutdown)
    });

    let mut client = TcpStream::connect(addr).unwrap();

    // S1: the handshake is "RTL0" + tuner_type (r820t = 5) + gain count.
    let mut banner = [0u8; 12];
    client.read_exact(&mut banner).unwrap();
    assert_eq!(&banner[0..4], b"RTL0");
    assert_eq!(u32::from_be_bytes(banner[4..8].try_into().unwrap()), 5);
    assert_eq!(u32::from_be_bytes(banner[8..12].try_into().unwrap()), 3);

    // S2: a SET_FREQUENCY frame (code 0x01, 100,000,000 Hz) reaches the tuner.
    let frame = [0x01, 0x05, 0xf5, 0xe1, 0x00];
    client.write_all(&frame).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if *last_freq.lock().unwrap() == Some(100_000_000) {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "frequency command was never applied"
        );
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sdr.lock().unwrap().get_center_freq(), 100_000_000);

    drop(client);
    let _ = server_handle.join();
}
