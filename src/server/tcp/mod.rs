// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP streaming server: single-client, single-session, with an
//! oldest-drop backpressure policy (`queue`) and the full `rtl_tcp`
//! command set (`command`).

pub mod command;
pub mod queue;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use command::{Command, FrameDecoder};
use queue::SampleQueue;

use crate::agc::{self, AgcMode, SoftAgc};
use crate::tuners::TunerGain;
use crate::DirectSampleMode;
use crate::{RtlSdr, DEFAULT_BUF_LENGTH};

const COMMAND_READ_TIMEOUT: Duration = Duration::from_secs(1);
const PLL_CHECK_AFTER_TIMEOUTS: u32 = 3;

pub struct TcpServerConfig {
    pub queue_capacity: usize,
    /// How long the consumer thread will wait for a buffer before tearing
    /// down the session. Spec keeps this at 1s; exposed as a field rather
    /// than a literal per DESIGN.md's Open Question resolution.
    pub consumer_idle_timeout: Duration,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        TcpServerConfig {
            queue_capacity: 500,
            consumer_idle_timeout: Duration::from_secs(1),
        }
    }
}

/// Maps a probed tuner id onto the banner's `tuner_type` field, using the
/// numbering `rtl_tcp` clients already expect.
fn tuner_type_code(tuner_id: &str) -> u32 {
    match tuner_id {
        "e4000" => 1,
        "fc0012" => 2,
        "fc0013" => 3,
        "fc2580" => 4,
        "r820t" => 5,
        "r828d" => 6,
        _ => 0,
    }
}

fn send_handshake(stream: &mut TcpStream, tuner_type: u32, gain_count: u32) -> io::Result<()> {
    let mut payload = [0u8; 12];
    payload[0..4].copy_from_slice(b"RTL0");
    payload[4..8].copy_from_slice(&tuner_type.to_be_bytes());
    payload[8..12].copy_from_slice(&gain_count.to_be_bytes());
    stream.write_all(&payload)
}

/// Runs one client session to completion: banner, producer/consumer/
/// command threads, then teardown. The device is shared (not owned)
/// because the soft-AGC worker spawned by `SetAgcMode` and an optional
/// `server::udp::UdpController` may need to reach it concurrently with
/// this session, exactly as the UDP controller already shares it.
pub fn serve_client(
    sdr: Arc<Mutex<RtlSdr>>,
    mut stream: TcpStream,
    config: &TcpServerConfig,
    agc: Arc<Mutex<Option<SoftAgc>>>,
    global_shutdown: Arc<AtomicBool>,
) -> Option<String> {
    let gains = match sdr.lock().unwrap().get_tuner_gains() {
        Ok(g) => g,
        Err(e) => return Some(format!("failed to query tuner gains: {}", e)),
    };
    let tuner_type = sdr
        .lock()
        .unwrap()
        .get_tuner_id()
        .map(|id| tuner_type_code(&id))
        .unwrap_or(0);
    if let Err(e) = send_handshake(&mut stream, tuner_type, gains.len() as u32) {
        return Some(format!("failed to send handshake: {}", e));
    }

    let queue = Arc::new(SampleQueue::new(config.queue_capacity.max(1)));
    let stop = Arc::new(AtomicBool::new(false));

    let sender_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => return Some(format!("failed to clone stream for sender: {}", e)),
    };
    let sender_queue = queue.clone();
    let sender_stop = stop.clone();
    let sender_shutdown = global_shutdown.clone();
    let idle_timeout = config.consumer_idle_timeout;
    let sender_handle = thread::spawn(move || {
        sender_loop(sender_stream, sender_queue, sender_stop, sender_shutdown, idle_timeout)
    });

    let command_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            stop.store(true, Ordering::SeqCst);
            let _ = sender_handle.join();
            return Some(format!("failed to clone stream for commands: {}", e));
        }
    };
    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<Command>();
    let cmd_stop = stop.clone();
    let cmd_shutdown = global_shutdown.clone();
    let command_handle =
        thread::spawn(move || command_loop(command_stream, cmd_tx, cmd_stop, cmd_shutdown));

    drop(stream);

    let mut outcome_error: Option<String> = None;
    let mut gain_values = gains;
    'producer: loop {
        if stop.load(Ordering::Relaxed) || global_shutdown.load(Ordering::Relaxed) {
            break;
        }
        for message in cmd_rx.try_iter() {
            match apply_command(&sdr, message, &mut gain_values, &agc) {
                Ok(ShouldStop::Continue) => {}
                Ok(ShouldStop::Stop) => {
                    stop.store(true, Ordering::SeqCst);
                    break 'producer;
                }
                Err(e) => {
                    outcome_error = Some(e);
                    stop.store(true, Ordering::SeqCst);
                    break 'producer;
                }
            }
        }

        let mut buf = vec![0u8; DEFAULT_BUF_LENGTH];
        let read_result = sdr.lock().unwrap().read_sync(&mut buf);
        match read_result {
            Ok(0) => {
                outcome_error = Some("device returned zero bytes".to_string());
                stop.store(true, Ordering::SeqCst);
                break;
            }
            Ok(n) => {
                buf.truncate(n);
                let deliver = match agc.lock().unwrap().as_ref() {
                    Some(a) => a.classify(&buf),
                    None => true,
                };
                if deliver {
                    queue.push(buf);
                }
            }
            Err(e) => {
                outcome_error = Some(format!("read error: {}", e));
                stop.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    let sender_result = sender_handle.join().unwrap_or_else(|_| Err("sender thread panicked".to_string()));
    let command_result = command_handle.join().unwrap_or_else(|_| Err("command thread panicked".to_string()));

    let mut errors = Vec::new();
    if let Err(e) = sender_result {
        errors.push(e);
    }
    if let Err(e) = command_result {
        errors.push(e);
    }
    if let Some(e) = outcome_error {
        errors.push(e);
    }

    if errors.is_empty() { None } else { Some(errors.join(", ")) }
}

enum ShouldStop {
    Continue,
    Stop,
}

/// Re-triggers the soft AGC's descent after a retune-like command, per the
/// re-trigger points spec §4.5 lists (center-frequency, IF gain, bandwidth,
/// bias-tee, sample-rate changes all potentially invalidate the current
/// gain choice).
fn reactivate_agc(agc: &Mutex<Option<SoftAgc>>) {
    if let Some(a) = agc.lock().unwrap().as_ref() {
        a.reactivate();
    }
}

fn apply_command(
    sdr: &Arc<Mutex<RtlSdr>>,
    command: Command,
    gain_values: &mut Vec<i32>,
    agc: &Arc<Mutex<Option<SoftAgc>>>,
) -> Result<ShouldStop, String> {
    match command {
        Command::SetFrequency(freq) => {
            sdr.lock().unwrap().set_center_freq(freq).map_err(|e| e.to_string())?;
            reactivate_agc(agc);
        }
        Command::SetSampleRate(rate) => {
            {
                let mut guard = sdr.lock().unwrap();
                guard.set_sample_rate(rate).map_err(|e| e.to_string())?;
                guard.reset_buffer().map_err(|e| e.to_string())?;
            }
            if let Some(a) = agc.lock().unwrap().as_ref() {
                a.set_rate(rate);
                a.reactivate();
            }
        }
        Command::SetGainMode(manual) => {
            let gain = if manual {
                TunerGain::Manual(gain_values.first().copied().unwrap_or(0))
            } else {
                TunerGain::Auto
            };
            sdr.lock().unwrap().set_tuner_gain(gain).map_err(|e| e.to_string())?;
        }
        Command::SetGain(tenths_db) => {
            sdr.lock()
                .unwrap()
                .set_tuner_gain(TunerGain::Manual(tenths_db))
                .map_err(|e| e.to_string())?;
        }
        Command::SetGainByIndex(index) => {
            if let Some(gain) = gain_values.get(index as usize).copied() {
                sdr.lock()
                    .unwrap()
                    .set_tuner_gain(TunerGain::Manual(gain))
                    .map_err(|e| e.to_string())?;
            }
        }
        Command::SetFreqCorrection(ppm) => {
            sdr.lock().unwrap().set_freq_correction(ppm).map_err(|e| e.to_string())?;
        }
        Command::SetIfStageGain { stage, gain_tenths_db } => {
            sdr.lock()
                .unwrap()
                .set_tuner_if_gain(stage, gain_tenths_db)
                .map_err(|e| e.to_string())?;
            reactivate_agc(agc);
        }
        Command::SetTestMode(on) => {
            sdr.lock().unwrap().set_testmode(on).map_err(|e| e.to_string())?;
        }
        Command::SetAgcMode(on) => {
            let mode = if on { AgcMode::Auto } else { AgcMode::Off };
            agc::set_agc_mode(mode, sdr, agc).map_err(|e| e.to_string())?;
        }
        Command::SetDirectSampling(mode) => {
            let ds = match mode {
                0 => DirectSampleMode::Off,
                1 => DirectSampleMode::On,
                2 => DirectSampleMode::OnSwap,
                _ => DirectSampleMode::Off,
            };
            sdr.lock().unwrap().set_direct_sampling(ds).map_err(|e| e.to_string())?;
        }
        Command::SetOffsetTuning(on) => match sdr.lock().unwrap().set_offset_tuning(on) {
            Ok(()) => {}
            Err(e) => log::info!("offset tuning request ignored: {}", e),
        },
        Command::SetRtlXtal(freq) => {
            sdr.lock().unwrap().set_xtal_freq(freq, 0).map_err(|e| e.to_string())?;
        }
        Command::SetTunerXtal(freq) => {
            sdr.lock().unwrap().set_xtal_freq(0, freq).map_err(|e| e.to_string())?;
        }
        Command::SetBiasTee(on) => {
            sdr.lock().unwrap().set_bias_tee(on).map_err(|e| e.to_string())?;
            reactivate_agc(agc);
        }
        Command::SetTunerBandwidth(bw) => {
            sdr.lock().unwrap().set_tuner_bandwidth(bw).map_err(|e| e.to_string())?;
            reactivate_agc(agc);
        }
        Command::SetFreqHi32(_) => {
            // Only carries state forward for the next SetFrequency; no
            // action of its own.
        }
        Command::SetI2cTunerRegister(param) => {
            let reg = (param >> 20) as u8;
            let data = (param >> 12) as u8;
            let mask = param as u8;
            sdr.lock()
                .unwrap()
                .set_tuner_i2c_register(reg, data, mask)
                .map_err(|e| e.to_string())?;
        }
        Command::SetI2cTunerOverride(param) => {
            let reg = (param >> 20) as u8;
            let data = (param >> 12) as u8;
            let mask = param as u8;
            sdr.lock()
                .unwrap()
                .set_tuner_i2c_override(reg, data, mask)
                .map_err(|e| e.to_string())?;
        }
        Command::SetTunerBwIfCenter(offset) => {
            sdr.lock().unwrap().set_tuner_band_center(offset).map_err(|e| e.to_string())?;
        }
        Command::SetTunerIfMode(_) => {
            log::info!("tuner IF mode selection is not supported by this driver");
        }
        Command::SetSideband(_) => {
            log::info!("sideband selection is not supported by this driver");
        }
        Command::ReportI2cRegs(_) => {
            log::info!("i2c register reporting is not supported by this driver");
        }
        Command::GpioSetOutputMode(pin) => {
            log::info!("gpio set output mode: pin {}", pin);
        }
        Command::GpioSetInputMode(pin) => {
            log::info!("gpio set input mode: pin {}", pin);
        }
        Command::GpioGetIoStatus => {
            log::info!("gpio io status query is not supported by this driver");
        }
        Command::GpioWritePin { pin, on } => {
            log::info!("gpio write pin {} = {}", pin, on);
        }
        Command::GpioReadPin(pin) => {
            log::info!("gpio read pin {} is not supported by this driver", pin);
        }
        Command::GpioGetByte => {
            log::info!("gpio byte read is not supported by this driver");
        }
        Command::IsTunerPllLocked => match sdr.lock().unwrap().pll_locked() {
            Ok(locked) => log::info!("tuner PLL locked: {}", locked),
            Err(e) => log::info!("tuner PLL lock query failed: {}", e),
        },
        Command::SetDithering(on) => {
            log::info!("dithering control is not supported by this driver: {}", on);
        }
        Command::UdpTerminate => return Ok(ShouldStop::Stop),
        Command::Unknown(code, param) => {
            log::info!("ignoring unknown command code {:#04x} (param {:#010x})", code, param);
        }
    }
    Ok(ShouldStop::Continue)
}

fn sender_loop(
    mut stream: TcpStream,
    queue: Arc<SampleQueue>,
    stop: Arc<AtomicBool>,
    global_shutdown: Arc<AtomicBool>,
    idle_timeout: Duration,
) -> Result<(), String> {
    loop {
        if stop.load(Ordering::Relaxed) || global_shutdown.load(Ordering::Relaxed) {
            break;
        }
        match queue.pop_timeout(idle_timeout) {
            Some(buf) => {
                if let Err(e) = stream.write_all(&buf) {
                    stop.store(true, Ordering::SeqCst);
                    return Err(format!("failed to send data: {}", e));
                }
            }
            None => {
                stop.store(true, Ordering::SeqCst);
                return Err(format!(
                    "consumer queue drought exceeded {:?}, terminating session",
                    idle_timeout
                ));
            }
        }
    }
    Ok(())
}

fn command_loop(
    mut stream: TcpStream,
    cmd_tx: std::sync::mpsc::Sender<Command>,
    stop: Arc<AtomicBool>,
    global_shutdown: Arc<AtomicBool>,
) -> Result<(), String> {
    stream
        .set_read_timeout(Some(COMMAND_READ_TIMEOUT))
        .map_err(|e| format!("failed to set read timeout: {}", e))?;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 5];
    let mut consecutive_timeouts = 0u32;

    loop {
        if stop.load(Ordering::Relaxed) || global_shutdown.load(Ordering::Relaxed) {
            break;
        }
        match stream.read_exact(&mut buf) {
            Ok(()) => {
                consecutive_timeouts = 0;
                let command = decoder.decode(&buf);
                if cmd_tx.send(command).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                consecutive_timeouts += 1;
                if consecutive_timeouts >= PLL_CHECK_AFTER_TIMEOUTS {
                    consecutive_timeouts = 0;
                    let _ = cmd_tx.send(Command::IsTunerPllLocked);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                return Err(format!("command read failed: {}", e));
            }
        }
    }
    Ok(())
}
