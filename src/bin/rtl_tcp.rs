// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rtl_tcp`: opens a dongle, streams I/Q samples to a single TCP client,
//! and optionally runs the UDP side-channel controller alongside it on the
//! same device handle. One process, one device, matching how the original
//! implementation keeps the UDP socket on the device struct rather than
//! splitting it into a second binary.

use rtl_sdr_server::agc::SoftAgc;
use rtl_sdr_server::server::tcp::{self, TcpServerConfig};
use rtl_sdr_server::server::udp::UdpController;
use rtl_sdr_server::tuners::TunerGain;
use rtl_sdr_server::{DeviceId, DirectSamplingPolicy, RtlSdr};
use std::env;
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const DEFAULT_PORT: &str = "1234";
const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;
const DEFAULT_FREQUENCY: u32 = 100_000_000;
const DEFAULT_QUEUE_LIMIT: usize = 500;
const ACCEPT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Debug)]
struct AppConfig {
    address: String,
    port: u16,
    frequency: u32,
    sample_rate: u32,
    queue_limit: usize,
    device_index: usize,
    ppm_error: i32,
    gain: Option<i32>,
    enable_bias_tee: bool,
    ds_mode: DirectSamplingPolicy,
    ds_threshold: u32,
    enable_agc: bool,
    udp_port: Option<u16>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("rtl_tcp: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config = parse_args()?;
    stderrlog::new()
        .verbosity(log::Level::Info)
        .init()
        .map_err(|e| format!("failed to initialize logger: {}", e))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_flag = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown_flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| format!("failed to set signal handler: {}", e))?;
    }

    let sdr = Arc::new(Mutex::new(setup_device(&config)?));
    let agc: Arc<Mutex<Option<SoftAgc>>> = Arc::new(Mutex::new(None));
    if config.enable_agc {
        rtl_sdr_server::agc::set_agc_mode(rtl_sdr_server::agc::AgcMode::Auto, &sdr, &agc)
            .map_err(|e| format!("failed to arm soft AGC: {}", e))?;
    }

    let _udp_controller = match config.udp_port {
        Some(port) => {
            let addr: SocketAddr = format!("{}:{}", config.address, port)
                .parse()
                .map_err(|e| format!("invalid UDP listen address: {}", e))?;
            let socket = UdpSocket::bind(addr).map_err(|e| format!("failed to bind UDP socket: {}", e))?;
            println!("UDP control channel listening on {}", addr);
            Some(
                UdpController::spawn(socket, sdr.clone(), agc.clone())
                    .map_err(|e| format!("failed to start UDP controller: {}", e))?,
            )
        }
        None => None,
    };

    let listen_addr: SocketAddr = format!("{}:{}", config.address, config.port)
        .parse()
        .map_err(|e| format!("invalid listen address: {}", e))?;
    let listener = TcpListener::bind(listen_addr).map_err(|e| format!("failed to bind socket: {}", e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("failed to set non-blocking mode: {}", e))?;

    println!("Listening on {}", listen_addr);

    let session_config = TcpServerConfig {
        queue_capacity: config.queue_limit.max(1),
        ..Default::default()
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                println!("Client accepted from {}", addr);
                let error = tcp::serve_client(sdr.clone(), stream, &session_config, agc.clone(), shutdown.clone());
                match error {
                    Some(err) => eprintln!("Connection ended: {}", err),
                    None => println!("Connection closed"),
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_INTERVAL_MS));
            }
            Err(err) => return Err(format!("accept failed: {}", err)),
        }
    }

    sdr.lock()
        .unwrap()
        .close()
        .map_err(|e| format!("failed to close device: {}", e))?;
    println!("bye!");
    Ok(())
}

fn parse_args() -> Result<AppConfig, String> {
    let mut config = AppConfig {
        address: "127.0.0.1".to_string(),
        port: DEFAULT_PORT.parse::<u16>().unwrap(),
        frequency: DEFAULT_FREQUENCY,
        sample_rate: DEFAULT_SAMPLE_RATE,
        queue_limit: DEFAULT_QUEUE_LIMIT,
        device_index: 0,
        ppm_error: 0,
        gain: None,
        enable_bias_tee: false,
        ds_mode: DirectSamplingPolicy::Iq,
        ds_threshold: 0,
        enable_agc: false,
        udp_port: None,
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-a" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -a")?;
                config.address = value.clone();
            }
            "-p" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -p")?;
                config.port = value.parse::<u16>().map_err(|e| format!("invalid port: {}", e))?;
            }
            "-f" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -f")?;
                config.frequency = parse_scaled(value)?;
            }
            "-g" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -g")?;
                let gain = value.parse::<f32>().map_err(|e| format!("invalid gain: {}", e))?;
                config.gain = Some((gain * 10.0).round() as i32);
            }
            "-s" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -s")?;
                config.sample_rate = parse_scaled(value)?;
            }
            "-n" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -n")?;
                config.queue_limit = value.parse::<usize>().map_err(|e| format!("invalid queue limit: {}", e))?;
            }
            "-d" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -d")?;
                config.device_index = value.parse::<usize>().map_err(|e| format!("invalid device index: {}", e))?;
            }
            "-P" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -P")?;
                config.ppm_error = value.parse::<i32>().map_err(|e| format!("invalid ppm value: {}", e))?;
            }
            "-T" => config.enable_bias_tee = true,
            "-D" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -D")?;
                let ds_value = parse_scaled(value)?;
                if ds_value <= 4 {
                    config.ds_mode = match ds_value {
                        0 => DirectSamplingPolicy::Iq,
                        1 => DirectSamplingPolicy::I,
                        2 => DirectSamplingPolicy::Q,
                        3 => DirectSamplingPolicy::IBelowThreshold,
                        _ => DirectSamplingPolicy::QBelowThreshold,
                    };
                } else {
                    config.ds_threshold = ds_value;
                }
            }
            "-A" => config.enable_agc = true,
            "-u" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -u")?;
                config.udp_port = Some(value.parse::<u16>().map_err(|e| format!("invalid UDP port: {}", e))?);
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
        idx += 1;
    }

    Ok(config)
}

fn print_usage() {
    println!("rtl_tcp, an I/Q spectrum server for RTL-SDR receivers");
    println!("Usage: rtl_tcp [options]\n");
    println!("  -a listen address (default: 127.0.0.1)");
    println!("  -p listen port (default: {})", DEFAULT_PORT);
    println!("  -f frequency to tune to [Hz]");
    println!("  -g gain (default: auto)");
    println!("  -s samplerate in Hz (default: {} Hz)", DEFAULT_SAMPLE_RATE);
    println!("  -n max number of buffered blocks (default: {})", DEFAULT_QUEUE_LIMIT);
    println!("  -d device index (default: 0)");
    println!("  -P ppm error (default: 0)");
    println!("  -T enable bias-T on GPIO PIN 0");
    println!("  -D direct sampling mode, repeatable: 0=IQ 1=I 2=Q 3=I-below-threshold");
    println!("     4=Q-below-threshold; a second -D value above 4 sets the threshold Hz");
    println!("  -A enable soft AGC at startup");
    println!("  -u udp control port (disabled unless given)");
}

fn parse_scaled(value: &str) -> Result<u32, String> {
    if value.is_empty() {
        return Err("empty numeric value".to_string());
    }
    let mut factor = 1f64;
    let mut digits = value;
    if let Some(last) = value.chars().last() {
        match last {
            'k' | 'K' => {
                factor = 1e3;
                digits = &value[..value.len() - 1];
            }
            'M' | 'm' => {
                factor = 1e6;
                digits = &value[..value.len() - 1];
            }
            'G' | 'g' => {
                factor = 1e9;
                digits = &value[..value.len() - 1];
            }
            _ => {}
        }
    }
    let number = digits.parse::<f64>().map_err(|e| format!("invalid number '{}': {}", value, e))?;
    if number < 0.0 {
        return Err(format!("value must be positive: {}", value));
    }
    let hz = number * factor;
    if hz > u32::MAX as f64 {
        return Err(format!("value too large: {}", value));
    }
    Ok(hz.round() as u32)
}

fn setup_device(config: &AppConfig) -> Result<RtlSdr, String> {
    let mut sdr = RtlSdr::open(DeviceId::Index(config.device_index)).map_err(|e| format!("failed to open device: {}", e))?;

    if config.ppm_error != 0 {
        sdr.set_freq_correction(config.ppm_error)
            .map_err(|e| format!("failed to set PPM: {}", e))?;
    }

    sdr.set_sample_rate(config.sample_rate)
        .map_err(|e| format!("failed to set sample rate: {}", e))?;

    sdr.set_center_freq(config.frequency)
        .map_err(|e| format!("failed to set frequency: {}", e))?;

    if config.ds_mode != DirectSamplingPolicy::Iq {
        sdr.set_ds_mode(config.ds_mode, config.ds_threshold)
            .map_err(|e| format!("failed to configure direct-sampling mode: {}", e))?;
    }

    match config.gain {
        None => sdr
            .set_tuner_gain(TunerGain::Auto)
            .map_err(|e| format!("failed to enable auto gain: {}", e))?,
        Some(gain) => sdr
            .set_tuner_gain(TunerGain::Manual(gain))
            .map_err(|e| format!("failed to set tuner gain: {}", e))?,
    }

    sdr.set_bias_tee(config.enable_bias_tee)
        .map_err(|e| format!("failed to set bias tee: {}", e))?;

    sdr.reset_buffer().map_err(|e| format!("failed to reset buffers: {}", e))?;

    println!("Tuned to {} Hz", config.frequency);
    println!("Sampling at {} S/s", config.sample_rate);

    Ok(sdr)
}
