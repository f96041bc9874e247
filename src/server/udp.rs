// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UDP side-channel controller: a dedicated thread parsing whitespace-
//! tokenized ASCII commands for low-level register/IF/bandwidth/gain
//! control. Only meaningful on R820T/R828D, which expose the raw i2c
//! register access this protocol pokes at.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::agc::{self, AgcMode, SoftAgc};
use crate::error::RtlsdrError::TunerUnsupported;
use crate::error::{Result, RtlsdrError};
use crate::RtlSdr;

const MAX_LINE: usize = 100;
const FILTER_REGISTER: u8 = 27;
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Parses a number accepting `x`/`b`/`d` radix prefixes and `'`, `.`, `_`
/// as ignored digit separators, e.g. `x1a`, `b1010`, `1'000_000`.
pub fn parse_number(token: &str) -> Result<i64> {
    if token.is_empty() {
        return Err(RtlsdrError::RtlsdrErr("empty numeric token".to_string()));
    }
    let (radix, digits) = match token.as_bytes()[0] {
        b'x' | b'X' => (16, &token[1..]),
        b'b' | b'B' => (2, &token[1..]),
        b'd' | b'D' => (10, &token[1..]),
        _ => (10, token),
    };
    let cleaned: String = digits
        .chars()
        .filter(|c| *c != '\'' && *c != '.' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return Err(RtlsdrError::RtlsdrErr(format!("no digits in '{}'", token)));
    }
    let negative = cleaned.starts_with('-');
    let magnitude = if negative { &cleaned[1..] } else { &cleaned[..] };
    i64::from_str_radix(magnitude, radix)
        .map(|v| if negative { -v } else { v })
        .map_err(|e| RtlsdrError::RtlsdrErr(format!("invalid number '{}': {}", token, e)))
}

/// Parses a frequency, additionally accepting `k`/`M`/`G` suffixes on top
/// of `parse_number`'s prefix/separator rules.
pub fn parse_frequency(token: &str) -> Result<u32> {
    let (factor, digits) = match token.chars().last() {
        Some('k') | Some('K') => (1e3, &token[..token.len() - 1]),
        Some('M') => (1e6, &token[..token.len() - 1]),
        Some('G') => (1e9, &token[..token.len() - 1]),
        _ => (1.0, &token[..]),
    };
    let base = parse_number(digits)? as f64;
    Ok((base * factor) as u32)
}

struct Line<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Line<'a> {
    fn new(text: &'a str) -> Self {
        Line {
            tokens: text.split_whitespace(),
        }
    }
    fn next(&mut self) -> Option<&'a str> {
        self.tokens.next()
    }
}

fn handle_line(
    sdr: &Arc<Mutex<RtlSdr>>,
    saved_filter: &Mutex<Option<u8>>,
    agc: &Arc<Mutex<Option<SoftAgc>>>,
    text: &str,
) -> String {
    let mut line = Line::new(text);
    let cmd = match line.next() {
        Some(c) => c,
        None => return "?\n".to_string(),
    };

    // Handled outside the locked closure below: arming/disarming the
    // device-wide soft AGC takes its own lock on `sdr` via `set_agc_mode`.
    if cmd == "a" {
        let result: Result<String> = (|| {
            if !is_r82xx(&sdr.lock().unwrap())? {
                return Err(TunerUnsupported(
                    "UDP controller requires an R820T/R828D tuner".to_string(),
                ));
            }
            let variant = parse_number(require(&mut line, "agc_variant")?)?;
            let mode = match variant {
                0 => AgcMode::Off,
                1 => AgcMode::OnChange,
                2 => AgcMode::AutoAttenuate,
                _ => AgcMode::Auto,
            };
            agc::set_agc_mode(mode, sdr, agc)?;
            Ok(variant.to_string())
        })();
        return match result {
            Ok(value) => format!("! {}\n", value),
            Err(_) => "?\n".to_string(),
        };
    }

    let result: Result<String> = (|| {
        let mut dev = sdr.lock().unwrap();
        if !is_r82xx(&dev)? {
            return Err(TunerUnsupported(
                "UDP controller requires an R820T/R828D tuner".to_string(),
            ));
        }
        {
            let mut saved = saved_filter.lock().unwrap();
            if saved.is_none() {
                *saved = Some(dev.get_tuner_i2c_register(FILTER_REGISTER)?);
            }
        }
        match cmd {
            "g" => {
                let reg = parse_number(require(&mut line, "reg")?)? as u8;
                dev.get_tuner_i2c_register(reg).map(|v| v.to_string())
            }
            "s" => {
                let reg = parse_number(require(&mut line, "reg")?)? as u8;
                let val = parse_number(require(&mut line, "val")?)? as u8;
                let mask = match line.next() {
                    Some(m) => parse_number(m)? as u8,
                    None => 0xff,
                };
                dev.set_tuner_i2c_register(reg, val, mask)?;
                Ok(val.to_string())
            }
            "S" => {
                let reg = parse_number(require(&mut line, "reg")?)? as u8;
                let val = parse_number(require(&mut line, "val")?)? as u8;
                let mask = match line.next() {
                    Some(m) => parse_number(m)? as u8,
                    None => 0xff,
                };
                dev.set_tuner_i2c_override(reg, val, mask)?;
                Ok(val.to_string())
            }
            "i" | "I" => {
                let freq = parse_frequency(require(&mut line, "freq")?)?;
                dev.set_if_freq(freq)?;
                Ok(freq.to_string())
            }
            "f" => {
                let freq = parse_frequency(require(&mut line, "freq")?)?;
                dev.set_center_freq(freq)?;
                restore_filter_register(&mut dev, saved_filter)?;
                if let Some(a) = agc.lock().unwrap().as_ref() {
                    a.reactivate();
                }
                Ok(freq.to_string())
            }
            "b" => {
                let bw = parse_frequency(require(&mut line, "bw")?)?;
                dev.set_tuner_bandwidth(bw)?;
                if let Some(a) = agc.lock().unwrap().as_ref() {
                    a.reactivate();
                }
                Ok(bw.to_string())
            }
            "c" => {
                let center = parse_frequency(require(&mut line, "center")?)?;
                dev.set_center_freq(center)?;
                restore_filter_register(&mut dev, saved_filter)?;
                if let Some(a) = agc.lock().unwrap().as_ref() {
                    a.reactivate();
                }
                Ok(center.to_string())
            }
            "m" => {
                let gain = parse_number(require(&mut line, "gain")?)? as i32;
                dev.set_tuner_gain(crate::tuners::TunerGain::Manual(gain))?;
                Ok(gain.to_string())
            }
            "M" => {
                let mode = parse_number(require(&mut line, "gain_mode")?)?;
                let gain = if mode != 0 {
                    crate::tuners::TunerGain::Manual(0)
                } else {
                    crate::tuners::TunerGain::Auto
                };
                dev.set_tuner_gain(gain)?;
                Ok(mode.to_string())
            }
            "h" => Ok(help_text().to_string()),
            other => Err(RtlsdrError::RtlsdrErr(format!("unknown command '{}'", other))),
        }
    })();

    match result {
        Ok(value) => format!("! {}\n", value),
        Err(_) => "?\n".to_string(),
    }
}

fn require<'a>(line: &mut Line<'a>, what: &str) -> Result<&'a str> {
    line.next()
        .ok_or_else(|| RtlsdrError::RtlsdrErr(format!("missing argument: {}", what)))
}

fn is_r82xx(sdr: &RtlSdr) -> Result<bool> {
    let id = sdr.get_tuner_id()?;
    Ok(id == "r820t" || id == "r828d")
}

/// Writes back the register-27 value captured the first time this
/// controller touched the tuner, undoing whatever side effect retuning
/// had on the filter corners.
fn restore_filter_register(sdr: &mut RtlSdr, saved_filter: &Mutex<Option<u8>>) -> Result<()> {
    let saved = saved_filter.lock().unwrap().expect("captured on first command");
    sdr.set_tuner_i2c_register(FILTER_REGISTER, saved, 0xff)
}

fn help_text() -> &'static str {
    "g reg | s reg val [mask] | S reg val [mask] | i freq | I freq | f freq | b bw | c center | a agc_variant | m gain | M gain_mode | h"
}

/// Owns the controller thread; dropping it requests shutdown and joins.
pub struct UdpController {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UdpController {
    /// `agc` is the same device-wide soft-AGC slot the TCP server's
    /// `SetAgcMode` command arms, so either front end can turn it on.
    pub fn spawn(
        socket: UdpSocket,
        sdr: Arc<Mutex<RtlSdr>>,
        agc: Arc<Mutex<Option<SoftAgc>>>,
    ) -> Result<Self> {
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|e| RtlsdrError::RtlsdrErr(format!("failed to set UDP read timeout: {}", e)))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = thread::spawn(move || run(socket, sdr, agc, thread_shutdown));
        Ok(UdpController {
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for UdpController {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    socket: UdpSocket,
    sdr: Arc<Mutex<RtlSdr>>,
    agc: Arc<Mutex<Option<SoftAgc>>>,
    shutdown: Arc<AtomicBool>,
) {
    let saved_filter: Mutex<Option<u8>> = Mutex::new(None);
    let mut buf = [0u8; MAX_LINE];
    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                let response = handle_line(&sdr, &saved_filter, &agc, text.trim());
                if let Err(e) = socket.send_to(response.as_bytes(), from) {
                    log::warn!("UDP controller failed to send response to {}: {}", from, e);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::warn!("UDP controller recv error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_with_separators() {
        assert_eq!(parse_number("1'000_000").unwrap(), 1_000_000);
    }

    #[test]
    fn parses_hex_with_prefix() {
        assert_eq!(parse_number("x1a").unwrap(), 0x1a);
    }

    #[test]
    fn parses_binary_with_prefix() {
        assert_eq!(parse_number("b1010").unwrap(), 0b1010);
    }

    #[test]
    fn rejects_empty_token() {
        assert!(parse_number("").is_err());
    }

    #[test]
    fn parses_frequency_suffixes() {
        assert_eq!(parse_frequency("100M").unwrap(), 100_000_000);
        assert_eq!(parse_frequency("14k").unwrap(), 14_000);
        assert_eq!(parse_frequency("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn frequency_without_suffix_is_passed_through() {
        assert_eq!(parse_frequency("12345").unwrap(), 12345);
    }
}
