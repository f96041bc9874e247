// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Soft AGC: picks a tuner gain step that keeps the 8-bit ADC out of
//! saturation without a hardware AGC loop. `Classifier` runs the
//! histogram/state-machine algorithm against each completed buffer;
//! `SoftAgc` wraps it with the dedicated worker thread that actually
//! writes the gain to the tuner, the same "spawn a thread, park it on a
//! condition variable" shape the TCP server's sender/command threads use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::tuners::TunerGain;
use crate::RtlSdr;

/// How aggressively the classifier re-triggers after the initial descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcMode {
    Off,
    OnChange,
    AutoAttenuate,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgcState {
    Off,
    On,
    ResetContinuing,
    Reset,
    Init,
}

const DEFAULT_SCAN_MS: u32 = 500;
const DEFAULT_DEAD_MS: u32 = 50;

/// Pure classifier: histogram, oversteer test, and gain-index bookkeeping.
/// Runs on the USB completion path, so it never itself touches I2C —
/// gain changes are only ever requested via `take_pending_gain_request`.
#[derive(Debug)]
pub struct Classifier {
    mode: AgcMode,
    state: AgcState,
    scan_ms: u32,
    dead_ms: u32,
    rate: u32,
    scan_samples: u64,
    dead_samples: u64,
    remaining_scan: u64,
    remaining_dead: u64,
    histogram: [u32; 16],
    sample_count: u64,
    gain_index: usize,
    gain_table_len: usize,
    pending_gain_request: Option<usize>,
}

impl Classifier {
    pub fn new(mode: AgcMode) -> Self {
        Classifier {
            mode,
            state: AgcState::Init,
            scan_ms: DEFAULT_SCAN_MS,
            dead_ms: DEFAULT_DEAD_MS,
            rate: 0,
            scan_samples: 0,
            dead_samples: 0,
            remaining_scan: 0,
            remaining_dead: 0,
            histogram: [0; 16],
            sample_count: 0,
            gain_index: 0,
            gain_table_len: 0,
            pending_gain_request: None,
        }
    }

    /// Re-derives `scan_samples`/`dead_samples` for a new sample rate.
    /// A no-op if the rate hasn't actually changed.
    pub fn set_rate(&mut self, rate: u32) {
        if rate == self.rate {
            return;
        }
        self.rate = rate;
        self.scan_samples = self.scan_ms as u64 * rate as u64 / 1000;
        self.dead_samples = self.dead_ms as u64 * rate as u64 / 1000;
    }

    pub fn set_gain_table_len(&mut self, len: usize) {
        self.gain_table_len = len;
    }

    /// Any of the re-trigger points in spec §4.5: center-frequency
    /// change, IF gain change, bandwidth change, bias-tee toggle,
    /// sample-rate change.
    pub fn reactivate(&mut self) {
        if self.mode != AgcMode::Off {
            self.state = AgcState::Reset;
        }
    }

    pub fn take_pending_gain_request(&mut self) -> Option<usize> {
        self.pending_gain_request.take()
    }

    /// Called by the worker once it has actually applied a requested
    /// gain index, so the classifier can start counting the dead window
    /// from a known-good point rather than from the request itself.
    pub fn gain_applied(&mut self) {
        self.remaining_dead = self.dead_samples;
    }

    fn reset_histogram(&mut self) {
        self.histogram = [0; 16];
        self.sample_count = 0;
    }

    fn accumulate(&mut self, buf: &[u8]) {
        // Interleaved 8-bit unsigned I/Q, bias 128. Bin on the top 4
        // magnitude bits, mirrored around the bias.
        for &sample in buf {
            let magnitude = (sample as i16 - 128).unsigned_abs() as u32;
            let bin = (magnitude >> 3).min(15) as usize;
            self.histogram[bin] += 1;
            self.sample_count += 1;
        }
    }

    fn cumulative(&self, k: usize) -> u32 {
        self.histogram[k..].iter().sum()
    }

    fn oversteered(&self) -> bool {
        let n = self.sample_count as u32;
        if n == 0 {
            return false;
        }
        64 * self.cumulative(15) >= n || 16 * self.cumulative(12) >= n || 4 * self.cumulative(8) >= n
    }

    fn samples_in(buf: &[u8]) -> u64 {
        (buf.len() / 2) as u64
    }

    /// Runs one buffer through the state machine. Returns whether the
    /// stream engine should invoke the user callback with it.
    pub fn classify(&mut self, buf: &[u8]) -> bool {
        if self.mode == AgcMode::Off {
            return true;
        }
        match self.state {
            AgcState::Init => {
                self.state = AgcState::Reset;
                false
            }
            AgcState::Reset => {
                if self.gain_table_len <= 1 {
                    self.state = AgcState::Off;
                    return true;
                }
                self.gain_index = self.gain_table_len - 1;
                self.pending_gain_request = Some(self.gain_index);
                self.reset_histogram();
                self.remaining_dead = u64::MAX;
                self.state = AgcState::ResetContinuing;
                false
            }
            AgcState::ResetContinuing => {
                if self.remaining_dead > 0 {
                    self.remaining_dead = self.remaining_dead.saturating_sub(Self::samples_in(buf));
                    return false;
                }
                if self.gain_index == 0 {
                    self.state = AgcState::Off;
                    return true;
                }
                self.accumulate(buf);
                if self.oversteered() {
                    self.gain_index -= 1;
                    self.pending_gain_request = Some(self.gain_index);
                    self.reset_histogram();
                    self.remaining_dead = u64::MAX;
                    false
                } else {
                    self.state = match self.mode {
                        AgcMode::OnChange => AgcState::Off,
                        AgcMode::AutoAttenuate | AgcMode::Auto => AgcState::On,
                        AgcMode::Off => AgcState::Off,
                    };
                    self.remaining_scan = self.scan_samples;
                    true
                }
            }
            AgcState::On => {
                self.accumulate(buf);
                if self.oversteered() && self.gain_index > 0 {
                    self.gain_index -= 1;
                    self.pending_gain_request = Some(self.gain_index);
                    self.reset_histogram();
                    self.remaining_dead = self.dead_samples;
                    self.remaining_scan = self.scan_samples;
                } else {
                    let n = Self::samples_in(buf);
                    if self.remaining_scan <= n {
                        self.reset_histogram();
                        self.remaining_scan = self.scan_samples;
                        if self.mode == AgcMode::OnChange {
                            self.state = AgcState::Off;
                        }
                    } else {
                        self.remaining_scan -= n;
                    }
                }
                true
            }
            AgcState::Off => true,
        }
    }
}

enum WorkerCommand {
    ApplyGain(usize),
    Stop,
}

struct WorkerShared {
    command: Mutex<Option<WorkerCommand>>,
    cv: Condvar,
}

/// Owns the classifier plus the dedicated gain-writer thread. The thread
/// keeps the slow I2C gain write off the USB completion path; it parks
/// on `cv` until `classify` hands it a new index to apply.
pub struct SoftAgc {
    classifier: Arc<Mutex<Classifier>>,
    shared: Arc<WorkerShared>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SoftAgc {
    pub fn new<G>(mode: AgcMode, mut apply_gain: G) -> Self
    where
        G: FnMut(usize) + Send + 'static,
    {
        let classifier = Arc::new(Mutex::new(Classifier::new(mode)));
        let shared = Arc::new(WorkerShared {
            command: Mutex::new(None),
            cv: Condvar::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let worker_classifier = classifier.clone();
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || loop {
            let mut guard = worker_shared.command.lock().unwrap();
            while guard.is_none() {
                guard = worker_shared.cv.wait(guard).unwrap();
            }
            let command = guard.take().unwrap();
            drop(guard);
            match command {
                WorkerCommand::ApplyGain(idx) => {
                    apply_gain(idx);
                    worker_classifier.lock().unwrap().gain_applied();
                }
                WorkerCommand::Stop => break,
            }
        });

        SoftAgc {
            classifier,
            shared,
            worker: Some(worker),
            stop,
        }
    }

    pub fn set_rate(&self, rate: u32) {
        self.classifier.lock().unwrap().set_rate(rate);
    }

    pub fn set_gain_table_len(&self, len: usize) {
        self.classifier.lock().unwrap().set_gain_table_len(len);
    }

    pub fn reactivate(&self) {
        self.classifier.lock().unwrap().reactivate();
    }

    /// Soft-AGC hook for the stream engine's classify-then-deliver gate.
    pub fn classify(&self, buf: &[u8]) -> bool {
        let deliver = {
            let mut c = self.classifier.lock().unwrap();
            c.classify(buf)
        };
        let pending = self.classifier.lock().unwrap().take_pending_gain_request();
        if let Some(idx) = pending {
            *self.shared.command.lock().unwrap() = Some(WorkerCommand::ApplyGain(idx));
            self.shared.cv.notify_one();
        }
        deliver
    }
}

impl Drop for SoftAgc {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        *self.shared.command.lock().unwrap() = Some(WorkerCommand::Stop);
        self.shared.cv.notify_one();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Arms or disarms the device-wide soft-AGC slot. Both the TCP server's
/// `SetAgcMode` command and the UDP controller's `a` command reach for
/// this, since softagc state belongs to the device, not to one session —
/// the same "one agc_state on the device struct" shape `rtl_tcp`'s
/// original softagc implementation uses.
pub fn set_agc_mode(
    mode: AgcMode,
    sdr: &Arc<Mutex<RtlSdr>>,
    slot: &Mutex<Option<SoftAgc>>,
) -> Result<()> {
    let mut slot_guard = slot.lock().unwrap();
    if mode == AgcMode::Off {
        *slot_guard = None;
        return Ok(());
    }
    let (rate, gains) = {
        let guard = sdr.lock().unwrap();
        (guard.get_sample_rate(), guard.get_tuner_gains()?)
    };
    let sdr_for_apply = sdr.clone();
    let gains_for_apply = gains.clone();
    let new_agc = SoftAgc::new(mode, move |idx| {
        if let Some(&gain) = gains_for_apply.get(idx) {
            if let Ok(mut guard) = sdr_for_apply.lock() {
                let _ = guard.set_tuner_gain(TunerGain::Manual(gain));
            }
        }
    });
    new_agc.set_rate(rate);
    new_agc.set_gain_table_len(gains.len());
    *slot_guard = Some(new_agc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with_fraction_saturated(len: usize, fraction: f32) -> Vec<u8> {
        let saturated_count = (len as f32 * fraction) as usize;
        let mut buf = vec![128u8; len];
        for b in buf.iter_mut().take(saturated_count) {
            *b = 255;
        }
        buf
    }

    #[test]
    fn reset_requests_top_of_gain_table_and_discards() {
        let mut c = Classifier::new(AgcMode::Auto);
        c.set_rate(2_048_000);
        c.set_gain_table_len(10);
        assert!(!c.classify(&[128u8; 512])); // Init -> Reset
        assert!(!c.classify(&[128u8; 512])); // Reset -> ResetContinuing
        assert_eq!(c.take_pending_gain_request(), Some(9));
    }

    #[test]
    fn single_gain_entry_disables_agc() {
        let mut c = Classifier::new(AgcMode::Auto);
        c.set_rate(2_048_000);
        c.set_gain_table_len(1);
        assert!(!c.classify(&[128u8; 512])); // Init -> Reset
        assert!(c.classify(&[128u8; 512])); // Reset sees len <= 1, disables
    }

    #[test]
    fn sustained_oversteer_descends_gain_within_two_windows() {
        let mut c = Classifier::new(AgcMode::Auto);
        c.set_rate(2_048_000);
        c.set_gain_table_len(10);
        c.classify(&[128u8; 512]); // Init -> Reset
        c.classify(&[128u8; 512]); // Reset -> ResetContinuing, dead=MAX
        c.gain_applied(); // worker "applies" the requested top gain
        let starting_index = c.gain_index;

        let oversteered_buf = buffer_with_fraction_saturated(4096, 0.4);
        let mut descended = false;
        for _ in 0..2 {
            c.classify(&oversteered_buf);
            if c.gain_index < starting_index {
                descended = true;
                break;
            }
            c.gain_applied();
        }
        assert!(descended, "gain index should drop under sustained oversteer");
    }

    #[test]
    fn worker_thread_applies_requested_gain() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let applied_clone = applied.clone();
        let agc = SoftAgc::new(AgcMode::Auto, move |idx| {
            applied_clone.lock().unwrap().push(idx);
        });
        agc.set_rate(2_048_000);
        agc.set_gain_table_len(5);
        agc.classify(&[128u8; 512]); // Init -> Reset
        agc.classify(&[128u8; 512]); // Reset -> ResetContinuing, requests gain 4

        // Give the worker thread a chance to run.
        for _ in 0..100 {
            if !applied.lock().unwrap().is_empty() {
                break;
            }
            thread::yield_now();
        }
        assert_eq!(applied.lock().unwrap().as_slice(), &[4]);
    }
}
