//! Offline audio host.
//!
//! Drives the realtime callback from a plain `offline-host` thread in fixed-size periods and
//! records what each port played. Ports connect to `offline:capture_<n>` destinations;
//! each capture channel accumulates the samples of the ports routed to it.
//!
//! Only frames the callback actually played are recorded, so silence padding from an
//! underrun or the final period never shows up in the captured streams.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::PlayerError;
use crate::host::{AudioHost, Destination, ShutdownHook, port_index, port_name};
use crate::realtime::{PlanarOutput, RealtimeCallback};

pub const OFFLINE_CLIENT: &str = "offline";
pub const CAPTURE_PREFIX: &str = "capture_";

const UNROUTED: usize = 0;

#[derive(Debug, Default)]
struct Recording {
    ports: Vec<Vec<f32>>,
    captures: Vec<Vec<f32>>,
}

pub struct OfflineHost {
    sample_rate: u32,
    period_frames: usize,
    capture_channels: usize,
    period_sleep: Option<Duration>,
    shutdown_after: Option<u64>,
    ports: Vec<String>,
    routes: Arc<[AtomicUsize]>,
    recording: Arc<Mutex<Recording>>,
    periods: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OfflineHost {
    pub fn new(sample_rate: u32, period_frames: usize) -> Self {
        Self {
            sample_rate,
            period_frames: period_frames.max(1),
            capture_channels: 2,
            period_sleep: None,
            shutdown_after: None,
            ports: Vec::new(),
            routes: Arc::from(Vec::new()),
            recording: Arc::new(Mutex::new(Recording::default())),
            periods: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Number of `offline:capture_<n>` destinations.
    pub fn with_capture_channels(mut self, n: usize) -> Self {
        self.capture_channels = n;
        self
    }

    /// Sleep between periods instead of only yielding.
    pub fn with_period_sleep(mut self, sleep: Duration) -> Self {
        self.period_sleep = Some(sleep);
        self
    }

    /// Simulate the host going away after `periods` periods.
    pub fn with_shutdown_after(mut self, periods: u64) -> Self {
        self.shutdown_after = Some(periods);
        self
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    /// Periods processed so far.
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Acquire)
    }

    /// Played samples per registered port.
    pub fn port_output(&self) -> Vec<Vec<f32>> {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ports
            .clone()
    }

    /// Samples received by 1-based capture channel `n`.
    pub fn captured(&self, n: usize) -> Vec<f32> {
        let rec = self.recording.lock().unwrap_or_else(PoisonError::into_inner);
        n.checked_sub(1)
            .and_then(|i| rec.captures.get(i))
            .cloned()
            .unwrap_or_default()
    }
}

impl AudioHost for OfflineHost {
    fn name(&self) -> &str {
        OFFLINE_CLIENT
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn register_output_ports(&mut self, channels: usize) -> Result<Vec<String>, PlayerError> {
        if channels == 0 {
            return Err(PlayerError::PortRegistration(
                "cannot register zero output ports".into(),
            ));
        }
        if !self.ports.is_empty() {
            return Err(PlayerError::PortRegistration("ports already registered".into()));
        }
        self.ports = (1..=channels).map(|n| port_name(OFFLINE_CLIENT, n)).collect();
        self.routes = (0..channels).map(|_| AtomicUsize::new(UNROUTED)).collect();
        let mut rec = self.recording.lock().unwrap_or_else(PoisonError::into_inner);
        rec.ports = vec![Vec::new(); channels];
        rec.captures = vec![Vec::new(); self.capture_channels];
        Ok(self.ports.clone())
    }

    fn activate(
        &mut self,
        mut callback: RealtimeCallback,
        on_shutdown: ShutdownHook,
    ) -> Result<(), PlayerError> {
        if self.ports.is_empty() {
            return Err(PlayerError::HostActivation("no output ports registered".into()));
        }
        if self.worker.is_some() {
            return Err(PlayerError::HostActivation("host is already active".into()));
        }

        let channels = self.ports.len();
        let period = self.period_frames;
        let sleep = self.period_sleep;
        let shutdown_after = self.shutdown_after;
        let routes = self.routes.clone();
        let recording = self.recording.clone();
        let periods = self.periods.clone();
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let worker = thread::Builder::new()
            .name("offline-host".to_string())
            .spawn(move || {
                let mut buffers = vec![vec![0.0f32; period]; channels];
                while running.load(Ordering::Acquire) {
                    let report = callback.process(&mut PlanarOutput::new(&mut buffers, period));
                    if report.frames_played > 0 {
                        let mut rec = recording.lock().unwrap_or_else(PoisonError::into_inner);
                        for (port, buf) in buffers.iter().enumerate() {
                            let played = &buf[..report.frames_played];
                            rec.ports[port].extend_from_slice(played);
                            let route = routes[port].load(Ordering::Relaxed);
                            if route != UNROUTED {
                                if let Some(capture) = rec.captures.get_mut(route - 1) {
                                    capture.extend_from_slice(played);
                                }
                            }
                        }
                    }
                    let done = periods.fetch_add(1, Ordering::AcqRel) + 1;
                    if report.finished {
                        break;
                    }
                    if shutdown_after.is_some_and(|limit| done >= limit) {
                        on_shutdown();
                        break;
                    }
                    match sleep {
                        Some(d) => thread::sleep(d),
                        None => thread::yield_now(),
                    }
                }
            })
            .map_err(|e| PlayerError::HostActivation(e.to_string()))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn connect(&mut self, port: &str, destination: &str) -> Result<(), PlayerError> {
        let connect_err = |reason: String| PlayerError::PortConnect {
            port: port.to_string(),
            destination: destination.to_string(),
            reason,
        };
        if self.worker.is_none() {
            return Err(connect_err("host is not active".into()));
        }
        let index = port_index(&self.ports, port)
            .ok_or_else(|| connect_err("no such port".into()))?;
        let dest = Destination::parse(destination)
            .filter(|d| d.client == OFFLINE_CLIENT)
            .ok_or_else(|| connect_err("no such client".into()))?;
        let n = dest
            .channel(CAPTURE_PREFIX)
            .filter(|n| *n <= self.capture_channels)
            .ok_or_else(|| connect_err(format!("no port named {:?}", dest.port)))?;
        self.routes[index].store(n, Ordering::Relaxed);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), PlayerError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| PlayerError::HostUnavailable("offline host thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for OfflineHost {
    fn drop(&mut self) {
        let _ = self.deactivate();
    }
}
