//! CPAL output device as an audio host.
//!
//! Ports are virtual: each device channel carries a route to at most one port, set by
//! [`AudioHost::connect`] with a destination of the form `<client>:playback_<n>`. The
//! client part is `system` (the opened device) or a case-insensitive substring of the
//! device name. Unrouted device channels play silence.
//!
//! The callback converts `f32` to the device sample format (`f32`, `i16`, `i32`, `u16`).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::PlayerError;
use crate::host::{AudioHost, Destination, ShutdownHook, port_index, port_name};
use crate::realtime::{PeriodOutput, RealtimeCallback};

/// Client part that always refers to the opened device.
pub const SYSTEM_CLIENT: &str = "system";
/// Port prefix of device channels in destinations.
pub const PLAYBACK_PREFIX: &str = "playback_";

/// Route value of a device channel with no port attached.
const UNROUTED: usize = 0;

/// Output device, negotiated stream config and port routing.
pub struct CpalHost {
    client: String,
    device: cpal::Device,
    device_name: String,
    supported: cpal::SupportedStreamConfig,
    stream_config: cpal::StreamConfig,
    ports: Vec<String>,
    /// One entry per device channel: `port index + 1`, or [`UNROUTED`].
    routes: Arc<[AtomicUsize]>,
    stream: Option<cpal::Stream>,
}

impl CpalHost {
    /// Open `device` (substring match, or the default device) with the config closest to
    /// `target_rate`. Periods are capped at `max_period_frames` when the device allows it.
    pub fn open(
        client: &str,
        device: Option<&str>,
        target_rate: u32,
        max_period_frames: u32,
    ) -> Result<Self, PlayerError> {
        let host = cpal::default_host();
        let device = pick_device(&host, device)?;
        let device_name = device_name(&device);
        let supported = pick_output_config(&device, Some(target_rate))?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = pick_buffer_size(&supported, max_period_frames) {
            stream_config.buffer_size = buf;
        }
        let routes = (0..stream_config.channels as usize)
            .map(|_| AtomicUsize::new(UNROUTED))
            .collect();

        tracing::info!(
            device = %device_name,
            channels = stream_config.channels,
            rate_hz = stream_config.sample_rate,
            format = ?supported.sample_format(),
            buffer = ?stream_config.buffer_size,
            "output device"
        );

        Ok(Self {
            client: client.to_string(),
            device,
            device_name,
            supported,
            stream_config,
            ports: Vec::new(),
            routes,
            stream: None,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_channels(&self) -> usize {
        self.routes.len()
    }
}

impl AudioHost for CpalHost {
    fn name(&self) -> &str {
        &self.client
    }

    fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate
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
        self.ports = (1..=channels).map(|n| port_name(&self.client, n)).collect();
        Ok(self.ports.clone())
    }

    fn activate(
        &mut self,
        callback: RealtimeCallback,
        on_shutdown: ShutdownHook,
    ) -> Result<(), PlayerError> {
        if self.ports.is_empty() {
            return Err(PlayerError::HostActivation("no output ports registered".into()));
        }
        if self.stream.is_some() {
            return Err(PlayerError::HostActivation("host is already active".into()));
        }
        let stream = build_output_stream(
            &self.device,
            &self.stream_config,
            self.supported.sample_format(),
            callback,
            self.routes.clone(),
            on_shutdown,
        )?;
        stream
            .play()
            .map_err(|e| PlayerError::HostActivation(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn connect(&mut self, port: &str, destination: &str) -> Result<(), PlayerError> {
        let connect_err = |reason: String| PlayerError::PortConnect {
            port: port.to_string(),
            destination: destination.to_string(),
            reason,
        };
        if self.stream.is_none() {
            return Err(connect_err("host is not active".into()));
        }
        let index = port_index(&self.ports, port)
            .ok_or_else(|| connect_err("no such port".into()))?;
        let channel = resolve_device_channel(&self.device_name, self.routes.len(), destination)
            .map_err(connect_err)?;
        self.routes[channel].store(index + 1, Ordering::Relaxed);
        tracing::debug!(port, destination, device_channel = channel, "connected");
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), PlayerError> {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause failed: {e}");
            }
        }
        for route in self.routes.iter() {
            route.store(UNROUTED, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Drop for CpalHost {
    fn drop(&mut self) {
        let _ = self.deactivate();
    }
}

/// Map a destination to a 0-based device channel.
fn resolve_device_channel(
    device_name: &str,
    device_channels: usize,
    destination: &str,
) -> Result<usize, String> {
    let dest = Destination::parse(destination)
        .ok_or_else(|| "destination must look like <client>:<port>".to_string())?;
    if dest.client != SYSTEM_CLIENT && !matches_device_name(device_name, dest.client) {
        return Err(format!("no client named {:?}", dest.client));
    }
    let n = dest
        .channel(PLAYBACK_PREFIX)
        .ok_or_else(|| format!("no port named {:?}", dest.port))?;
    if n > device_channels {
        return Err(format!("device has {device_channels} channels"));
    }
    Ok(n - 1)
}

/// Interleaved device buffer for one period, with port routing applied.
struct InterleavedOutput<'a, T> {
    data: &'a mut [T],
    device_channels: usize,
    routes: &'a [AtomicUsize],
}

impl<T> PeriodOutput for InterleavedOutput<'_, T>
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    fn frames(&self) -> usize {
        self.data.len() / self.device_channels
    }

    fn write(&mut self, frame: usize, port: usize, sample: f32) {
        let base = frame * self.device_channels;
        for (ch, route) in self.routes.iter().enumerate() {
            if route.load(Ordering::Relaxed) == port + 1 {
                self.data[base + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
            }
        }
    }

    fn silence_from(&mut self, frame: usize) {
        let start = (frame * self.device_channels).min(self.data.len());
        self.data[start..].fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
    }
}

/// Build a CPAL output stream that runs `callback` once per device period.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    callback: RealtimeCallback,
    routes: Arc<[AtomicUsize]>,
    on_shutdown: ShutdownHook,
) -> Result<cpal::Stream, PlayerError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, callback, routes, on_shutdown),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, callback, routes, on_shutdown),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, callback, routes, on_shutdown),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, callback, routes, on_shutdown),
        other => Err(PlayerError::HostActivation(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: RealtimeCallback,
    routes: Arc<[AtomicUsize]>,
    on_shutdown: ShutdownHook,
) -> Result<cpal::Stream, PlayerError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let device_channels = (config.channels as usize).max(1);

    let err_fn = move |err: cpal::StreamError| {
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            tracing::error!("output device is no longer available");
            on_shutdown();
        } else {
            tracing::warn!("stream error: {err}");
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut out = InterleavedOutput {
                    data,
                    device_channels,
                    routes: &routes[..],
                };
                out.silence_from(0);
                callback.process(&mut out);
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::HostActivation(e.to_string()))
}

/// Names of the default host's output devices, in enumeration order.
pub fn list_output_devices() -> Result<Vec<String>, PlayerError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlayerError::HostUnavailable(e.to_string()))?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "unknown device".to_string())
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, PlayerError> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|e| PlayerError::HostUnavailable(e.to_string()))?;
        return devices
            .find(|d| matches_device_name(&device_name(d), needle))
            .ok_or_else(|| PlayerError::HostUnavailable(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| PlayerError::HostUnavailable("no default output device".into()))
}

/// Choose the best output config for a target sample rate.
///
/// Prefers the highest supported rate that is `<= target_rate` (an exact match when the
/// device has one), then the better sample format.
fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig, PlayerError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlayerError::HostUnavailable(e.to_string()))?;

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| PlayerError::HostUnavailable("no supported output configs".into()))
}

/// Fixed period size no larger than `max_frames`, when the device reports a range.
///
/// Returns `None` when the device only supports its default buffer size.
fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    max_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_period(*min, *max, max_frames)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_period(min: u32, max: u32, limit: u32) -> u32 {
    max.min(limit).max(min)
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(entries: &[usize]) -> Vec<AtomicUsize> {
        entries.iter().map(|r| AtomicUsize::new(*r)).collect()
    }

    #[test]
    fn system_destination_maps_to_device_channel() {
        assert_eq!(resolve_device_channel("USB DAC", 2, "system:playback_1"), Ok(0));
        assert_eq!(resolve_device_channel("USB DAC", 2, "system:playback_2"), Ok(1));
    }

    #[test]
    fn device_name_substring_is_accepted_as_client() {
        assert_eq!(resolve_device_channel("USB DAC", 2, "dac:playback_2"), Ok(1));
    }

    #[test]
    fn unknown_destinations_are_rejected() {
        assert!(resolve_device_channel("USB DAC", 2, "system:playback_3").is_err());
        assert!(resolve_device_channel("USB DAC", 2, "speakers:playback_1").is_err());
        assert!(resolve_device_channel("USB DAC", 2, "system:capture_1").is_err());
        assert!(resolve_device_channel("USB DAC", 2, "playback_1").is_err());
    }

    #[test]
    fn interleaved_output_follows_routes() {
        // Device channel 0 <- port 1, channel 1 unrouted, channel 2 <- port 0.
        let table = routes(&[2, UNROUTED, 1]);
        let mut data = vec![9.0f32; 6];
        let mut out = InterleavedOutput {
            data: &mut data,
            device_channels: 3,
            routes: &table,
        };
        out.silence_from(0);
        out.write(0, 0, 0.25);
        out.write(0, 1, 0.5);
        out.write(1, 0, -0.25);
        assert_eq!(out.frames(), 2);
        assert_eq!(data, vec![0.5, 0.0, 0.25, 0.0, 0.0, -0.25]);
    }

    #[test]
    fn interleaved_output_converts_sample_format() {
        let table = routes(&[1]);
        let mut data = vec![7i16; 2];
        let mut out = InterleavedOutput {
            data: &mut data,
            device_channels: 1,
            routes: &table,
        };
        out.write(0, 0, 0.5);
        out.silence_from(1);
        assert_eq!(data, vec![16_384, 0]);
    }

    #[test]
    fn clamp_period_respects_device_range() {
        assert_eq!(clamp_period(64, 4096, 1024), 1024);
        assert_eq!(clamp_period(64, 512, 1024), 512);
        assert_eq!(clamp_period(2048, 4096, 1024), 2048);
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_higher_rate_then_format() {
        assert!(is_better_candidate(true, 96_000, 2, true, 48_000, 2));
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }
}
