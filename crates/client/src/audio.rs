//! Capture and playback through cpal.
//!
//! The wire wants 16-bit LE mono PCM at a fixed rate (16 kHz for calls,
//! 8 kHz for voice notes); devices rarely offer that natively, so both
//! directions downmix/upmix channels and resample between the device rate
//! and the requested wire rate. Frames cross thread boundaries as raw
//! little-endian byte vectors.

use std::sync::mpsc as std_mpsc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;

use parley_shared::config;

/// Device stream parameters resolved at runtime.
struct DeviceStreamParams {
    stream_config: cpal::StreamConfig,
    channels: u16,
    sample_rate: u32,
}

/// Resolve stream parameters for the given device.
/// On Windows (WASAPI shared mode) the device rejects anything that doesn't
/// match its mixer format, so we use the full default config and resample.
/// On other platforms we request the wire format directly.
fn resolve_stream_params(
    device: &cpal::Device,
    is_input: bool,
    rate: u32,
    frame_samples: usize,
) -> Result<DeviceStreamParams> {
    #[cfg(target_os = "windows")]
    {
        let _ = (rate, frame_samples);
        let native = if is_input {
            device.default_input_config()
        } else {
            device.default_output_config()
        }
        .context("failed to get default stream config")?;

        Ok(DeviceStreamParams {
            channels: native.channels(),
            sample_rate: native.sample_rate().0,
            stream_config: native.config(),
        })
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = (device, is_input);
        Ok(DeviceStreamParams {
            stream_config: cpal::StreamConfig {
                channels: config::AUDIO_CHANNELS,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Fixed(frame_samples as u32),
            },
            channels: config::AUDIO_CHANNELS,
            sample_rate: rate,
        })
    }
}

/// Linear-interpolation resampler. Speech at these rates doesn't warrant
/// anything fancier.
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let step = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / step).ceil() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let left = pos as usize;
            let t = (pos - left as f64) as f32;
            match (input.get(left), input.get(left + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * t,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

fn sample_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Fold interleaved device samples down to mono.
fn push_mono(out: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Move buffered mono samples into the interleaved output slice, padding
/// the tail with silence when the queue runs short.
fn fill_output(data: &mut [f32], queue: &mut Vec<f32>, channels: usize) {
    let wanted = data.len() / channels;
    let take = queue.len().min(wanted);
    for (frame, &sample) in data.chunks_exact_mut(channels).zip(queue.iter()) {
        frame.fill(sample);
    }
    queue.drain(..take);
    for rest in &mut data[take * channels..] {
        *rest = 0.0;
    }
}

fn sample_to_f32(s: i16) -> f32 {
    s as f32 / 32768.0
}

/// One row of the `/devices` listing.
pub struct DeviceEntry {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

fn side(input: bool) -> &'static str {
    if input {
        "input"
    } else {
        "output"
    }
}

/// Every usable device on one side, paired with its reported name.
/// Devices that refuse to give a name are skipped; they cannot be
/// selected or shown anyway.
fn named_devices(host: &cpal::Host, input: bool) -> Result<Vec<(cpal::Device, String)>> {
    let devices: Vec<cpal::Device> = if input {
        host.input_devices()
            .with_context(|| format!("failed to enumerate {} devices", side(input)))?
            .collect()
    } else {
        host.output_devices()
            .with_context(|| format!("failed to enumerate {} devices", side(input)))?
            .collect()
    };
    Ok(devices
        .into_iter()
        .filter_map(|d| d.name().ok().map(|n| (d, n)))
        .collect())
}

fn system_default(host: &cpal::Host, input: bool) -> Option<cpal::Device> {
    if input {
        host.default_input_device()
    } else {
        host.default_output_device()
    }
}

/// Enumerate one side for display, marking the system default.
pub fn list_devices(input: bool) -> Result<Vec<DeviceEntry>> {
    let host = cpal::default_host();
    let default_name = system_default(&host, input).and_then(|d| d.name().ok());
    Ok(named_devices(&host, input)?
        .into_iter()
        .enumerate()
        .map(|(index, (_, name))| DeviceEntry {
            index,
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect())
}

/// Resolve the user's configured device name, falling back to the system
/// default when none is set.
fn pick_device(wanted: Option<&str>, input: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(wanted) = wanted {
        return named_devices(&host, input)?
            .into_iter()
            .find(|(_, name)| name == wanted)
            .map(|(device, _)| device)
            .with_context(|| format!("{} device '{}' not found", side(input), wanted));
    }
    system_default(&host, input).with_context(|| format!("no {} device available", side(input)))
}

/// Start capturing `frame_bytes`-sized PCM frames at `rate` Hz.
/// Returns the stream handle (must be kept alive) and a receiver of frames.
pub fn start_capture(
    device_name: Option<&str>,
    rate: u32,
    frame_bytes: usize,
) -> Result<(Stream, std_mpsc::Receiver<Vec<u8>>)> {
    let device = pick_device(device_name, true)?;
    tracing::info!("input device: {}", device.name().unwrap_or_default());

    let frame_samples = frame_bytes / 2;
    let params = resolve_stream_params(&device, true, rate, frame_samples)?;
    tracing::info!(
        "input: {}ch {}Hz (need {}ch {}Hz)",
        params.channels,
        params.sample_rate,
        config::AUDIO_CHANNELS,
        rate
    );

    let device_channels = params.channels;
    let device_rate = params.sample_rate;

    // How many mono samples at device rate make one wire frame.
    let device_frame_size =
        (device_rate as f64 * frame_samples as f64 / rate as f64).round() as usize;

    let (tx, rx) = std_mpsc::channel::<Vec<u8>>();

    // Accumulate mono samples at device sample rate.
    let mut accumulator: Vec<f32> = Vec::with_capacity(device_frame_size * 2);

    let stream = device.build_input_stream(
        &params.stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            push_mono(&mut accumulator, data, device_channels as usize);

            // Drain in device-frame-sized chunks, resample, emit bytes
            while accumulator.len() >= device_frame_size {
                let chunk: Vec<f32> = accumulator.drain(..device_frame_size).collect();
                let resampled = resample(&chunk, device_rate, rate);
                let mut frame = vec![0u8; frame_samples * 2];
                for (i, slot) in frame.chunks_exact_mut(2).enumerate() {
                    let sample = resampled.get(i).copied().unwrap_or(0.0);
                    slot.copy_from_slice(&sample_to_i16(sample).to_le_bytes());
                }
                let _ = tx.send(frame);
            }
        },
        |err| {
            tracing::error!("input stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, rx))
}

/// Start playing PCM sent as raw little-endian `i16` bytes at `rate` Hz.
/// `max_buffered` caps queued samples (at `rate`) to bound latency; `None`
/// keeps everything, which is what voice-note playback wants.
pub fn start_playback(
    device_name: Option<&str>,
    rate: u32,
    max_buffered: Option<usize>,
) -> Result<(Stream, std_mpsc::Sender<Vec<u8>>)> {
    let device = pick_device(device_name, false)?;
    tracing::info!("output device: {}", device.name().unwrap_or_default());

    let params = resolve_stream_params(&device, false, rate, config::FRAME_SAMPLES)?;
    tracing::info!(
        "output: {}ch {}Hz (need {}ch {}Hz)",
        params.channels,
        params.sample_rate,
        config::AUDIO_CHANNELS,
        rate
    );

    let device_channels = params.channels;
    let device_rate = params.sample_rate;
    let cap = max_buffered.map(|samples| {
        (samples as f64 * device_rate as f64 / rate as f64) as usize
    });

    let (tx, rx) = std_mpsc::channel::<Vec<u8>>();

    // Buffer holds mono samples at device sample rate.
    let mut playback_buf: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        &params.stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            // Drain queued frames, resample to device rate.
            while let Ok(frame) = rx.try_recv() {
                let samples: Vec<f32> = frame
                    .chunks_exact(2)
                    .map(|b| sample_to_f32(i16::from_le_bytes([b[0], b[1]])))
                    .collect();
                playback_buf.extend(resample(&samples, rate, device_rate));
            }

            // Cap latency by dropping the oldest excess.
            if let Some(cap) = cap {
                if playback_buf.len() > cap {
                    let excess = playback_buf.len() - cap;
                    playback_buf.drain(..excess);
                }
            }

            fill_output(data, &mut playback_buf, device_channels as usize);
        },
        |err| {
            tracing::error!("output stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, tx))
}
