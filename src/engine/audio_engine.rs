//! Audio Engine
//!
//! The output device surface and its cpal implementation.
//!
//! Unlike a callback-driven engine, the render thread pushes: it writes rendered
//! frames into a ring that the cpal callback drains. The callback never renders,
//! allocates, locks, or logs; it copies what is there, zero-fills on underrun and
//! wakes the render thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, StreamError};
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;
use tracing::info;

use super::render::RenderError;

/// How often the default device is compared against the one in use.
const DEVICE_CHECK_INTERVAL: Duration = Duration::from_secs(2);

const STATUS_OK: u8 = 0;
const STATUS_LOST: u8 = 1;
const STATUS_ERROR: u8 = 2;

/// Errors raised while acquiring or running the output device.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device found")]
    NoOutputDevice,

    #[error("failed to get device configuration: {0}")]
    ConfigurationFailed(String),

    #[error("unsupported device sample format {0}")]
    UnsupportedFormat(String),

    #[error("failed to create audio stream: {0}")]
    StreamCreationFailed(String),

    #[error("failed to start audio playback: {0}")]
    StreamPlaybackFailed(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("output device failed {attempts} times in a row: {last}")]
    RestartsExhausted { attempts: u32, last: String },
}

/// Runtime failures of an open device. All of them trigger a restart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("output device lost")]
    Lost,

    #[error("default output device changed")]
    DefaultDeviceChanged,

    #[error("output stream error: {0}")]
    Stream(String),
}

/// An output device the render thread writes into.
///
/// Samples are interleaved with [`channels`](AudioSink::channels) channels.
pub trait AudioSink {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Total buffer size in frames.
    fn capacity_frames(&self) -> usize;

    /// Frames that can be written without blocking.
    fn available_frames(&mut self) -> Result<usize, DeviceError>;

    /// Writes as many whole frames of `samples` as fit. Returns frames written.
    fn write(&mut self, samples: &[f32]) -> Result<usize, DeviceError>;

    /// Blocks until space frees up or `timeout` elapses.
    fn wait_for_space(&mut self, timeout: Duration) -> Result<(), DeviceError>;
}

/// Information about an audio output device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub index: usize,
}

/// Lists the output devices of the default host.
pub fn output_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    host.output_devices()
        .map(|devices| {
            devices
                .enumerate()
                .filter_map(|(index, device)| {
                    device.name().ok().map(|name| DeviceInfo {
                        is_default: Some(&name) == default_name.as_ref(),
                        name,
                        index,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn default_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// Copies whole logical frames from the ring into the device buffer.
fn fill_output(
    data: &mut [f32],
    consumer: &mut Consumer<f32>,
    logical: usize,
    device_channels: usize,
) {
    for frame in data.chunks_mut(device_channels) {
        if consumer.slots() < logical {
            frame.fill(0.0);
            continue;
        }
        let left = consumer.pop().unwrap_or(0.0);
        let right = if logical > 1 {
            consumer.pop().unwrap_or(0.0)
        } else {
            left
        };
        for (ch, sample) in frame.iter_mut().enumerate() {
            *sample = match ch {
                0 => left,
                1 => right,
                _ => 0.0,
            };
        }
    }
}

/// The default cpal output device, fed through a lock-free ring.
pub struct CpalSink {
    _stream: Stream,
    producer: Producer<f32>,
    status: Arc<AtomicU8>,
    sample_rate: u32,
    channels: u16,
    capacity_frames: usize,
    device_name: String,
    last_device_check: Instant,
}

impl CpalSink {
    /// Opens the default output device.
    ///
    /// `channels` is the layout the caller will write (1 or 2); devices with fewer
    /// channels get fewer. `sample_rate` of `None` uses the device default. Must be
    /// called on the thread that will write, since the callback wakes it.
    pub fn open(buffer_frames: usize, channels: u16, sample_rate: Option<u32>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::ConfigurationFailed(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?}",
                supported.sample_format()
            )));
        }

        let device_channels = supported.channels();
        let logical = channels.min(device_channels).max(1);
        let rate = sample_rate.unwrap_or(supported.sample_rate().0);
        let config = StreamConfig {
            channels: device_channels,
            sample_rate: SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity_frames = buffer_frames.max(1);
        let (producer, mut consumer) = RingBuffer::<f32>::new(capacity_frames * logical as usize);
        let status = Arc::new(AtomicU8::new(STATUS_OK));
        let writer: Thread = thread::current();

        let stream = {
            let status = Arc::clone(&status);
            let logical = logical as usize;
            let device_channels = device_channels as usize;
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        // REAL-TIME SAFE: No allocations, no locks, no blocking
                        fill_output(data, &mut consumer, logical, device_channels);
                        writer.unpark();
                    },
                    move |err| {
                        let code = match err {
                            StreamError::DeviceNotAvailable => STATUS_LOST,
                            _ => STATUS_ERROR,
                        };
                        status.store(code, Ordering::Relaxed);
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamPlaybackFailed(e.to_string()))?;

        info!(
            device = %device_name,
            sample_rate = rate,
            channels = logical,
            buffer_frames = capacity_frames,
            "output device open"
        );

        Ok(Self {
            _stream: stream,
            producer,
            status,
            sample_rate: rate,
            channels: logical,
            capacity_frames,
            device_name,
            last_device_check: Instant::now(),
        })
    }

    fn check_status(&mut self) -> Result<(), DeviceError> {
        match self.status.load(Ordering::Relaxed) {
            STATUS_OK => {}
            STATUS_LOST => return Err(DeviceError::Lost),
            _ => return Err(DeviceError::Stream("backend error".to_string())),
        }
        if self.last_device_check.elapsed() >= DEVICE_CHECK_INTERVAL {
            self.last_device_check = Instant::now();
            match default_device_name() {
                Some(name) if name == self.device_name => {}
                Some(_) => return Err(DeviceError::DefaultDeviceChanged),
                None => return Err(DeviceError::Lost),
            }
        }
        Ok(())
    }
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    fn available_frames(&mut self) -> Result<usize, DeviceError> {
        self.check_status()?;
        Ok(self.producer.slots() / self.channels as usize)
    }

    fn write(&mut self, samples: &[f32]) -> Result<usize, DeviceError> {
        self.check_status()?;
        let channels = self.channels as usize;
        let frames = (samples.len() / channels).min(self.producer.slots() / channels);
        if frames == 0 {
            return Ok(0);
        }
        let n = frames * channels;
        let chunk = self
            .producer
            .write_chunk_uninit(n)
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        chunk.fill_from_iter(samples[..n].iter().copied());
        Ok(frames)
    }

    fn wait_for_space(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        self.check_status()?;
        if self.producer.slots() < self.channels as usize {
            thread::park_timeout(timeout);
        }
        self.check_status()
    }
}

#[cfg(test)]
pub use memory::{MemoryDevice, MemorySink};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_output_stereo_to_four_channels() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        for s in [0.1, 0.2, 0.3, 0.4] {
            producer.push(s).unwrap();
        }
        let mut data = [9.0f32; 12];
        fill_output(&mut data, &mut consumer, 2, 4);
        assert_eq!(
            data,
            [0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_fill_output_mono_duplicates() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(4);
        producer.push(0.5).unwrap();
        let mut data = [9.0f32; 4];
        fill_output(&mut data, &mut consumer, 1, 2);
        assert_eq!(data, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_output_never_splits_a_frame() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(4);
        producer.push(0.5).unwrap();
        let mut data = [9.0f32; 2];
        fill_output(&mut data, &mut consumer, 2, 2);
        assert_eq!(data, [0.0, 0.0]);
        assert_eq!(consumer.slots(), 1);
    }

    #[test]
    fn test_memory_sink_fails_after_writes() {
        let (sink, device) = MemorySink::new(48_000, 2);
        let mut sink = sink.fail_after(1);
        assert_eq!(sink.write(&[0.0; 8]), Ok(4));
        assert_eq!(sink.available_frames(), Err(DeviceError::Lost));
        assert_eq!(device.lock().unwrap().writes, 1);
    }

    #[test]
    fn test_error_messages() {
        let err = AudioError::RestartsExhausted {
            attempts: 6,
            last: DeviceError::Lost.to_string(),
        };
        assert_eq!(err.to_string(), "output device failed 6 times in a row: output device lost");
    }
}
