//! Live Renderer
//!
//! The render thread body for device playback. It owns the pipeline and the
//! output device and runs until the control state stops it, the sequence
//! finishes in play-once mode, or the device keeps failing.
//!
//! The device is opened through a factory on the calling thread, and reopened
//! from scratch whenever it reports loss or a default device change.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::audio_engine::{AudioError, AudioSink, DeviceError};
use super::channels::RenderHandle;
use super::commands::{PlayerCommand, PlayerEvent};
use super::control::ControlState;
use super::render::RenderPipeline;
use super::sequencer::PlaybackState;
use crate::synth::Synth;

/// How long a sleeping render thread waits for input before re-checking state.
const WAKE_POLL: Duration = Duration::from_millis(100);

/// Poll interval while paused.
const PAUSE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct LiveOptions {
    /// Upper bound on a single wait for device space.
    pub device_timeout: Duration,
    /// Delay before reopening a failed device.
    pub restart_backoff: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_restarts: u32,
    /// Stop when the sequence ends instead of idling.
    pub play_once: bool,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            device_timeout: Duration::from_millis(200),
            restart_backoff: Duration::from_millis(500),
            max_restarts: 5,
            play_once: false,
        }
    }
}

/// Why a device session ended without a device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    Finished,
}

pub struct LiveRenderer<S: Synth, F> {
    pipeline: RenderPipeline<S>,
    control: Arc<ControlState>,
    handle: RenderHandle,
    open_sink: F,
    options: LiveOptions,
    scratch: Vec<f32>,
    asleep: bool,
    ended: bool,
    session_frames: u64,
}

impl<S, F> LiveRenderer<S, F>
where
    S: Synth,
    F: FnMut() -> Result<Box<dyn AudioSink>, AudioError>,
{
    pub fn new(
        pipeline: RenderPipeline<S>,
        control: Arc<ControlState>,
        handle: RenderHandle,
        open_sink: F,
        options: LiveOptions,
    ) -> Self {
        Self {
            pipeline,
            control,
            handle,
            open_sink,
            options,
            scratch: Vec::new(),
            asleep: false,
            ended: false,
            session_frames: 0,
        }
    }

    /// Runs until stopped. Returns the pipeline for reuse.
    pub fn run(mut self) -> Result<RenderPipeline<S>, AudioError> {
        let result = self.run_sessions();
        self.handle.send_event_lossy(PlayerEvent::Stopped);
        match result {
            Ok(()) => Ok(self.pipeline),
            Err(e) => {
                error!(error = %e, "render thread giving up");
                Err(e)
            }
        }
    }

    fn run_sessions(&mut self) -> Result<(), AudioError> {
        let mut failures = 0u32;
        loop {
            if !self.control.is_running() {
                return Ok(());
            }

            let last = match (self.open_sink)() {
                Ok(mut sink) => {
                    self.configure(sink.as_ref())?;
                    self.session_frames = 0;
                    match self.session(sink.as_mut()) {
                        Ok(SessionEnd::Stopped) | Ok(SessionEnd::Finished) => return Ok(()),
                        Err(e) => {
                            if self.session_frames > 0 {
                                failures = 0;
                            }
                            e.to_string()
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            failures += 1;
            if failures > self.options.max_restarts {
                return Err(AudioError::RestartsExhausted {
                    attempts: failures,
                    last,
                });
            }
            warn!(error = %last, attempt = failures, "output device failed, restarting");
            self.handle
                .send_event_lossy(PlayerEvent::DeviceLost { attempt: failures });
            self.pipeline.discard_pending();
            thread::sleep(self.options.restart_backoff);
        }
    }

    /// Matches the pipeline to the device. Mismatches the pipeline cannot
    /// follow are configuration errors and fail fast.
    fn configure(&mut self, sink: &dyn AudioSink) -> Result<(), AudioError> {
        if sink.sample_rate() != self.pipeline.output_rate() {
            self.pipeline.set_output_rate(sink.sample_rate())?;
        }
        if sink.channels() != self.pipeline.channels() {
            self.pipeline.set_channels(sink.channels())?;
        }
        self.handle.send_event_lossy(PlayerEvent::Started {
            sample_rate: sink.sample_rate(),
            channels: sink.channels(),
        });
        Ok(())
    }

    fn session(&mut self, sink: &mut dyn AudioSink) -> Result<SessionEnd, DeviceError> {
        let channels = self.pipeline.channels() as usize;
        let chunk = self
            .pipeline
            .block_output_frames()
            .min(sink.capacity_frames())
            .max(1);
        self.scratch.resize(chunk * channels, 0.0);

        loop {
            if !self.control.is_running() {
                return Ok(SessionEnd::Stopped);
            }
            while let Some(cmd) = self.handle.recv_command() {
                self.apply(cmd);
            }
            self.sync_flags();

            if self.pipeline.sequencer().at_end() {
                if !self.ended {
                    self.ended = true;
                    self.handle.send_event_lossy(PlayerEvent::Ended);
                }
                if self.options.play_once {
                    info!("sequence finished");
                    return Ok(SessionEnd::Finished);
                }
            }

            if self.pipeline.sequencer().state() == PlaybackState::Paused {
                thread::sleep(PAUSE_POLL);
                continue;
            }

            if self.pipeline.sequencer().is_asleep() {
                self.sleep_until_input();
                continue;
            }
            if self.asleep {
                self.asleep = false;
                self.handle.send_event_lossy(PlayerEvent::Awake);
            }

            if sink.available_frames()? >= chunk {
                self.pipeline.render(&mut self.scratch);
                let written = sink.write(&self.scratch)?;
                self.session_frames += written as u64;
            } else {
                sink.wait_for_space(self.options.device_timeout)?;
            }
        }
    }

    /// Blocks on the sequence's wake signal; rendering is skipped meanwhile.
    fn sleep_until_input(&mut self) {
        if !self.asleep {
            self.asleep = true;
            debug!("live input idle, suspending output");
            self.handle.send_event_lossy(PlayerEvent::Asleep);
        }
        let (sequencer, _) = self.pipeline.parts_mut();
        match sequencer.wake_signal() {
            Some(signal) => {
                if signal.wait_timeout(WAKE_POLL) {
                    sequencer.wake();
                }
            }
            None => sequencer.wake(),
        }
    }

    fn sync_flags(&mut self) {
        let looping = self.control.is_looping();
        let paused = self.control.is_paused();
        let (sequencer, _) = self.pipeline.parts_mut();
        sequencer.set_looping(looping);
        match (paused, sequencer.state()) {
            (true, PlaybackState::Playing) => sequencer.pause(),
            (false, PlaybackState::Paused) => sequencer.resume(),
            _ => {}
        }
    }

    fn apply(&mut self, cmd: PlayerCommand) {
        let (sequencer, synth) = self.pipeline.parts_mut();
        let count = sequencer.song_count();
        let current = sequencer.song_index();
        let target = match cmd {
            PlayerCommand::Restart => {
                if let Err(e) = sequencer.reset(synth) {
                    warn!(error = %e, "restart ignored");
                }
                self.ended = false;
                None
            }
            PlayerCommand::NextSong => Some(current + 1).filter(|&next| next < count),
            PlayerCommand::PreviousSong => current.checked_sub(1),
            PlayerCommand::SelectSong(index) => Some(index),
            PlayerCommand::SetGain(gain) => {
                self.pipeline.set_gain(gain);
                None
            }
            PlayerCommand::SetFilter(cutoff_hz) => {
                self.pipeline.set_filter(cutoff_hz);
                None
            }
        };

        if let Some(index) = target {
            let (sequencer, synth) = self.pipeline.parts_mut();
            match sequencer.set_song(index, synth) {
                Ok(index) => {
                    self.ended = false;
                    self.handle
                        .send_event_lossy(PlayerEvent::SongChanged { index, count });
                }
                Err(e) => warn!(error = %e, "song change ignored"),
            }
        }
    }
}
