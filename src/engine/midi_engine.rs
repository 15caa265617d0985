//! MIDI Engine
//!
//! Live input from hardware controllers and virtual MIDI ports through midir.
//!
//! The midir callback only forwards raw bytes into a [`CaptureSink`]; all
//! interpretation happens on the render thread. Each open connection lives on its
//! own thread, which owns the platform handle from connect to close, so closing
//! waits until no callback can still be running.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use midir::{Ignore, MidiInput, MidiInputConnection};
use thiserror::Error;
use tracing::{debug, info};

use crate::queue::CaptureSink;
use crate::sequence::InputPort;

const CLIENT_NAME: &str = "sequin";
const CONNECTION_NAME: &str = "sequin-input";

/// Information about a MIDI input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Port index, as used in `//MIDIIN<index>`.
    pub index: usize,
}

/// Error type for MIDI operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MidiError {
    #[error("MIDI init error: {0}")]
    Init(String),
    #[error("MIDI connection error: {0}")]
    Connection(String),
    #[error("MIDI input port {0} not found")]
    DeviceNotFound(usize),
    #[error("no MIDI input ports available")]
    NoDevices,
}

/// Lists the available input ports.
pub fn input_ports() -> Result<Vec<MidiDeviceInfo>, MidiError> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiDeviceInfo {
            name: midi_in
                .port_name(port)
                .unwrap_or_else(|_| "Unknown".to_string()),
            index,
        })
        .collect())
}

fn connect(index: usize, sink: CaptureSink) -> Result<MidiInputConnection<CaptureSink>, MidiError> {
    let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    // System-exclusive and realtime messages are filtered by the consumer
    midi_in.ignore(Ignore::None);

    let ports = midi_in.ports();
    if ports.is_empty() {
        return Err(MidiError::NoDevices);
    }
    let port = ports.get(index).ok_or(MidiError::DeviceNotFound(index))?;
    let name = midi_in
        .port_name(port)
        .unwrap_or_else(|_| "Unknown".to_string());

    let connection = midi_in
        .connect(
            port,
            CONNECTION_NAME,
            |timestamp_us, bytes, sink: &mut CaptureSink| {
                sink.deliver((timestamp_us / 1000) as u32, bytes);
            },
            sink,
        )
        .map_err(|e| MidiError::Connection(e.to_string()))?;

    info!(port = index, name = %name, "MIDI input connected");
    Ok(connection)
}

/// midir-backed [`InputPort`].
#[derive(Default)]
pub struct MidirPort {
    worker: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl MidirPort {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputPort for MidirPort {
    fn open(&mut self, port: usize, sink: CaptureSink) -> Result<(), MidiError> {
        self.close();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("midi-input".to_string())
            .spawn(move || {
                let connection = match connect(port, sink) {
                    Ok(connection) => {
                        let _ = ready_tx.send(Ok(()));
                        connection
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Either a stop request or the port being dropped ends the wait
                let _ = stop_rx.recv();
                connection.close();
            })
            .map_err(|e| MidiError::Init(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some((stop_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(MidiError::Connection("input thread exited".to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some((stop, handle)) = self.worker.take() {
            let _ = stop.send(());
            let _ = handle.join();
            debug!("MIDI input closed");
        }
    }
}

impl Drop for MidirPort {
    fn drop(&mut self) {
        self.close();
    }
}
