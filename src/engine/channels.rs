//! Player Channels
//!
//! Lock-free communication between the control thread and the render thread.
//! Uses rtrb ring buffers for SPSC (single-producer, single-consumer) queues.

use rtrb::{Consumer, Producer, RingBuffer};

use super::commands::{PlayerCommand, PlayerEvent};

/// Default buffer size for the command queue (control -> render).
pub const DEFAULT_COMMAND_BUFFER_SIZE: usize = 64;

/// Default buffer size for the event queue (render -> control).
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Holds both directions of communication.
/// Split into one handle per thread.
pub struct PlayerChannels {
    command_tx: Producer<PlayerCommand>,
    command_rx: Consumer<PlayerCommand>,
    event_tx: Producer<PlayerEvent>,
    event_rx: Consumer<PlayerEvent>,
}

impl PlayerChannels {
    pub fn new(command_capacity: usize, event_capacity: usize) -> Self {
        let (command_tx, command_rx) = RingBuffer::new(command_capacity);
        let (event_tx, event_rx) = RingBuffer::new(event_capacity);

        Self {
            command_tx,
            command_rx,
            event_tx,
            event_rx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_COMMAND_BUFFER_SIZE, DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Splits into the control-side and render-side handles.
    pub fn split(self) -> (ControlHandle, RenderHandle) {
        (
            ControlHandle {
                command_tx: self.command_tx,
                event_rx: self.event_rx,
            },
            RenderHandle {
                command_rx: self.command_rx,
                event_tx: self.event_tx,
            },
        )
    }
}

/// Control-side handle: sends commands, receives events.
pub struct ControlHandle {
    command_tx: Producer<PlayerCommand>,
    event_rx: Consumer<PlayerEvent>,
}

impl ControlHandle {
    /// Queues a command. Returns `Err(cmd)` if the buffer is full.
    ///
    /// Never blocks.
    pub fn send_command(&mut self, cmd: PlayerCommand) -> Result<(), PlayerCommand> {
        self.command_tx
            .push(cmd)
            .map_err(|rtrb::PushError::Full(cmd)| cmd)
    }

    pub fn recv_event(&mut self) -> Option<PlayerEvent> {
        self.event_rx.pop().ok()
    }

    /// Drains all pending events.
    pub fn drain_events(&mut self) -> impl Iterator<Item = PlayerEvent> + '_ {
        std::iter::from_fn(|| self.recv_event())
    }
}

/// Render-side handle: receives commands, sends events.
///
/// Nothing here blocks or allocates.
pub struct RenderHandle {
    command_rx: Consumer<PlayerCommand>,
    event_tx: Producer<PlayerEvent>,
}

impl RenderHandle {
    pub fn recv_command(&mut self) -> Option<PlayerCommand> {
        self.command_rx.pop().ok()
    }

    /// Sends an event, dropping it if the control side is not keeping up.
    pub fn send_event_lossy(&mut self, event: PlayerEvent) {
        let _ = self.event_tx.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_send_receive() {
        let (mut control, mut render) = PlayerChannels::new(8, 8).split();
        assert!(control.send_command(PlayerCommand::NextSong).is_ok());
        assert_eq!(render.recv_command(), Some(PlayerCommand::NextSong));
        assert_eq!(render.recv_command(), None);
    }

    #[test]
    fn test_buffer_full_returns_command() {
        let (mut control, _render) = PlayerChannels::new(1, 1).split();
        assert!(control.send_command(PlayerCommand::Restart).is_ok());
        assert_eq!(
            control.send_command(PlayerCommand::SelectSong(3)),
            Err(PlayerCommand::SelectSong(3))
        );
    }

    #[test]
    fn test_lossy_events() {
        let (mut control, mut render) = PlayerChannels::new(1, 1).split();
        render.send_event_lossy(PlayerEvent::Ended);
        render.send_event_lossy(PlayerEvent::Asleep); // dropped
        let events: Vec<_> = control.drain_events().collect();
        assert_eq!(events, vec![PlayerEvent::Ended]);
    }

    #[test]
    fn test_commands_arrive_in_order() {
        let (mut control, mut render) = PlayerChannels::with_defaults().split();
        control.send_command(PlayerCommand::SetGain(0.5)).unwrap();
        control.send_command(PlayerCommand::PreviousSong).unwrap();

        let seen: Vec<_> = std::iter::from_fn(|| render.recv_command()).collect();
        assert_eq!(seen, vec![PlayerCommand::SetGain(0.5), PlayerCommand::PreviousSong]);
        assert_eq!(render.recv_command(), None);
    }

    #[test]
    fn test_handles_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ControlHandle>();
        assert_send::<RenderHandle>();
    }
}
