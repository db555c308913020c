//! Client input: text commands turned into keyboard events

use log::{debug, warn};
use shared::Direction;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Player intents, independent of how they were captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardEvent {
    Move(Direction),
    DropBomb,
    RequestMap,
    Quit,
}

/// Turns input lines into keyboard events and counts them
pub struct InputManager {
    events_read: u64,
}

impl InputManager {
    pub fn new() -> Self {
        Self { events_read: 0 }
    }

    /// Maps one input line (`w`/`up`, `a`/`left`, `s`/`down`, `d`/`right`,
    /// `b`/`bomb`, `m`/`map`, `q`/`quit`) to an event
    pub fn parse(&mut self, line: &str) -> Option<KeyboardEvent> {
        let event = match line.trim().to_ascii_lowercase().as_str() {
            "a" | "left" => KeyboardEvent::Move(Direction::Left),
            "d" | "right" => KeyboardEvent::Move(Direction::Right),
            "w" | "up" => KeyboardEvent::Move(Direction::Up),
            "s" | "down" => KeyboardEvent::Move(Direction::Down),
            "b" | "bomb" | "drop" => KeyboardEvent::DropBomb,
            "m" | "map" => KeyboardEvent::RequestMap,
            "q" | "quit" | "exit" => KeyboardEvent::Quit,
            "" => return None,
            other => {
                warn!("Unknown input {:?}", other);
                return None;
            }
        };
        self.events_read += 1;
        Some(event)
    }

    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Reads stdin line by line on its own task, forwarding events.
    ///
    /// End of input is reported as a quit.
    pub fn spawn_stdin(mut self, events: mpsc::UnboundedSender<KeyboardEvent>) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) => match self.parse(&line) {
                        Some(event) => event,
                        None => continue,
                    },
                    Ok(None) | Err(_) => KeyboardEvent::Quit,
                };

                let quit = event == KeyboardEvent::Quit;
                if events.send(event).is_err() || quit {
                    debug!("Input closed after {} events", self.events_read);
                    break;
                }
            }
        });
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
