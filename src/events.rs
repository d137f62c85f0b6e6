use crossterm::event::Event;

use crate::bridge::wire::ChannelEvent;

#[derive(Debug)]
pub enum AppEvent {
    Input(Event),
    Tick,
    /// Inbound channel traffic, tagged with the listener binding epoch so
    /// deliveries from a superseded binding can be dropped.
    Channel {
        session: String,
        epoch: u64,
        event: ChannelEvent,
    },
}
