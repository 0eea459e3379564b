//! UI event queue.
//!
//! Bus handlers run on whatever thread published or mutated. They never touch
//! the "UI" directly: they push a [`UiEvent`] here, and the main loop drains
//! the queue on its own thread.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::OnceLock;

/// Label updates produced by bus handlers.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    /// The observed counter changed.
    PropertyLabel(i64),
    /// A message arrived on the demo channel.
    ChannelLabel(String),
}

impl UiEvent {
    /// Get variant index for deduplication.
    #[inline]
    pub fn variant_index(&self) -> usize {
        match self {
            UiEvent::PropertyLabel(_) => 0,
            UiEvent::ChannelLabel(_) => 1,
        }
    }

    /// Text shown for this label.
    pub fn label_text(&self) -> String {
        match self {
            UiEvent::PropertyLabel(value) => format!("Observed property value: {}", value),
            UiEvent::ChannelLabel(message) => format!("Observed channel value:\n{}", message),
        }
    }
}

// Static queue - handlers get the sender, the main loop the receiver.
static UI_QUEUE: OnceLock<(Sender<UiEvent>, Receiver<UiEvent>)> = OnceLock::new();

fn get_queue() -> &'static (Sender<UiEvent>, Receiver<UiEvent>) {
    UI_QUEUE.get_or_init(crossbeam_channel::unbounded)
}

/// Sender end of the UI queue, handed to bus handlers.
pub fn sender() -> Sender<UiEvent> {
    get_queue().0.clone()
}

/// Receiver end of the UI queue.
pub fn receiver() -> Receiver<UiEvent> {
    get_queue().1.clone()
}

/// Drain all pending events, keeping only the latest per variant.
#[inline]
pub fn drain_latest(rx: &Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::with_capacity(4);

    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }

    if events.len() <= 1 {
        return events;
    }

    // Labels only show the newest value
    let mut seen = [false; 2];
    let mut result = Vec::with_capacity(events.len());

    for event in events.into_iter().rev() {
        let idx = event.variant_index();
        if !seen[idx] {
            seen[idx] = true;
            result.push(event);
        }
    }

    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_latest_per_variant() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(UiEvent::PropertyLabel(1)).unwrap();
        tx.send(UiEvent::ChannelLabel("a".to_string())).unwrap();
        tx.send(UiEvent::PropertyLabel(2)).unwrap();
        tx.send(UiEvent::PropertyLabel(3)).unwrap();

        let events = drain_latest(&rx);
        assert_eq!(
            events,
            vec![UiEvent::ChannelLabel("a".to_string()), UiEvent::PropertyLabel(3)]
        );
        assert!(drain_latest(&rx).is_empty());
    }

    #[test]
    fn test_drain_single_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(UiEvent::ChannelLabel("only".to_string())).unwrap();
        assert_eq!(drain_latest(&rx), vec![UiEvent::ChannelLabel("only".to_string())]);
    }

    #[test]
    fn test_label_text() {
        assert_eq!(
            UiEvent::PropertyLabel(4).label_text(),
            "Observed property value: 4"
        );
        assert_eq!(
            UiEvent::ChannelLabel("hi".to_string()).label_text(),
            "Observed channel value:\nhi"
        );
    }
}
