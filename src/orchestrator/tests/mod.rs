use super::test_helpers::*;
use super::*;
use crate::error::LibraryError;
use crate::types::{AnimeSource, Event};
use tokio::sync::broadcast;


/// Every event received so far
fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
