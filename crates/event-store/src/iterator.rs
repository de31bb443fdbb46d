use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::{Event, Result};

/// A stream of decoded events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Forward-only cursor over stored events.
///
/// The sequence is finite and cannot be restarted. Call [`advance`] until it
/// returns `Ok(false)`, reading each event through [`current`]. A PostgreSQL
/// cursor keeps its pooled connection until the iterator is exhausted,
/// [`close`]d or dropped. `close` may be called any number of times.
///
/// The iterator is also a [`Stream`] of `Result<Event>`.
///
/// [`advance`]: EventIterator::advance
/// [`current`]: EventIterator::current
/// [`close`]: EventIterator::close
pub struct EventIterator {
    stream: Option<EventStream>,
    current: Option<Event>,
}

impl EventIterator {
    /// Wraps a stream of events.
    pub fn new(stream: EventStream) -> Self {
        Self {
            stream: Some(stream),
            current: None,
        }
    }

    /// An iterator over events already in memory.
    pub fn from_events(events: Vec<Event>) -> Self {
        Self::new(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }

    /// Moves to the next event.
    ///
    /// Returns `Ok(false)` once the sequence is exhausted or the iterator is
    /// closed. A row that fails to decode is reported as an error and
    /// skipped; a database error ends the sequence.
    pub async fn advance(&mut self) -> Result<bool> {
        self.current = None;
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };

        match stream.next().await {
            Some(Ok(event)) => {
                self.current = Some(event);
                Ok(true)
            }
            Some(Err(err)) => Err(err),
            None => {
                self.close();
                Ok(false)
            }
        }
    }

    /// The event the last successful `advance` moved to.
    pub fn current(&self) -> Option<&Event> {
        self.current.as_ref()
    }

    /// Takes the current event out of the iterator.
    pub fn take_current(&mut self) -> Option<Event> {
        self.current.take()
    }

    /// Releases the underlying cursor. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.stream = None;
        self.current = None;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Drains the remaining events and closes the iterator.
    pub async fn collect_all(mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while self.advance().await? {
            if let Some(event) = self.take_current() {
                events.push(event);
            }
        }
        self.close();
        Ok(events)
    }
}

impl std::fmt::Debug for EventIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIterator")
            .field("closed", &self.is_closed())
            .field("current", &self.current)
            .finish()
    }
}

impl Stream for EventIterator {
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(None);
        };

        let polled = stream.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            this.close();
        }
        polled
    }
}

/// Repeatable query over one page of the global event log.
///
/// Every [`open`](EventPages::open) issues a fresh query; the factory does not
/// remember how far a previous iterator got. Page through the whole log by
/// asking the store for a new `EventPages` starting after the last global
/// version seen.
#[derive(Clone)]
pub struct EventPages {
    open: Arc<dyn Fn() -> EventIterator + Send + Sync>,
}

impl EventPages {
    pub fn new(open: impl Fn() -> EventIterator + Send + Sync + 'static) -> Self {
        Self {
            open: Arc::new(open),
        }
    }

    /// Starts a new iterator over the page.
    pub fn open(&self) -> EventIterator {
        (self.open)()
    }
}

impl std::fmt::Debug for EventPages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPages").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventStoreError, Version};

    fn events(n: i64) -> Vec<Event> {
        (1..=n)
            .map(|v| Event::new("cart-1", "Cart", Version::new(v), "ItemAdded"))
            .collect()
    }

    #[tokio::test]
    async fn advance_walks_events_in_order() {
        let mut iter = EventIterator::from_events(events(3));
        assert!(iter.current().is_none());

        let mut seen = Vec::new();
        while iter.advance().await.unwrap() {
            seen.push(iter.current().unwrap().version);
        }

        assert_eq!(seen, [Version::new(1), Version::new(2), Version::new(3)]);
        assert!(iter.is_closed());
        assert!(iter.current().is_none());
    }

    #[tokio::test]
    async fn exhausted_iterator_stays_exhausted() {
        let mut iter = EventIterator::from_events(Vec::new());
        assert!(!iter.advance().await.unwrap());
        assert!(!iter.advance().await.unwrap());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut iter = EventIterator::from_events(events(2));
        assert!(iter.advance().await.unwrap());

        iter.close();
        iter.close();

        assert!(iter.is_closed());
        assert!(iter.current().is_none());
        assert!(!iter.advance().await.unwrap());
    }

    #[tokio::test]
    async fn errors_surface_without_a_current_event() {
        let stream = futures_util::stream::iter(vec![
            Ok(events(1).remove(0)),
            Err(EventStoreError::InvalidBatch("broken row".to_string())),
        ]);
        let mut iter = EventIterator::new(Box::pin(stream));

        assert!(iter.advance().await.unwrap());
        assert!(iter.advance().await.is_err());
        assert!(iter.current().is_none());
        assert!(!iter.advance().await.unwrap());
    }

    #[tokio::test]
    async fn collect_all_drains_remaining_events() {
        let mut iter = EventIterator::from_events(events(4));
        assert!(iter.advance().await.unwrap());

        let rest = iter.collect_all().await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].version, Version::new(2));
    }

    #[tokio::test]
    async fn iterator_is_a_stream() {
        let collected: Vec<_> = EventIterator::from_events(events(2)).collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn pages_reopen_from_scratch() {
        let pages = EventPages::new(|| EventIterator::from_events(events(2)));

        let first = pages.open().collect_all().await.unwrap();
        let second = pages.open().collect_all().await.unwrap();
        assert_eq!(first, second);
    }
}
