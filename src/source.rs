//! Event sources feeding the ingestion workers.

use crate::counter_map::CounterDelta;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

/// Delivers increment events one at a time. `None` ends the stream.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<CounterDelta>;
}

/// Delivers whole records (e.g. a post with several tags). Each record is
/// one event for the flush threshold, however many deltas it carries.
#[async_trait]
pub trait RecordSource: Send {
    async fn next_record(&mut self) -> Option<Vec<CounterDelta>>;
}

#[async_trait]
impl<S: EventSource> RecordSource for S {
    async fn next_record(&mut self) -> Option<Vec<CounterDelta>> {
        self.next_event().await.map(|delta| vec![delta])
    }
}

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Finite stream of random lowercase tags, each with delta 1.
///
/// With the default two-letter tags there are 676 distinct keys, so a few
/// thousand events already fold many increments into each key.
pub struct GeneratorSource {
    remaining: u64,
    tag_len: usize,
    rng: StdRng,
}

impl GeneratorSource {
    pub fn new(events: u64, tag_len: usize) -> Self {
        Self::with_rng(events, tag_len, StdRng::from_entropy())
    }

    /// Deterministic stream for tests and benchmarks.
    pub fn seeded(events: u64, tag_len: usize, seed: u64) -> Self {
        Self::with_rng(events, tag_len, StdRng::seed_from_u64(seed))
    }

    fn with_rng(events: u64, tag_len: usize, rng: StdRng) -> Self {
        Self {
            remaining: events,
            tag_len: tag_len.max(1),
            rng,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn random_tag(&mut self) -> String {
        (0..self.tag_len)
            .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

#[async_trait]
impl EventSource for GeneratorSource {
    async fn next_event(&mut self) -> Option<CounterDelta> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(CounterDelta::new(self.random_tag(), 1))
    }
}

/// Finite stream of random posts, each tagged with 1 to `max_tags` random
/// lowercase tags (delta 1 per tag).
pub struct PostSource {
    tags: GeneratorSource,
    remaining: u64,
    max_tags: usize,
}

impl PostSource {
    pub fn new(posts: u64, tag_len: usize, max_tags: usize) -> Self {
        Self::with_tags(posts, GeneratorSource::new(u64::MAX, tag_len), max_tags)
    }

    pub fn seeded(posts: u64, tag_len: usize, max_tags: usize, seed: u64) -> Self {
        Self::with_tags(
            posts,
            GeneratorSource::seeded(u64::MAX, tag_len, seed),
            max_tags,
        )
    }

    fn with_tags(posts: u64, tags: GeneratorSource, max_tags: usize) -> Self {
        Self {
            tags,
            remaining: posts,
            max_tags: max_tags.max(1),
        }
    }
}

#[async_trait]
impl RecordSource for PostSource {
    async fn next_record(&mut self) -> Option<Vec<CounterDelta>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let count = self.tags.rng.gen_range(1..=self.max_tags);
        let post = (0..count)
            .map(|_| CounterDelta::new(self.tags.random_tag(), 1))
            .collect();
        Some(post)
    }
}

/// Replays a fixed sequence of events.
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = CounterDelta> + Send,
{
    pub fn new(events: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: events.into_iter(),
        }
    }
}

#[async_trait]
impl<I> EventSource for IterSource<I>
where
    I: Iterator<Item = CounterDelta> + Send,
{
    async fn next_event(&mut self) -> Option<CounterDelta> {
        self.inner.next()
    }
}

/// Events pushed by another task, e.g. a message queue consumer.
/// The stream ends when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<CounterDelta>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<CounterDelta>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<CounterDelta> {
        self.rx.recv().await
    }
}

/// Adapts any `Stream` of deltas, e.g. a decoded consumer stream.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S>
where
    S: Stream<Item = CounterDelta> + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> EventSource for StreamSource<S>
where
    S: Stream<Item = CounterDelta> + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<CounterDelta> {
        self.stream.next().await
    }
}
