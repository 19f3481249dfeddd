//! The lazy pull-stream primitive (component A).
//!
//! Every layer of this crate -- the byte bridge, the decoded code-point
//! stream, the tokenizers, and the signal streams handed back to callers --
//! is the same [`Stream<T>`]. Nothing is produced before a consumer calls
//! [`Stream::next`] or [`Stream::peek`]; there is no background thread, no
//! internal buffering beyond a one-item push-back slot.

use crate::error::{Error, Result};

/// One step of a stream: either an item, or end-of-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<T> {
    Some(T),
    End,
}

impl<T> Item<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Item<U> {
        match self {
            Item::Some(t) => Item::Some(f(t)),
            Item::End => Item::End,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Item::Some(t) => Some(t),
            Item::End => None,
        }
    }
}

/// Internal step function a [`Stream`] is built from.
///
/// Returning `Err` puts the stream into a permanently-failed state: every
/// subsequent call returns a clone of the same error, matching the
/// propagation policy of [`crate::error::Error`] out of a failed `report`
/// callback.
type StepFn<'a, T> = Box<dyn FnMut() -> Result<Item<T>> + 'a>;

enum State<'a, T> {
    Live(StepFn<'a, T>),
    Failed(Error),
    Done,
}

/// A single-consumer, not-restartable pull stream of `T`.
pub struct Stream<'a, T> {
    state: State<'a, T>,
    pushed: Option<T>,
    peeked: Option<Item<T>>,
}

impl<'a, T> Stream<'a, T> {
    /// Builds a stream from a raw step closure.
    pub fn from_fn(step: impl FnMut() -> Result<Item<T>> + 'a) -> Self {
        Stream {
            state: State::Live(Box::new(step)),
            pushed: None,
            peeked: None,
        }
    }

    /// A stream that is immediately empty.
    pub fn empty() -> Self {
        Stream::from_fn(|| Ok(Item::End))
    }

    /// Builds a stream that yields every item of the given iterator in order.
    pub fn of_list(items: impl IntoIterator<Item = T> + 'a) -> Self {
        let mut iter = items.into_iter();
        Stream::from_fn(move || Ok(iter.next().map(Item::Some).unwrap_or(Item::End)))
    }

    /// Advances the stream and returns the next item, or `Item::End`.
    pub fn next(&mut self) -> Result<Item<T>> {
        if let Some(t) = self.pushed.take() {
            return Ok(Item::Some(t));
        }
        if let Some(item) = self.peeked.take() {
            return Ok(item);
        }
        self.step()
    }

    /// Returns the next item without advancing the stream.
    pub fn peek(&mut self) -> Result<&Item<T>> {
        if self.pushed.is_some() {
            // Materialize the pushed-back item into the peek slot so that
            // a single `&Item<T>` reference can be returned uniformly.
            let t = self.pushed.take().unwrap();
            self.peeked = Some(Item::Some(t));
        }
        if self.peeked.is_none() {
            let item = self.step()?;
            self.peeked = Some(item);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    /// Restores one item to the head of the stream.
    ///
    /// Only one pending push-back is supported at a time: pushing while a
    /// push-back is already outstanding replaces it, which is always safe
    /// because every caller in this crate pushes back immediately after a
    /// single look-ahead `next`/`peek`.
    pub fn push(&mut self, item: T) {
        self.pushed = Some(item);
    }

    fn step(&mut self) -> Result<Item<T>> {
        match &mut self.state {
            State::Done => Ok(Item::End),
            State::Failed(e) => Err(e.clone()),
            State::Live(f) => match f() {
                Ok(Item::End) => {
                    self.state = State::Done;
                    Ok(Item::End)
                }
                Ok(item) => Ok(item),
                Err(e) => {
                    self.state = State::Failed(e.clone());
                    Err(e)
                }
            },
        }
    }

    /// Maps every item through `f`, lazily.
    pub fn map<U: 'a>(mut self, mut f: impl FnMut(T) -> U + 'a) -> Stream<'a, U>
    where
        T: 'a,
    {
        Stream::from_fn(move || Ok(self.next()?.map(&mut f)))
    }

    /// Filters items, lazily.
    pub fn filter(mut self, mut pred: impl FnMut(&T) -> bool + 'a) -> Stream<'a, T>
    where
        T: 'a,
    {
        Stream::from_fn(move || loop {
            match self.next()? {
                Item::End => return Ok(Item::End),
                Item::Some(t) => {
                    if pred(&t) {
                        return Ok(Item::Some(t));
                    }
                }
            }
        })
    }

    /// Maps and filters in one lazy pass.
    pub fn filter_map<U: 'a>(mut self, mut f: impl FnMut(T) -> Option<U> + 'a) -> Stream<'a, U>
    where
        T: 'a,
    {
        Stream::from_fn(move || loop {
            match self.next()? {
                Item::End => return Ok(Item::End),
                Item::Some(t) => {
                    if let Some(u) = f(t) {
                        return Ok(Item::Some(u));
                    }
                }
            }
        })
    }

    /// Strictly folds the whole stream (forces full evaluation).
    pub fn fold<S>(mut self, init: S, mut f: impl FnMut(S, T) -> S) -> Result<S> {
        let mut acc = init;
        loop {
            match self.next()? {
                Item::End => return Ok(acc),
                Item::Some(t) => acc = f(acc, t),
            }
        }
    }

    /// Drives the stream to completion purely for its side effects.
    pub fn drain(mut self) -> Result<()> {
        loop {
            if let Item::End = self.next()? {
                return Ok(());
            }
        }
    }

    /// Calls `f` on every item as it is produced.
    pub fn iter(mut self, mut f: impl FnMut(&T)) -> Result<()> {
        loop {
            match self.next()? {
                Item::End => return Ok(()),
                Item::Some(t) => f(&t),
            }
        }
    }

    /// Forces the whole stream into a `Vec`, in order.
    pub fn to_list(self) -> Result<Vec<T>> {
        self.fold(Vec::new(), |mut v, t| {
            v.push(t);
            v
        })
    }
}

impl<'a> Stream<'a, u8> {
    /// Thin bridge from any `std::io::Read` to a byte stream.
    ///
    /// This is the one byte-source adapter this crate ships; richer
    /// adapters (files with their own close handle, channels, generator
    /// functions) are external collaborators and out of scope.
    pub fn from_reader(mut reader: impl std::io::Read + 'a) -> Self {
        let mut buf = [0u8; 4096];
        let mut pos = 0usize;
        let mut len = 0usize;
        Stream::from_fn(move || {
            if pos >= len {
                len = reader
                    .read(&mut buf)
                    .map_err(|e| Error::Io(e.to_string()))?;
                pos = 0;
                if len == 0 {
                    return Ok(Item::End);
                }
            }
            let b = buf[pos];
            pos += 1;
            Ok(Item::Some(b))
        })
    }
}

impl<'a> Stream<'a, u8> {
    /// Thin bridge consuming this byte stream into any `std::io::Write`.
    pub fn write_to(self, mut writer: impl std::io::Write) -> Result<()> {
        // Buffer writes so we don't call `write` once per byte.
        let mut buf = Vec::with_capacity(4096);
        let mut s = self;
        loop {
            match s.next()? {
                Item::End => break,
                Item::Some(b) => {
                    buf.push(b);
                    if buf.len() >= 4096 {
                        writer.write_all(&buf).map_err(|e| Error::Io(e.to_string()))?;
                        buf.clear();
                    }
                }
            }
        }
        if !buf.is_empty() {
            writer.write_all(&buf).map_err(|e| Error::Io(e.to_string()))?;
        }
        Ok(())
    }

    /// Forces the whole byte stream into an owned `Vec<u8>`.
    pub fn to_vec(self) -> Result<Vec<u8>> {
        self.to_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn of_list_yields_in_order() {
        let mut s = Stream::of_list(vec![1, 2, 3]);
        assert_eq!(s.next().unwrap(), Item::Some(1));
        assert_eq!(s.next().unwrap(), Item::Some(2));
        assert_eq!(s.next().unwrap(), Item::Some(3));
        assert_eq!(s.next().unwrap(), Item::End);
        // End is sticky.
        assert_eq!(s.next().unwrap(), Item::End);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut s = Stream::of_list(vec!["a", "b"]);
        assert_eq!(*s.peek().unwrap(), Item::Some("a"));
        assert_eq!(*s.peek().unwrap(), Item::Some("a"));
        assert_eq!(s.next().unwrap(), Item::Some("a"));
        assert_eq!(s.next().unwrap(), Item::Some("b"));
    }

    #[test]
    fn push_restores_one_item() {
        let mut s = Stream::of_list(vec![1, 2]);
        let first = s.next().unwrap().into_option().unwrap();
        s.push(first);
        assert_eq!(s.next().unwrap(), Item::Some(1));
        assert_eq!(s.next().unwrap(), Item::Some(2));
    }

    #[test]
    fn map_and_filter_compose_lazily() {
        let s = Stream::of_list(vec![1, 2, 3, 4, 5]);
        let doubled: Vec<i32> = s.map(|x| x * 2).filter(|x| *x > 4).to_list().unwrap();
        assert_eq!(doubled, vec![6, 8, 10]);
    }

    #[test]
    fn fold_sums() {
        let s = Stream::of_list(vec![1, 2, 3]);
        let sum = s.fold(0, |acc, x| acc + x).unwrap();
        assert_eq!(sum, 6);
    }

    #[test]
    fn from_reader_and_write_to_round_trip() {
        let data = b"hello world".to_vec();
        let s = Stream::from_reader(&data[..]);
        let out = s.to_vec().unwrap();
        assert_eq!(out, data);
    }
}
