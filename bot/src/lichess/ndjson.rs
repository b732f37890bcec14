//! Line framing for newline-delimited JSON streams.

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use rookery_env::EnvError;
use std::fmt::Display;

struct Framer<B, E> {
    body: BoxStream<'static, Result<B, E>>,
    buffer: Vec<u8>,
    done: bool,
}

impl<B, E> Framer<B, E> {
    /// Pops the next non-blank line from the buffer.
    fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            // Blank lines are keep-alives
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    fn flush(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Splits a byte stream into non-empty lines.
///
/// A body error is yielded once as `StreamClosed` and ends the stream.
pub fn split_lines<S, B, E>(body: S) -> BoxStream<'static, Result<String, EnvError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let framer = Framer {
        body: body.boxed(),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(framer, |mut framer| async move {
        loop {
            if let Some(line) = framer.next_line() {
                return Some((Ok(line), framer));
            }
            if framer.done {
                return None;
            }
            match framer.body.next().await {
                Some(Ok(chunk)) => framer.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    framer.done = true;
                    framer.buffer.clear();
                    return Some((Err(EnvError::StreamClosed(e.to_string())), framer));
                }
                None => {
                    framer.done = true;
                    return framer.flush().map(|line| (Ok(line), framer));
                }
            }
        }
    })
    .boxed()
}
