//! Optional dedicated decompression producer thread (spec.md §5).
//!
//! The engine itself is a single-threaded pull pipeline (`Parser` then
//! each metric's `add`, in sequence). The one concession to concurrency
//! the design allows is a second thread that only reads and decompresses
//! bytes, handing filled frames to the consumer over a bounded
//! single-producer/single-consumer channel; this is explicitly not a
//! thread pool; the design "refuses to support" one (spec.md §5).

use crate::error::Error;
use crate::parser::ByteSource;
use std::io::{self, Read};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

/// Channel capacity in frames; spec.md §5 suggests 2-4.
const CHANNEL_CAPACITY: usize = 4;
const FRAME_SIZE: usize = 64 * 1024;

struct Frame {
    data: Vec<u8>,
    len: usize,
}

enum Message {
    Frame(Frame),
    Eof,
    Err(io::Error),
}

/// A `ByteSource` fed by a dedicated producer thread that runs `reader`
/// (typically a decompressor) to completion, pushing fixed-size frames
/// into a bounded channel as it goes.
pub struct ProducerSource {
    receiver: Option<Receiver<Message>>,
    current: Option<Frame>,
    pos: usize,
    done: bool,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProducerSource {
    pub fn spawn<R: Read + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = sync_channel::<Message>(CHANNEL_CAPACITY);
        let handle = thread::spawn(move || producer_loop(&mut reader, &tx));
        ProducerSource {
            receiver: Some(rx),
            current: None,
            pos: 0,
            done: false,
            handle: Some(handle),
        }
    }
}

fn producer_loop<R: Read>(reader: &mut R, tx: &SyncSender<Message>) {
    loop {
        let mut buf = vec![0u8; FRAME_SIZE];
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Message::Eof);
                return;
            }
            Ok(n) => {
                if tx.send(Message::Frame(Frame { data: buf, len: n })).is_err() {
                    return; // consumer dropped, no point reading further
                }
            }
            Err(e) => {
                let _ = tx.send(Message::Err(e));
                return;
            }
        }
    }
}

impl ByteSource for ProducerSource {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.done {
            return Ok(0);
        }
        loop {
            if let Some(frame) = &self.current {
                if self.pos < frame.len {
                    let n = (frame.len - self.pos).min(buf.len());
                    buf[..n].copy_from_slice(&frame.data[self.pos..self.pos + n]);
                    self.pos += n;
                    return Ok(n);
                }
            }
            let Some(receiver) = self.receiver.as_ref() else {
                self.done = true;
                return Ok(0);
            };
            match receiver.recv() {
                Ok(Message::Frame(frame)) => {
                    self.current = Some(frame);
                    self.pos = 0;
                }
                Ok(Message::Eof) | Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
                Ok(Message::Err(e)) => {
                    self.done = true;
                    return Err(Error::Io(e));
                }
            }
        }
    }
}

impl Drop for ProducerSource {
    fn drop(&mut self) {
        // Drop the receiver first: an in-flight blocked `send` on a full
        // channel unblocks (returns Err) as soon as its peer disconnects,
        // so the thread can always exit before we join it.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn streams_all_bytes_in_order() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let mut source = ProducerSource::spawn(Cursor::new(payload.clone()));
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = source.read_into(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);
    }

    #[test]
    fn empty_source_yields_immediate_eof() {
        let mut source = ProducerSource::spawn(Cursor::new(Vec::new()));
        let mut buf = [0u8; 16];
        assert_eq!(source.read_into(&mut buf).unwrap(), 0);
    }

    #[test]
    fn dropping_mid_stream_does_not_hang() {
        let payload = vec![0u8; FRAME_SIZE * (CHANNEL_CAPACITY + 2)];
        let source = ProducerSource::spawn(Cursor::new(payload));
        drop(source); // must not deadlock even with frames still queued
    }
}
