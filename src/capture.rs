// src/capture.rs

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

const PIPE_CHUNK_SIZE: usize = 4096;

/// Parent stream that mirrors a child's output as it arrives.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Mirror {
    Stdout,
    Stderr,
}

impl Mirror {
    fn write_through(self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(chunk)?;
                out.flush()
            }
            Self::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(chunk)?;
                err.flush()
            }
        }
    }
}

/// Drains `reader` to exhaustion in fixed-size chunks.
///
/// Capture is byte-wise, not line-buffered: prompts and partial lines with
/// no trailing delimiter are still collected. Each chunk is appended to the
/// returned buffer in the order the OS delivers it and, when a mirror is
/// given, written through to the parent's own stream immediately.
pub(crate) fn drain<R: Read>(mut reader: R, mirror: Option<Mirror>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; PIPE_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        let received = chunk.get(..read).unwrap_or_default();
        buffer.extend_from_slice(received);
        if let Some(mirror) = mirror {
            mirror.write_through(received)?;
        }
    }
    Ok(buffer)
}

/// Spawns a named thread draining one of the child's output streams.
///
/// Both streams must drain concurrently with the wait on the child: if one
/// pipe's OS buffer fills while unread, the child blocks on write and never
/// exits.
pub(crate) fn spawn_drain<R>(
    stream: &str,
    reader: R,
    mirror: Option<Mirror>,
) -> io::Result<JoinHandle<io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("subshell-drain-{stream}"))
        .spawn(move || drain(reader, mirror))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_drain_collects_partial_lines() {
        let bytes = drain(Cursor::new(b"prompt> ".to_vec()), None).unwrap();
        assert_eq!(bytes, b"prompt> ");
    }

    #[test]
    fn test_drain_of_empty_stream_is_empty() {
        let bytes = drain(Cursor::new(Vec::new()), None).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_drain_spans_multiple_chunks() {
        let payload = vec![0xAB_u8; PIPE_CHUNK_SIZE * 3 + 17];
        let bytes = drain(Cursor::new(payload.clone()), None).unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn test_spawn_drain_delivers_through_the_join() {
        let handle = spawn_drain("stdout", Cursor::new(b"abc".to_vec()), None).unwrap();
        let bytes = handle.join().expect("drain thread panicked").unwrap();
        assert_eq!(bytes, b"abc");
    }
}
