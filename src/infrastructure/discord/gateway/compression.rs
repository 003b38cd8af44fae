use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

use super::constants::ZLIB_SUFFIX;
use super::error::{GatewayError, GatewayResult};

const INITIAL_BUFFER_SIZE: usize = 32 * 1024;
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Shared zlib context for a `compress=zlib-stream` connection.
///
/// Binary frames are buffered until one ends with the sync-flush suffix, then
/// inflated as one message. The context must be reset for every new socket.
pub struct Inflater {
    inflater: Decompress,
    compressed: Vec<u8>,
}

impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            compressed: Vec::with_capacity(4096),
        }
    }

    /// Feeds one binary frame; returns the inflated message once it is complete.
    pub fn push(&mut self, data: &[u8]) -> GatewayResult<Option<Bytes>> {
        self.compressed.extend_from_slice(data);

        if !self.is_message_complete() {
            if self.compressed.len() > MAX_BUFFER_SIZE {
                self.compressed.clear();
                return Err(GatewayError::compression(
                    "compressed message exceeds maximum size",
                ));
            }
            return Ok(None);
        }

        let result = self.inflate();
        self.compressed.clear();
        result.map(Some)
    }

    fn is_message_complete(&self) -> bool {
        self.compressed.ends_with(&ZLIB_SUFFIX)
    }

    fn inflate(&mut self) -> GatewayResult<Bytes> {
        let mut output = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                if output.capacity() >= MAX_BUFFER_SIZE {
                    return Err(GatewayError::compression(
                        "decompressed data exceeds maximum size",
                    ));
                }
                output.reserve(output.capacity().min(MAX_BUFFER_SIZE - output.capacity()));
            }

            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();

            let status = self
                .inflater
                .decompress_vec(
                    &self.compressed[offset..],
                    &mut output,
                    FlushDecompress::Sync,
                )
                .map_err(|e| GatewayError::compression(e.to_string()))?;

            let consumed = usize::try_from(self.inflater.total_in() - in_before).unwrap_or(0);
            let produced = self.inflater.total_out() - out_before;
            offset += consumed;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if offset >= self.compressed.len() && output.len() < output.capacity() {
                        break;
                    }
                    if consumed == 0 && produced == 0 && output.len() < output.capacity() {
                        return Err(GatewayError::compression("inflater stalled on input"));
                    }
                }
            }
        }

        Ok(Bytes::from(output))
    }

    pub fn reset(&mut self) {
        self.inflater.reset(true);
        self.compressed.clear();
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Compresses each message with a sync flush, like the gateway does.
    fn zlib_stream(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compress = Compress::new(Compression::default(), true);
        messages
            .iter()
            .map(|message| {
                let mut out = Vec::with_capacity(message.len() + 64);
                compress
                    .compress_vec(message, &mut out, FlushCompress::Sync)
                    .unwrap();
                assert!(out.ends_with(&ZLIB_SUFFIX));
                out
            })
            .collect()
    }

    #[test]
    fn test_incomplete_message() {
        let mut inflater = Inflater::new();
        let result = inflater.push(&[0x01, 0x02, 0x03]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_messages_share_one_context() {
        let first = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let second = br#"{"op":11,"d":null}"#;
        let frames = zlib_stream(&[first, second]);

        let mut inflater = Inflater::new();
        assert_eq!(&inflater.push(&frames[0]).unwrap().unwrap()[..], first);
        assert_eq!(&inflater.push(&frames[1]).unwrap().unwrap()[..], second);
    }

    #[test]
    fn test_message_split_across_frames() {
        let message = br#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc"}}"#;
        let frames = zlib_stream(&[message]);
        let (head, tail) = frames[0].split_at(frames[0].len() / 2);

        let mut inflater = Inflater::new();
        assert!(inflater.push(head).unwrap().is_none());
        assert_eq!(&inflater.push(tail).unwrap().unwrap()[..], message);
    }

    #[test]
    fn test_large_message_grows_buffer() {
        let message = vec![b'a'; INITIAL_BUFFER_SIZE * 3];
        let frames = zlib_stream(&[&message]);

        let mut inflater = Inflater::new();
        let inflated = inflater.push(&frames[0]).unwrap().unwrap();
        assert_eq!(inflated.len(), message.len());
    }

    #[test]
    fn test_reset_discards_partial_input() {
        let mut inflater = Inflater::new();
        assert!(inflater.push(&[1, 2, 3]).unwrap().is_none());
        inflater.reset();
        assert!(inflater.compressed.is_empty());

        let message = br#"{"op":11}"#;
        let frames = zlib_stream(&[message]);
        assert_eq!(&inflater.push(&frames[0]).unwrap().unwrap()[..], message);
    }
}
