// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The zlib stream codec for XEP-0138 stream compression.
//!
//! Each direction is one continuous zlib stream across the life of the
//! connection; every write is flushed with a sync flush so stanzas
//! reach the peer without waiting for more data.

use core::fmt;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Error while running data through the codec.
#[derive(Debug)]
pub struct CodecError(String);

impl fmt::Display for CodecError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "zlib codec error: {}", self.0)
    }
}

impl std::error::Error for CodecError {}

/// A bidirectional zlib codec.
pub struct ZlibCodec {
    compress: Compress,
    decompress: Decompress,
}

impl ZlibCodec {
    /// Creates a codec with fresh streams in both directions.
    pub fn new() -> ZlibCodec {
        ZlibCodec {
            compress: Compress::new(Compression::default(), true),
            decompress: Decompress::new(true),
        }
    }

    /// Compresses one chunk, sync-flushed.
    pub fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let mut consumed = 0usize;
        loop {
            let before = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| CodecError(e.to_string()))?;
            consumed += (self.compress.total_in() - before) as usize;
            match status {
                Status::Ok | Status::BufError => {
                    // Spare output capacity with all input consumed
                    // means the flush is complete.
                    if consumed >= data.len() && out.len() < out.capacity() {
                        return Ok(out);
                    }
                    out.reserve(1024);
                }
                Status::StreamEnd => return Ok(out),
            }
        }
    }

    /// Decompresses one chunk of the inbound stream.
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(data.len() * 4 + 64);
        let mut consumed = 0usize;
        loop {
            let before = self.decompress.total_in();
            let status = self
                .decompress
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| CodecError(e.to_string()))?;
            consumed += (self.decompress.total_in() - before) as usize;
            match status {
                Status::Ok | Status::BufError => {
                    if consumed >= data.len() && out.len() < out.capacity() {
                        return Ok(out);
                    }
                    out.reserve(1024);
                }
                Status::StreamEnd => return Ok(out),
            }
        }
    }
}

impl Default for ZlibCodec {
    fn default() -> ZlibCodec {
        ZlibCodec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut sender = ZlibCodec::new();
        let mut receiver = ZlibCodec::new();
        let stanza = b"<message to='juliet@example.com'><body>hello</body></message>";
        let wire = sender.compress(stanza).unwrap();
        assert_eq!(receiver.decompress(&wire).unwrap(), stanza);
    }

    #[test]
    fn stream_is_continuous_across_chunks() {
        let mut sender = ZlibCodec::new();
        let mut receiver = ZlibCodec::new();
        // Repetitive later chunks compress against the shared history.
        let chunks: Vec<&[u8]> = vec![b"<presence/>", b"<presence/>", b"<presence/>"];
        for chunk in chunks {
            let wire = sender.compress(chunk).unwrap();
            assert_eq!(receiver.decompress(&wire).unwrap(), chunk);
        }
    }

    #[test]
    fn split_compressed_input() {
        let mut sender = ZlibCodec::new();
        let mut receiver = ZlibCodec::new();
        let stanza = b"<iq type='get' id='1'><query xmlns='jabber:iq:roster'/></iq>";
        let wire = sender.compress(stanza).unwrap();
        let mut plain = Vec::new();
        for byte in wire {
            plain.extend(receiver.decompress(&[byte]).unwrap());
        }
        assert_eq!(plain, stanza);
    }
}
