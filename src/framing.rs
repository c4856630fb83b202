use crate::constants::{DATA_LINE_PREFIX, MAX_BUFFERED_BYTES};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

/// How one logical record is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDelimiter {
    /// Records separated by a blank line (conversation stream).
    BlankLine,
    /// One `data: `-prefixed record per line (execution stream). Lines
    /// without the prefix are keep-alive padding and are skipped.
    DataLine,
}

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream output exceeded {0} bytes")]
    Truncated(usize),
}

/// Incremental record framer. Accumulates arbitrarily split chunks and
/// yields each complete record exactly once, retaining any trailing partial
/// record until its delimiter arrives. Feeding the stream one byte at a time
/// must produce the same record sequence as feeding it whole.
#[derive(Debug)]
pub struct RecordCodec {
    delimiter: RecordDelimiter,
    max_buffered: usize,
    truncated: bool,
}

impl RecordCodec {
    pub fn new(delimiter: RecordDelimiter) -> Self {
        Self::with_max_buffered(delimiter, MAX_BUFFERED_BYTES)
    }

    pub fn with_max_buffered(delimiter: RecordDelimiter, max_buffered: usize) -> Self {
        Self {
            delimiter,
            max_buffered,
            truncated: false,
        }
    }

    pub fn blank_line_delimited() -> Self {
        Self::new(RecordDelimiter::BlankLine)
    }

    pub fn data_line_delimited() -> Self {
        Self::new(RecordDelimiter::DataLine)
    }

    /// True once the buffer cap was hit. No further records are framed for
    /// this stream after that point.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn next_blank_line_record(src: &mut BytesMut) -> Option<String> {
        loop {
            let pos = src.windows(2).position(|w| w == b"\n\n")?;
            let record = src.split_to(pos + 2);
            let text = String::from_utf8_lossy(&record[..pos]).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    fn next_data_line_record(src: &mut BytesMut) -> Option<String> {
        loop {
            let pos = src.iter().position(|b| *b == b'\n')?;
            let line = src.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]);
            let line = line.trim_end_matches('\r');
            if let Some(data) = line.strip_prefix(DATA_LINE_PREFIX) {
                if !data.trim().is_empty() {
                    return Some(data.to_string());
                }
            }
        }
    }

    fn flush_remainder(&self, src: &mut BytesMut) -> Option<String> {
        let rest = src.split_to(src.len());
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        match self.delimiter {
            RecordDelimiter::BlankLine if !text.is_empty() => Some(text),
            RecordDelimiter::DataLine => {
                let data = text.strip_prefix(DATA_LINE_PREFIX)?;
                if data.trim().is_empty() {
                    None
                } else {
                    Some(data.to_string())
                }
            }
            _ => None,
        }
    }
}

impl Decoder for RecordCodec {
    type Item = String;
    type Error = FramingError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<String>, FramingError> {
        if self.truncated {
            src.advance(src.len());
            return Ok(None);
        }
        let record = match self.delimiter {
            RecordDelimiter::BlankLine => Self::next_blank_line_record(src),
            RecordDelimiter::DataLine => Self::next_data_line_record(src),
        };
        // The cap bounds the retained unframed remainder, not the raw chunk:
        // a large chunk made of complete records frames the same as the same
        // bytes split small.
        if record.is_none() && src.len() > self.max_buffered {
            self.truncated = true;
            src.advance(src.len());
            return Err(FramingError::Truncated(self.max_buffered));
        }
        Ok(record)
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<String>, FramingError> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            // The producer may close the stream without a trailing
            // delimiter; the remainder is still one record.
            None if !src.is_empty() && !self.truncated => Ok(self.flush_remainder(src)),
            None => Ok(None),
        }
    }
}
