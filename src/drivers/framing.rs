use crate::drivers::AcquisitionError;
use crate::types::RawSample;

/// Literal line the instrument sends once a command has finished streaming.
pub const SENTINEL: &str = "done";

/// One newline-delimited line from the instrument, trimmed of surrounding whitespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record(String);

impl Record {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn into_string(self) -> String {
        self.0
    }
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
    pub fn is_sentinel(&self) -> bool {
        self.0.trim() == SENTINEL
    }
    /// Parses an `x,y` data line.
    pub fn parse_sample(&self) -> Result<RawSample, AcquisitionError> {
        let malformed = || AcquisitionError::Protocol(format!("expected 'x,y', got '{}'", self.0));
        let mut fields = self.0.split(',');
        let (Some(x), Some(y), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(malformed());
        };
        let x: f64 = x.trim().parse().map_err(|_| malformed())?;
        let y: f64 = y.trim().parse().map_err(|_| malformed())?;
        Ok(RawSample { x, y })
    }
}

/// Splits an append-only byte stream into [`Record`]s, carrying the unterminated tail between
/// calls to [`FrameDecoder::feed`].
///
/// The tail is kept as raw bytes so a multi-byte character split across two reads still decodes.
/// Once the tail grows past `max_pending` bytes without a `\n`, it is discarded and the call fails
/// with [`AcquisitionError::Protocol`]; records completed by that same call stay queued for the
/// next call or for [`FrameDecoder::take_ready`].
#[derive(Debug)]
pub struct FrameDecoder {
    leftover: Vec<u8>,
    ready: Vec<Record>,
    max_pending: usize,
}

impl FrameDecoder {
    pub fn new(max_pending: usize) -> Self {
        Self {
            leftover: Vec::new(),
            ready: Vec::new(),
            max_pending: max_pending.max(1),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Record>, AcquisitionError> {
        self.leftover.extend_from_slice(bytes);
        if let Some(last_newline) = self.leftover.iter().rposition(|&b| b == b'\n') {
            let tail = self.leftover.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.leftover, tail);
            // drop the final '\n' so split yields exactly one segment per terminated line
            let body = &complete[..complete.len() - 1];
            self.ready.extend(
                body.split(|&b| b == b'\n')
                    .map(|line| Record::new(String::from_utf8_lossy(line).trim())),
            );
        }
        if self.leftover.len() > self.max_pending {
            let dropped = self.leftover.len();
            self.leftover.clear();
            return Err(AcquisitionError::Protocol(format!(
                "{dropped} bytes without a line terminator (limit {})",
                self.max_pending
            )));
        }
        Ok(std::mem::take(&mut self.ready))
    }

    /// Bytes currently held back waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.leftover.len()
    }

    /// Records completed by a call that failed on overflow.
    pub fn take_ready(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.ready)
    }

    pub fn reset(&mut self) {
        self.leftover.clear();
        self.ready.clear();
    }
}
