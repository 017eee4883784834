use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("malformed range '{0}'")]
    Malformed(String),

    #[error("range end {end} precedes start {start}")]
    Inverted { start: u64, end: u64 },

    #[error("suffix range must request at least one byte")]
    EmptySuffix,

    #[error("range start {start} is beyond resource length {len}")]
    Unsatisfiable { start: u64, len: u64 },
}

/// A byte range in one of the three accepted forms.
///
/// Grammar (an optional `bytes=` prefix is allowed):
/// - `start-end` both inclusive
/// - `start-` from `start` to the end
/// - `-n` the last `n` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    FromTo { start: u64, end: u64 },
    From { start: u64 },
    Suffix { len: u64 },
}

fn parse_offset(raw: &str, input: &str) -> Result<u64, RangeError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed(input.to_string()));
    }
    raw.parse()
        .map_err(|_| RangeError::Malformed(input.to_string()))
}

impl ByteRange {
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix("bytes=").unwrap_or(trimmed);
        let (start, end) = body
            .split_once('-')
            .ok_or_else(|| RangeError::Malformed(input.to_string()))?;

        match (start.is_empty(), end.is_empty()) {
            (true, true) => Err(RangeError::Malformed(input.to_string())),
            (true, false) => {
                let len = parse_offset(end, input)?;
                if len == 0 {
                    return Err(RangeError::EmptySuffix);
                }
                Ok(Self::Suffix { len })
            }
            (false, true) => Ok(Self::From {
                start: parse_offset(start, input)?,
            }),
            (false, false) => {
                let start = parse_offset(start, input)?;
                let end = parse_offset(end, input)?;
                if end < start {
                    return Err(RangeError::Inverted { start, end });
                }
                Ok(Self::FromTo { start, end })
            }
        }
    }

    /// Resolve against a resource of `len` bytes into a half-open index range.
    ///
    /// A start at or past the end is unsatisfiable; an end past the last byte
    /// is clamped; a suffix longer than the resource yields all of it.
    pub fn resolve(&self, len: usize) -> Result<Range<usize>, RangeError> {
        let total = len as u64;
        let (start, end) = match *self {
            Self::FromTo { start, end } => (start, end.saturating_add(1).min(total)),
            Self::From { start } => (start, total),
            Self::Suffix { len } => (total.saturating_sub(len), total),
        };

        if !matches!(self, Self::Suffix { .. }) && start >= total {
            return Err(RangeError::Unsatisfiable { start, len: total });
        }

        Ok(start as usize..end as usize)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromTo { start, end } => write!(f, "{}-{}", start, end),
            Self::From { start } => write!(f, "{}-", start),
            Self::Suffix { len } => write!(f, "-{}", len),
        }
    }
}

impl FromStr for ByteRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The slice actually served; `end` is exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    pub fn new(range: &Range<usize>, total: usize) -> Self {
        Self {
            start: range.start as u64,
            end: range.end as u64,
            total: total as u64,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(ByteRange::parse("0-99").unwrap(), ByteRange::FromTo { start: 0, end: 99 });
        assert_eq!(ByteRange::parse("bytes=10-").unwrap(), ByteRange::From { start: 10 });
        assert_eq!(ByteRange::parse("-5").unwrap(), ByteRange::Suffix { len: 5 });
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "-", "abc", "1-2-3", "+1-2", "1 - 2", "bytes=", "5"] {
            assert!(ByteRange::parse(input).is_err(), "{}", input);
        }
        assert_eq!(ByteRange::parse("9-3"), Err(RangeError::Inverted { start: 9, end: 3 }));
        assert_eq!(ByteRange::parse("-0"), Err(RangeError::EmptySuffix));
    }

    #[test]
    fn test_resolve() {
        let len = 100;
        assert_eq!(ByteRange::parse("-10").unwrap().resolve(len).unwrap(), 90..100);
        assert_eq!(ByteRange::parse("40-").unwrap().resolve(len).unwrap(), 40..100);
        assert_eq!(ByteRange::parse("0-0").unwrap().resolve(len).unwrap(), 0..1);
        assert_eq!(ByteRange::parse("95-500").unwrap().resolve(len).unwrap(), 95..100);
        assert_eq!(ByteRange::parse("-500").unwrap().resolve(len).unwrap(), 0..100);
    }

    #[test]
    fn test_start_past_end_is_unsatisfiable() {
        assert_eq!(
            ByteRange::parse("100-").unwrap().resolve(100),
            Err(RangeError::Unsatisfiable { start: 100, len: 100 })
        );
        assert!(ByteRange::parse("150-200").unwrap().resolve(100).is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["3-7", "3-", "-7"] {
            assert_eq!(ByteRange::parse(input).unwrap().to_string(), input);
        }
    }
}
