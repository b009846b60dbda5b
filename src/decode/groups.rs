use std::io::BufRead;

use super::{DecodeError, DecodeErrorKind, LineReader, Sample};
use crate::StackKey;

/// `stack count` per line. The count follows the last space on the line, so
/// frame names may themselves contain spaces.
#[derive(Debug)]
pub struct GroupsDecoder<R> {
    lines: LineReader<R>,
    failed: bool,
}

impl<R: BufRead> GroupsDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for GroupsDecoder<R> {
    type Item = Result<Sample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.lines.next_line() {
            Ok(None) => return None,
            Ok(Some((offset, line))) => parse_group(offset, line),
            Err(err) => Err(err),
        };
        self.failed = result.is_err();
        Some(result)
    }
}

fn parse_group(offset: u64, line: &[u8]) -> Result<Sample, DecodeError> {
    let Some(split) = line.iter().rposition(|b| *b == b' ') else {
        return Err(DecodeError::at_offset(offset, DecodeErrorKind::MissingCount));
    };
    let key = StackKey::parse(&line[..split]).map_err(|kind| DecodeError::at_offset(offset, kind))?;

    let raw = &line[split + 1..];
    let count_offset = offset.saturating_add(split as u64 + 1);
    if raw.is_empty() {
        return Err(DecodeError::at_offset(count_offset, DecodeErrorKind::MissingCount));
    }
    let count = std::str::from_utf8(raw)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            DecodeError::at_offset(
                count_offset,
                DecodeErrorKind::InvalidCount(String::from_utf8_lossy(raw).into_owned()),
            )
        })?;
    Ok(Sample { key, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &[u8]) -> Result<Vec<(String, u64)>, DecodeError> {
        GroupsDecoder::new(body)
            .map(|r| r.map(|s| (s.key.to_string(), s.count)))
            .collect()
    }

    #[test]
    fn pairs_key_with_count() {
        let got = decode(b"a;b 5\na;c 2\n").expect("decode");
        assert_eq!(got, vec![("a;b".to_string(), 5), ("a;c".to_string(), 2)]);
    }

    #[test]
    fn count_follows_last_space() {
        let got = decode(b"main;do work 7\n").expect("decode");
        assert_eq!(got, vec![("main;do work".to_string(), 7)]);
    }

    #[test]
    fn zero_counts_decode() {
        let got = decode(b"a 0\n").expect("decode");
        assert_eq!(got, vec![("a".to_string(), 0)]);
    }

    #[test]
    fn missing_count_is_malformed() {
        let err = decode(b"a;b 1\nlonely\n").expect_err("malformed");
        assert_eq!(err, DecodeError::at_offset(6, DecodeErrorKind::MissingCount));

        let err = decode(b"a;b \n").expect_err("malformed");
        assert_eq!(err, DecodeError::at_offset(4, DecodeErrorKind::MissingCount));
    }

    #[test]
    fn negative_and_garbage_counts_are_rejected() {
        let bodies: [&[u8]; 4] = [b"a -3\n", b"a 1.5\n", b"a +2\n", b"a 99999999999999999999\n"];
        for body in bodies {
            let err = decode(body).expect_err("malformed");
            assert_eq!(err.position, crate::Position::Offset(2));
            assert!(matches!(err.kind, DecodeErrorKind::InvalidCount(_)));
        }
    }

    #[test]
    fn empty_key_is_malformed() {
        let err = decode(b" 4\n").expect_err("malformed");
        assert_eq!(err.kind, DecodeErrorKind::EmptyKey);
    }

    #[test]
    fn keeps_valid_prefix_before_error() {
        let results: Vec<_> = GroupsDecoder::new(&b"a 1\nb 2\nc x\nd 4\n"[..]).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(results[2].is_err());
    }
}
