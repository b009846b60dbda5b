use std::io::BufRead;

use super::{DecodeError, LineReader, Sample};
use crate::StackKey;

/// One stack per line with an implicit count of 1. Repeated stacks are
/// yielded again; aggregation is left to the tree.
#[derive(Debug)]
pub struct LinesDecoder<R> {
    lines: LineReader<R>,
    failed: bool,
}

impl<R: BufRead> LinesDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for LinesDecoder<R> {
    type Item = Result<Sample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.lines.next_line() {
            Ok(None) => return None,
            Ok(Some((offset, line))) => StackKey::parse(line)
                .map(|key| Sample { key, count: 1 })
                .map_err(|kind| DecodeError::at_offset(offset, kind)),
            Err(err) => Err(err),
        };
        self.failed = result.is_err();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeErrorKind;

    fn keys(body: &[u8]) -> Vec<String> {
        LinesDecoder::new(body)
            .map(|s| s.expect("sample").key.to_string())
            .collect()
    }

    #[test]
    fn each_line_is_one_sample() {
        let samples: Vec<Sample> = LinesDecoder::new(&b"a;b\na;b\na;c\n"[..])
            .collect::<Result<_, _>>()
            .expect("decode");
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.count == 1));
        assert_eq!(samples[0], samples[1]);
    }

    #[test]
    fn tolerates_crlf_blank_lines_and_missing_final_newline() {
        assert_eq!(keys(b"a;b\r\n\r\n\nmain;run"), vec!["a;b", "main;run"]);
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(keys(b"").is_empty());
    }

    #[test]
    fn stops_after_malformed_line() {
        let mut decoder = LinesDecoder::new(&b"a;b\na;;c\nd\n"[..]);
        assert!(decoder.next().expect("first").is_ok());
        let err = decoder.next().expect("second").expect_err("malformed");
        assert_eq!(err, DecodeError::at_offset(4, DecodeErrorKind::EmptyFrame));
        assert!(decoder.next().is_none());
    }
}
