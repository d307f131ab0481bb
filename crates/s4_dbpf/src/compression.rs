//! Resource decompression.

use std::{
    fmt,
    io::{self, Read},
};

use flate2::read::DeflateDecoder;
use tracing::{instrument, trace};

use crate::error::CodecError;

/// Identifies the scheme used to store a resource inside the package
///
/// The numeric codes are the values found in the index and in the compression directory.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CompressionKind {
    /// Stores the data as it is
    #[default]
    None = 0x0000,

    /// A zlib stream
    Deflate = 0x5A42,

    /// RefPack, the LZ77 variant used throughout the game's asset pipeline
    CustomRunLength = 0xFFFF,

    /// RefPack tagged for sequential access
    Streamable = 0xFFFE,
}

impl CompressionKind {
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub const fn is_compressed(self) -> bool {
        !matches!(self, CompressionKind::None)
    }
}

impl TryFrom<u16> for CompressionKind {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(CompressionKind::None),
            0x5A42 => Ok(CompressionKind::Deflate),
            0xFFFF => Ok(CompressionKind::CustomRunLength),
            0xFFFE => Ok(CompressionKind::Streamable),
            code => Err(CodecError::UnknownKind { code }),
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionKind::None => write!(f, "none"),
            CompressionKind::Deflate => write!(f, "deflate"),
            CompressionKind::CustomRunLength => write!(f, "refpack"),
            CompressionKind::Streamable => write!(f, "refpack-streamable"),
        }
    }
}

/// Decode a stored resource.
///
/// `expected` is the declared uncompressed size. When present and non-zero the output
/// is allocated once at that size and any other decoded length is an error. When absent
/// or zero the output grows as needed.
pub fn decode(
    data: &[u8],
    kind: CompressionKind,
    expected: Option<u32>,
) -> Result<Vec<u8>, CodecError> {
    decode_bounded(data, kind, expected, u64::MAX)
}

/// [`decode`], refusing to produce more than `max_output` bytes.
///
/// Declared sizes are checked before anything is allocated, streams without a declared
/// size are stopped once they pass the limit.
#[instrument(skip(data), fields(len = data.len()), err)]
pub fn decode_bounded(
    data: &[u8],
    kind: CompressionKind,
    expected: Option<u32>,
    max_output: u64,
) -> Result<Vec<u8>, CodecError> {
    let expected = expected.filter(|&n| n > 0).map(|n| n as usize);
    if let Some(n) = expected {
        check_limit(n as u64, max_output)?;
    }

    let output = match kind {
        CompressionKind::None => {
            check_limit(data.len() as u64, max_output)?;
            data.to_vec()
        }
        CompressionKind::Deflate => inflate(data, expected, max_output)?,
        CompressionKind::CustomRunLength | CompressionKind::Streamable => {
            refpack::decode(data, expected, max_output)?
        }
    };

    if let Some(expected) = expected {
        if output.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected: expected as u64,
                actual: output.len() as u64,
            });
        }
    }

    trace!(decoded = output.len(), "decoded resource");
    Ok(output)
}

fn check_limit(size: u64, limit: u64) -> Result<(), CodecError> {
    if size > limit {
        return Err(CodecError::ResourceTooLarge { size, limit });
    }
    Ok(())
}

/// Two byte zlib header. The payload that follows is raw deflate, and the Adler-32
/// trailer is optional since the game's own writer omits it.
fn zlib_body(data: &[u8]) -> Result<&[u8], CodecError> {
    let [cmf, flg, body @ ..] = data else {
        return Err(CodecError::Truncated {
            expected: 2,
            actual: data.len() as u64,
        });
    };

    let method = cmf & 0x0F;
    let window = cmf >> 4;
    let check = (u16::from(*cmf) << 8) | u16::from(*flg);
    if method != 8 || window > 7 || check % 31 != 0 {
        return Err(CodecError::Malformed {
            reason: format!("bad zlib header {cmf:02X} {flg:02X}"),
        });
    }
    if flg & 0x20 != 0 {
        return Err(CodecError::Malformed {
            reason: "zlib preset dictionaries are not supported".into(),
        });
    }

    Ok(body)
}

fn inflate(
    data: &[u8],
    expected: Option<usize>,
    max_output: u64,
) -> Result<Vec<u8>, CodecError> {
    let body = zlib_body(data)?;
    let mut output = match expected {
        Some(n) => Vec::with_capacity(n),
        None => Vec::new(),
    };

    // One byte past the declared size is enough to prove a mismatch
    let limit = expected
        .map_or(max_output, |n| n as u64)
        .saturating_add(1);
    DeflateDecoder::new(body)
        .take(limit)
        .read_to_end(&mut output)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                expected: expected.unwrap_or(output.len()) as u64,
                actual: output.len() as u64,
            },
            _ => CodecError::Malformed {
                reason: e.to_string(),
            },
        })?;

    if expected.is_none() {
        check_limit(output.len() as u64, max_output)?;
    }

    Ok(output)
}

pub(crate) mod refpack {
    //! RefPack (also known as QFS) decoding.
    //!
    //! ```text
    //! header   flags:u8 0xFB [compressed size] uncompressed size
    //!          sizes are big endian, 4 bytes if flags & 0x80 else 3,
    //!          the compressed size is only present if flags & 0x01
    //!
    //! 0x00-0x7F  0ooL LLpp oooooooo                    copy 3-10,    offset <= 1024
    //! 0x80-0xBF  10LL LLLL ppoo oooo oooooooo          copy 4-67,    offset <= 16384
    //! 0xC0-0xDF  110o LLpp oooooooo oooooooo LLLLLLLL  copy 5-1028,  offset <= 131072
    //! 0xE0-0xFB  111p pppp                             ((p + 1) * 4) literals
    //! 0xFC-0xFF  1111 11pp                             pp literals, end of stream
    //! ```
    //!
    //! Every copy command is preceded by `pp` (0-3) literal bytes.

    use tracing::warn;

    use crate::error::CodecError;

    const MARKER: u8 = 0xFB;

    struct Input<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Input<'a> {
        fn byte(&mut self) -> Result<u8, CodecError> {
            let b = *self.data.get(self.pos).ok_or(self.truncated(1))?;
            self.pos += 1;
            Ok(b)
        }

        fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
            let data: &'a [u8] = self.data;
            let end = self.pos + n;
            let slice = data.get(self.pos..end).ok_or(self.truncated(n))?;
            self.pos = end;
            Ok(slice)
        }

        fn size(&mut self, wide: bool) -> Result<usize, CodecError> {
            let width = if wide { 4 } else { 3 };
            Ok(self
                .bytes(width)?
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize))
        }

        fn truncated(&self, wanted: usize) -> CodecError {
            CodecError::Truncated {
                expected: (self.pos + wanted) as u64,
                actual: self.data.len() as u64,
            }
        }
    }

    /// Size recorded in the stream header, without decoding the body
    pub fn declared_size(data: &[u8]) -> Result<usize, CodecError> {
        read_header(&mut Input { data, pos: 0 })
    }

    fn read_header(input: &mut Input<'_>) -> Result<usize, CodecError> {
        let flags = input.byte()?;
        let marker = input.byte()?;
        if marker != MARKER {
            return Err(CodecError::Malformed {
                reason: format!("bad refpack header {flags:02X} {marker:02X}"),
            });
        }

        let wide = flags & 0x80 != 0;
        if flags & 0x01 != 0 {
            let _compressed = input.size(wide)?;
        }
        input.size(wide)
    }

    /// Decode a full RefPack stream.
    ///
    /// With `expected` the output buffer is sized up front and the stream must produce
    /// exactly that many bytes, whatever its own header claims.
    pub fn decode(
        data: &[u8],
        expected: Option<usize>,
        max_output: u64,
    ) -> Result<Vec<u8>, CodecError> {
        let mut input = Input { data, pos: 0 };
        let declared = read_header(&mut input)?;

        let target = match expected {
            Some(expected) => {
                if expected != declared {
                    warn!(expected, declared, "refpack header disagrees with the index size");
                }
                expected
            }
            None => declared,
        };
        if target as u64 > max_output {
            return Err(CodecError::ResourceTooLarge {
                size: target as u64,
                limit: max_output,
            });
        }

        let mut output = match expected {
            Some(n) => Vec::with_capacity(n),
            None => Vec::new(),
        };

        loop {
            if input.pos >= data.len() {
                // Some encoders omit the stop byte once the output is complete
                if output.len() == target {
                    break;
                }
                return Err(input.truncated(1));
            }

            let b0 = input.byte()? as usize;
            let (literals, copy, offset) = match b0 {
                0x00..=0x7F => {
                    let b1 = input.byte()? as usize;
                    (b0 & 0x03, ((b0 & 0x1C) >> 2) + 3, ((b0 & 0x60) << 3) + b1 + 1)
                }
                0x80..=0xBF => {
                    let b1 = input.byte()? as usize;
                    let b2 = input.byte()? as usize;
                    (
                        (b1 & 0xC0) >> 6,
                        (b0 & 0x3F) + 4,
                        ((b1 & 0x3F) << 8) + b2 + 1,
                    )
                }
                0xC0..=0xDF => {
                    let b1 = input.byte()? as usize;
                    let b2 = input.byte()? as usize;
                    let b3 = input.byte()? as usize;
                    (
                        b0 & 0x03,
                        ((b0 & 0x0C) << 6) + b3 + 5,
                        ((b0 & 0x10) << 12) + (b1 << 8) + b2 + 1,
                    )
                }
                0xE0..=0xFB => (((b0 & 0x1F) << 2) + 4, 0, 0),
                _ => {
                    let literals = b0 & 0x03;
                    push_literals(&mut output, input.bytes(literals)?, target)?;
                    break;
                }
            };

            push_literals(&mut output, input.bytes(literals)?, target)?;
            if copy > 0 {
                copy_back(&mut output, offset, copy, target)?;
            }
        }

        Ok(output)
    }

    fn overrun(target: usize, produced: usize) -> CodecError {
        CodecError::SizeMismatch {
            expected: target as u64,
            actual: produced as u64,
        }
    }

    fn push_literals(output: &mut Vec<u8>, literals: &[u8], target: usize) -> Result<(), CodecError> {
        if output.len() + literals.len() > target {
            return Err(overrun(target, output.len() + literals.len()));
        }
        output.extend_from_slice(literals);
        Ok(())
    }

    fn copy_back(
        output: &mut Vec<u8>,
        offset: usize,
        len: usize,
        target: usize,
    ) -> Result<(), CodecError> {
        if offset > output.len() {
            return Err(CodecError::Malformed {
                reason: format!(
                    "back reference of {offset} bytes with only {} decoded",
                    output.len()
                ),
            });
        }
        if output.len() + len > target {
            return Err(overrun(target, output.len() + len));
        }

        // Source and destination may overlap, copy byte by byte
        let start = output.len() - offset;
        for i in 0..len {
            let b = output[start + i];
            output.push(b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use flate2::{write::ZlibEncoder, Compression};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::{decode, decode_bounded, refpack, CompressionKind};
    use crate::error::CodecError;

    /// Literal-only RefPack encoder, enough to exercise the decoder on arbitrary input
    fn refpack_literals(data: &[u8]) -> Vec<u8> {
        let len = data.len();
        let mut out = vec![0x10, 0xFB, (len >> 16) as u8, (len >> 8) as u8, len as u8];

        let mut rest = data;
        while rest.len() > 3 {
            let run = (rest.len() & !3).min(112);
            out.push(0xE0 | ((run / 4 - 1) as u8));
            out.extend_from_slice(&rest[..run]);
            rest = &rest[run..];
        }
        out.push(0xFC | rest.len() as u8);
        out.extend_from_slice(rest);
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn kind_codes() {
        assert_eq!(CompressionKind::try_from(0x0000), Ok(CompressionKind::None));
        assert_eq!(CompressionKind::try_from(0x5A42), Ok(CompressionKind::Deflate));
        assert_eq!(CompressionKind::try_from(0xFFFF), Ok(CompressionKind::CustomRunLength));
        assert_eq!(CompressionKind::try_from(0xFFFE), Ok(CompressionKind::Streamable));
        assert_eq!(
            CompressionKind::try_from(0xFFE0),
            Err(CodecError::UnknownKind { code: 0xFFE0 })
        );
        assert_eq!(CompressionKind::Deflate.code(), 0x5A42);
    }

    #[test]
    fn passthrough() {
        assert_eq!(decode(b"hello", CompressionKind::None, Some(5)), Ok(b"hello".to_vec()));
        assert_eq!(
            decode(b"hello", CompressionKind::None, Some(6)),
            Err(CodecError::SizeMismatch {
                expected: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn empty_resource_without_declared_size() {
        assert_eq!(decode(&[], CompressionKind::None, Some(0)), Ok(Vec::new()));
        assert_eq!(decode(&[], CompressionKind::None, None), Ok(Vec::new()));
    }

    #[test]
    fn deflate() {
        let input = b"Hello World".repeat(20);
        let compressed = zlib(&input);

        assert_eq!(
            decode(&compressed, CompressionKind::Deflate, Some(input.len() as u32)),
            Ok(input.clone())
        );
        assert_eq!(decode(&compressed, CompressionKind::Deflate, None), Ok(input));
    }

    #[test]
    fn deflate_without_adler_trailer() {
        let input: Vec<u8> = (0..230u32).map(|i| (i * 7 % 13) as u8).collect();
        let compressed = zlib(&input);
        let stripped = &compressed[..compressed.len() - 4];

        assert_eq!(&stripped[..2], &[0x78, 0x9C]);
        assert_eq!(
            decode(stripped, CompressionKind::Deflate, Some(230)),
            Ok(input.clone())
        );
        assert_eq!(decode(stripped, CompressionKind::Deflate, None), Ok(input));
    }

    #[test]
    fn deflate_bad_header() {
        assert_eq!(
            decode(&[0x78], CompressionKind::Deflate, None),
            Err(CodecError::Truncated {
                expected: 2,
                actual: 1
            })
        );
        // valid method and check bits, preset dictionary flag set
        assert!(matches!(
            decode(&[0x78, 0xBB, 0x00], CompressionKind::Deflate, None),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn deflate_size_mismatch() {
        let compressed = zlib(b"Hello World");

        assert_eq!(
            decode(&compressed, CompressionKind::Deflate, Some(5)),
            Err(CodecError::SizeMismatch {
                expected: 5,
                actual: 6
            })
        );
        assert_eq!(
            decode(&compressed, CompressionKind::Deflate, Some(20)),
            Err(CodecError::SizeMismatch {
                expected: 20,
                actual: 11
            })
        );
    }

    #[test]
    fn deflate_truncated_stream() {
        let compressed = zlib(&b"Hello World".repeat(20));
        let result = decode(&compressed[..compressed.len() / 2], CompressionKind::Deflate, Some(220));

        assert!(matches!(
            result,
            Err(CodecError::Truncated { .. }
                | CodecError::Malformed { .. }
                | CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn deflate_garbage() {
        assert!(matches!(
            decode(b"not zlib at all", CompressionKind::Deflate, Some(4)),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn refpack_literal_run_and_stop() {
        // 0xE0 = 4 literals, 0xFD = stop with one trailing literal
        let input = [0x10, 0xFB, 0x00, 0x00, 0x05, 0xE0, b'h', b'e', b'l', b'l', 0xFD, b'o'];

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(5)),
            Ok(b"hello".to_vec())
        );
    }

    #[test]
    fn refpack_short_copy() {
        // "ABCD" then copy 4 bytes from 4 back: b0 = 0b0000_0100 (len 4), b1 = 3
        let input = [
            0x10, 0xFB, 0x00, 0x00, 0x08, 0xE0, b'A', b'B', b'C', b'D', 0x04, 0x03, 0xFC,
        ];

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(8)),
            Ok(b"ABCDABCD".to_vec())
        );
    }

    #[test]
    fn refpack_overlapping_copy_with_leading_literals() {
        // one literal 'a' folded into the copy command, then copy 9 bytes from 1 back
        let input = [0x10, 0xFB, 0x00, 0x00, 0x0A, 0x19, 0x00, b'a', 0xFC];

        assert_eq!(
            decode(&input, CompressionKind::Streamable, None),
            Ok(b"aaaaaaaaaa".to_vec())
        );
    }

    #[test]
    fn refpack_medium_copy() {
        // 4 literals, then 0x80-range copy: len = 0x01 + 4 = 5, offset = 4, no literals
        let input = [
            0x10, 0xFB, 0x00, 0x00, 0x09, 0xE0, b'w', b'x', b'y', b'z', 0x81, 0x00, 0x03, 0xFC,
        ];

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(9)),
            Ok(b"wxyzwxyzw".to_vec())
        );
    }

    #[test]
    fn refpack_long_copy() {
        // 4 literals, then 0xC0-range copy: len = 0x00 + 5 = 5, offset = 2
        let input = [
            0x10, 0xFB, 0x00, 0x00, 0x09, 0xE0, b'1', b'2', b'3', b'4', 0xC0, 0x00, 0x01, 0x00,
            0xFC,
        ];

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(9)),
            Ok(b"123434343".to_vec())
        );
    }

    #[test]
    fn refpack_wide_header_with_compressed_size() {
        let mut input = vec![0x81, 0xFB, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x04];
        input.extend([0xE0, b'D', b'B', b'P', b'F', 0xFC]);

        assert_eq!(refpack::declared_size(&input), Ok(4));
        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(4)),
            Ok(b"DBPF".to_vec())
        );
    }

    #[test]
    fn refpack_missing_stop_after_complete_output() {
        let input = [0x10, 0xFB, 0x00, 0x00, 0x04, 0xE0, b'T', b'E', b'S', b'T'];

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(4)),
            Ok(b"TEST".to_vec())
        );
    }

    #[test]
    fn refpack_bad_marker() {
        assert!(matches!(
            decode(&[0x10, 0xFA, 0, 0, 1, 0xFC], CompressionKind::CustomRunLength, None),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn refpack_back_reference_before_start() {
        let input = [0x10, 0xFB, 0x00, 0x00, 0x04, 0x00, 0x05, 0xFC];

        assert!(matches!(
            decode(&input, CompressionKind::CustomRunLength, Some(4)),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn refpack_truncated_body() {
        let input = [0x10, 0xFB, 0x00, 0x00, 0x10, 0xE3, b'T', b'E'];

        assert!(matches!(
            decode(&input, CompressionKind::CustomRunLength, Some(16)),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn refpack_index_size_wins_over_header() {
        let mut input = refpack_literals(b"hello");
        // header claims 4 bytes, the stream and the index agree on 5
        input[4] = 4;

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(5)),
            Ok(b"hello".to_vec())
        );
    }

    #[test]
    fn refpack_header_disagrees_with_index() {
        let input = refpack_literals(b"TEST");

        assert_eq!(
            decode(&input, CompressionKind::CustomRunLength, Some(16)),
            Err(CodecError::SizeMismatch {
                expected: 16,
                actual: 4
            })
        );
    }

    #[test]
    fn refpack_output_overrun() {
        // header says 2 bytes, body carries 4
        let input = [0x10, 0xFB, 0x00, 0x00, 0x02, 0xE0, b'a', b'b', b'c', b'd', 0xFC];

        assert!(matches!(
            decode(&input, CompressionKind::CustomRunLength, None),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_code_is_rejected_before_decoding() {
        assert_eq!(
            CompressionKind::try_from(0x1234).and_then(|kind| decode(b"", kind, None)),
            Err(CodecError::UnknownKind { code: 0x1234 })
        );
    }

    #[test]
    fn limits_are_checked_before_allocating() {
        assert_eq!(
            decode_bounded(&[], CompressionKind::Deflate, Some(4096), 1024),
            Err(CodecError::ResourceTooLarge {
                size: 4096,
                limit: 1024
            })
        );

        // header claims 16 MiB, nothing is allocated before the check
        let input = [0x10, 0xFB, 0xFF, 0xFF, 0xFF, 0xFC];
        assert_eq!(
            decode_bounded(&input, CompressionKind::CustomRunLength, None, 1024),
            Err(CodecError::ResourceTooLarge {
                size: 0xFF_FFFF,
                limit: 1024
            })
        );
    }

    #[test]
    fn deflate_without_declared_size_stops_at_limit() {
        let compressed = zlib(&[0u8; 8192]);

        assert!(matches!(
            decode_bounded(&compressed, CompressionKind::Deflate, None, 1024),
            Err(CodecError::ResourceTooLarge { limit: 1024, .. })
        ));
    }

    proptest! {
        #[test]
        fn refpack_literals_round_trip(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let encoded = refpack_literals(&data);
            prop_assert_eq!(
                decode(&encoded, CompressionKind::CustomRunLength, Some(data.len() as u32)),
                Ok(data)
            );
        }
    }
}
