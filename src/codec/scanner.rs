//! Resumable MessagePack structure scanner used for frame assembly.
//!
//! The scanner walks value headers without materialising values. It keeps
//! the offset reached so far and a stack of element counts still owed by the
//! open containers, so bytes already examined are never scanned twice when a
//! frame arrives across many reads.

use rmp::Marker;

use super::error::FramingError;

/// Deepest container nesting accepted inside one frame.
pub const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct FrameScanner {
    offset: usize,
    pending: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    /// Marker plus length/type bytes.
    len: usize,
    /// Payload bytes following the header (strings, binaries, extensions).
    body: usize,
    /// Child values owed by a container.
    children: u64,
}

impl Header {
    const fn leaf(len: usize, body: usize) -> Self {
        Self {
            len,
            body,
            children: 0,
        }
    }

    const fn container(len: usize, children: u64) -> Self {
        Self {
            len,
            body: 0,
            children,
        }
    }
}

impl FrameScanner {
    /// Scan `buf` from where the previous call stopped.
    ///
    /// Returns `Ok(Some(len))` once the first `len` bytes of `buf` hold one
    /// complete top-level value, `Ok(None)` when more bytes are needed. The
    /// scanner resets itself after reporting a complete frame.
    pub(crate) fn scan(
        &mut self,
        buf: &[u8],
        max_frame: usize,
    ) -> Result<Option<usize>, FramingError> {
        if self.offset == 0
            && let Some(&marker) = buf.first()
            && !is_array_marker(marker)
        {
            return Err(FramingError::NotAnArray { marker });
        }

        loop {
            let Some(rest) = buf.get(self.offset..) else {
                return Ok(None);
            };
            let Some(header) = read_header(rest, self.offset)? else {
                return Ok(None);
            };
            let end = self
                .offset
                .saturating_add(header.len)
                .saturating_add(header.body);
            // Each owed child needs at least one more byte.
            let floor = u64::try_from(end)
                .unwrap_or(u64::MAX)
                .saturating_add(header.children);
            if floor > max_frame as u64 {
                return Err(FramingError::OversizedFrame {
                    size: usize::try_from(floor).unwrap_or(usize::MAX),
                    max: max_frame,
                });
            }
            if end > buf.len() {
                return Ok(None);
            }
            self.offset = end;

            if header.children > 0 {
                if self.pending.len() >= MAX_NESTING_DEPTH {
                    return Err(FramingError::NestingTooDeep {
                        max: MAX_NESTING_DEPTH,
                    });
                }
                self.pending.push(header.children);
            } else if self.finish_value() {
                let len = self.offset;
                self.reset();
                return Ok(Some(len));
            }
        }
    }

    /// Bytes of the current frame already scanned.
    #[cfg(test)]
    pub(crate) fn scanned(&self) -> usize { self.offset }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.pending.clear();
    }

    /// Account for one completed value; returns `true` when the top-level
    /// value is complete.
    fn finish_value(&mut self) -> bool {
        while let Some(owed) = self.pending.last_mut() {
            *owed -= 1;
            if *owed > 0 {
                return false;
            }
            self.pending.pop();
        }
        true
    }
}

fn is_array_marker(marker: u8) -> bool {
    matches!(
        Marker::from_u8(marker),
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32
    )
}

/// Read a big-endian length of `width` bytes following the marker.
fn length(bytes: &[u8], width: usize) -> Option<u64> {
    let raw = bytes.get(1..=width)?;
    Some(raw.iter().fold(0_u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn to_usize(value: u64) -> usize { usize::try_from(value).unwrap_or(usize::MAX) }

fn read_header(bytes: &[u8], offset: usize) -> Result<Option<Header>, FramingError> {
    let Some(&byte) = bytes.first() else {
        return Ok(None);
    };
    let sized = |width: usize, header: usize| {
        length(bytes, width).map(|n| Header::leaf(header, to_usize(n)))
    };
    let counted = |width: usize, factor: u64| {
        length(bytes, width).map(|n| Header::container(1 + width, n * factor))
    };
    let header = match Marker::from_u8(byte) {
        Marker::Reserved => return Err(FramingError::ReservedMarker { offset }),
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Some(Header::leaf(1, 0))
        }
        Marker::FixMap(n) => Some(Header::container(1, 2 * u64::from(n))),
        Marker::FixArray(n) => Some(Header::container(1, u64::from(n))),
        Marker::FixStr(n) => Some(Header::leaf(1, usize::from(n))),
        Marker::Bin8 | Marker::Str8 => sized(1, 2),
        Marker::Bin16 | Marker::Str16 => sized(2, 3),
        Marker::Bin32 | Marker::Str32 => sized(4, 5),
        // ext 8/16/32: length then a type byte
        Marker::Ext8 => sized(1, 3),
        Marker::Ext16 => sized(2, 4),
        Marker::Ext32 => sized(4, 6),
        Marker::U8 | Marker::I8 => Some(Header::leaf(1, 1)),
        Marker::U16 | Marker::I16 => Some(Header::leaf(1, 2)),
        Marker::F32 | Marker::U32 | Marker::I32 => Some(Header::leaf(1, 4)),
        Marker::F64 | Marker::U64 | Marker::I64 => Some(Header::leaf(1, 8)),
        Marker::FixExt1 => Some(Header::leaf(2, 1)),
        Marker::FixExt2 => Some(Header::leaf(2, 2)),
        Marker::FixExt4 => Some(Header::leaf(2, 4)),
        Marker::FixExt8 => Some(Header::leaf(2, 8)),
        Marker::FixExt16 => Some(Header::leaf(2, 16)),
        Marker::Array16 => counted(2, 1),
        Marker::Array32 => counted(4, 1),
        Marker::Map16 => counted(2, 2),
        Marker::Map32 => counted(4, 2),
    };
    // A header cut short by the read boundary is simply incomplete.
    Ok(header.filter(|h| h.len <= bytes.len()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const MAX: usize = 1024;

    #[rstest]
    #[case::fixarray(&[0x92, 0x01, 0x02], 3)]
    #[case::nested(&[0x92, 0x91, 0xc0, 0x80], 4)]
    #[case::str8(&[0x91, 0xd9, 0x02, b'h', b'i'], 5)]
    #[case::fixext8(&[0x91, 0xd7, 0x00, 0, 0, 0, 1, 0, 0, 0, 2], 11)]
    #[case::empty_array(&[0x90], 1)]
    #[case::map16(&[0x91, 0xde, 0x00, 0x01, 0xa1, b'k', 0x05], 7)]
    fn scans_complete_frames(#[case] bytes: &[u8], #[case] expected: usize) {
        let mut scanner = FrameScanner::default();
        assert_eq!(scanner.scan(bytes, MAX), Ok(Some(expected)));
        assert_eq!(scanner.scanned(), 0);
    }

    #[test]
    fn stops_at_frame_boundary_and_leaves_trailing_bytes() {
        let mut scanner = FrameScanner::default();
        let bytes = [0x91, 0x01, 0x91, 0x02];
        assert_eq!(scanner.scan(&bytes, MAX), Ok(Some(2)));
    }

    #[test]
    fn resumes_across_partial_reads() {
        let frame = [0x92, 0xa3, b'a', b'b', b'c', 0xcd, 0x01, 0x00];
        let mut scanner = FrameScanner::default();
        for end in 1..frame.len() {
            assert_eq!(scanner.scan(&frame[..end], MAX), Ok(None), "prefix {end}");
        }
        assert_eq!(scanner.scan(&frame, MAX), Ok(Some(frame.len())));
    }

    #[rstest]
    #[case::map(0x80)]
    #[case::positive_int(0x01)]
    #[case::string(0xa1)]
    fn rejects_non_array_frames(#[case] marker: u8) {
        let mut scanner = FrameScanner::default();
        assert_eq!(
            scanner.scan(&[marker], MAX),
            Err(FramingError::NotAnArray { marker })
        );
    }

    #[test]
    fn rejects_declared_length_beyond_limit() {
        let mut scanner = FrameScanner::default();
        // bin32 declaring 4 GiB
        let bytes = [0x91, 0xc6, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            scanner.scan(&bytes, MAX),
            Err(FramingError::OversizedFrame { max: MAX, .. })
        ));
    }

    #[test]
    fn rejects_element_count_beyond_limit() {
        let mut scanner = FrameScanner::default();
        let bytes = [0xdd, 0x00, 0x10, 0x00, 0x00];
        assert!(matches!(
            scanner.scan(&bytes, MAX),
            Err(FramingError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn rejects_reserved_marker() {
        let mut scanner = FrameScanner::default();
        assert_eq!(
            scanner.scan(&[0x92, 0x01, 0xc1], MAX),
            Err(FramingError::ReservedMarker { offset: 2 })
        );
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut scanner = FrameScanner::default();
        let bytes = vec![0x91; MAX_NESTING_DEPTH + 1];
        assert_eq!(
            scanner.scan(&bytes, MAX),
            Err(FramingError::NestingTooDeep {
                max: MAX_NESTING_DEPTH
            })
        );
    }
}
