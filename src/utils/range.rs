//! `Range: bytes=...` parsing for partial downloads.

/// Inclusive byte range within an entity of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Unsatisfiable;

/// Parse a single-range `Range` header against `size`.
///
/// Returns `Ok(None)` for headers we do not understand (unit other than
/// bytes, multi-range), which callers treat as a full response.
pub fn parse_range(header: &str, size: u64) -> Result<Option<ByteRange>, Unsatisfiable> {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    let range = match (start.is_empty(), end.is_empty()) {
        // bytes=-N : the final N bytes
        (true, false) => {
            let suffix: u64 = end.parse().map_err(|_| Unsatisfiable)?;
            if suffix == 0 || size == 0 {
                return Err(Unsatisfiable);
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        }
        (false, true) => {
            let start: u64 = start.parse().map_err(|_| Unsatisfiable)?;
            if start >= size {
                return Err(Unsatisfiable);
            }
            ByteRange {
                start,
                end: size - 1,
            }
        }
        (false, false) => {
            let start: u64 = start.parse().map_err(|_| Unsatisfiable)?;
            let end: u64 = end.parse().map_err(|_| Unsatisfiable)?;
            if start > end || start >= size {
                return Err(Unsatisfiable);
            }
            ByteRange {
                start,
                end: end.min(size - 1),
            }
        }
        (true, true) => return Ok(None),
    };
    Ok(Some(range))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(
            parse_range("bytes=0-99", 1000),
            Ok(Some(ByteRange { start: 0, end: 99 }))
        );
        assert_eq!(
            parse_range("bytes=900-", 1000),
            Ok(Some(ByteRange { start: 900, end: 999 }))
        );
        assert_eq!(
            parse_range("bytes=-100", 1000),
            Ok(Some(ByteRange { start: 900, end: 999 }))
        );
        assert_eq!(
            parse_range("bytes=990-5000", 1000),
            Ok(Some(ByteRange { start: 990, end: 999 }))
        );
    }

    #[test]
    fn rejects_out_of_bounds() {
        assert_eq!(parse_range("bytes=1000-", 1000), Err(Unsatisfiable));
        assert_eq!(parse_range("bytes=5-1", 1000), Err(Unsatisfiable));
        assert_eq!(parse_range("bytes=-0", 1000), Err(Unsatisfiable));
    }

    #[test]
    fn ignores_unsupported_units() {
        assert_eq!(parse_range("items=0-1", 10), Ok(None));
        assert_eq!(parse_range("bytes=0-1,4-5", 10), Ok(None));
    }

    #[test]
    fn content_range_header() {
        let range = ByteRange { start: 10, end: 19 };
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }
}
