/*!
 * Part planning for multi-part downloads and uploads
 */

use crate::config::{GetObjectType, MAX_UPLOAD_PARTS, MIN_PART_SIZE};
use crate::error::{Result, TransferError};

/// How each part of a download is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartAddressing {
    /// `Range: bytes=a-b` relative to `start_offset`
    Ranges { start_offset: u64 },
    /// Native part numbers, 1-based
    Parts,
}

/// How an object is split into parts for one transfer
///
/// Computed once, before any worker starts, and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Bytes the transfer will move, when known up front
    pub total_bytes: Option<u64>,
    pub part_size: u64,
    pub parts_count: u32,
    /// Parts that may be in flight or buffered at once (downloads only)
    pub window_size: u32,
    pub addressing: PartAddressing,
}

impl TransferPlan {
    /// Plan a ranged download of `span` bytes starting at `start_offset`
    pub fn ranges(start_offset: u64, span: u64, part_size: u64, get_buffer_size: u64) -> Self {
        let part_size = part_size.max(1);
        let parts_count = parts_for(span, part_size);
        Self {
            total_bytes: Some(span),
            part_size,
            parts_count,
            window_size: window_for(get_buffer_size, part_size, parts_count),
            addressing: PartAddressing::Ranges { start_offset },
        }
    }

    /// Plan a download addressed by the object's native parts
    pub fn native_parts(first_part_size: u64, parts_count: u32, get_buffer_size: u64) -> Self {
        let part_size = first_part_size.max(1);
        let parts_count = parts_count.max(1);
        Self {
            total_bytes: (parts_count == 1).then_some(first_part_size),
            part_size,
            parts_count,
            window_size: window_for(get_buffer_size, part_size, parts_count),
            addressing: PartAddressing::Parts,
        }
    }

    /// Plan a multipart upload
    ///
    /// With a known length the part size grows, if needed, so the upload
    /// fits in the part limit. Unknown lengths keep the configured size and
    /// are checked as parts are read.
    pub fn upload(content_length: Option<u64>, part_size: u64) -> Result<Self> {
        if part_size < MIN_PART_SIZE {
            return Err(TransferError::PartSizeTooSmall {
                size: part_size,
                min: MIN_PART_SIZE,
            });
        }

        let part_size = match content_length {
            Some(len) => {
                let needed = len.div_ceil(u64::from(MAX_UPLOAD_PARTS));
                part_size.max(needed)
            }
            None => part_size,
        };

        Ok(Self {
            total_bytes: content_length,
            part_size,
            parts_count: content_length.map_or(0, |len| parts_for(len, part_size)),
            window_size: 1,
            addressing: PartAddressing::Parts,
        })
    }

    /// Byte range header for part `index`, ranged plans only
    pub fn range_header(&self, index: u32) -> Option<String> {
        let PartAddressing::Ranges { start_offset } = self.addressing else {
            return None;
        };
        let span = self.total_bytes.unwrap_or(0);
        let rel_start = u64::from(index) * self.part_size;
        let rel_end = (rel_start + self.part_size).min(span);
        Some(format!(
            "bytes={}-{}",
            start_offset + rel_start,
            start_offset + rel_end - 1
        ))
    }

    /// Expected body length of part `index`, when it can be known in advance
    pub fn part_len(&self, index: u32) -> Option<u64> {
        match self.addressing {
            PartAddressing::Ranges { .. } => {
                let span = self.total_bytes?;
                let start = u64::from(index) * self.part_size;
                Some(self.part_size.min(span.saturating_sub(start)))
            }
            PartAddressing::Parts => None,
        }
    }

    pub fn get_object_type(&self) -> GetObjectType {
        match self.addressing {
            PartAddressing::Ranges { .. } => GetObjectType::Ranges,
            PartAddressing::Parts => GetObjectType::Parts,
        }
    }
}

/// Number of parts of `part_size` needed to hold `len` bytes (at least one)
pub fn parts_for(len: u64, part_size: u64) -> u32 {
    if len == 0 {
        return 1;
    }
    let parts = (len - 1) / part_size.max(1) + 1;
    u32::try_from(parts).unwrap_or(u32::MAX)
}

fn window_for(get_buffer_size: u64, part_size: u64, parts_count: u32) -> u32 {
    let window = get_buffer_size / part_size.max(1);
    u32::try_from(window)
        .unwrap_or(u32::MAX)
        .clamp(1, parts_count.max(1))
}

/// Parse a `bytes=` range against an object of `total` bytes
///
/// Returns `[start, end)`. Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`.
pub fn parse_range(range: &str, total: u64) -> Result<(u64, u64)> {
    let invalid = || TransferError::InvalidRange {
        max: total.saturating_sub(1),
    };

    let bounds = range
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(invalid)?;
    let (first, last) = bounds.split_once('-').ok_or_else(invalid)?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return Err(invalid()),
        // suffix: last n bytes
        (true, false) => {
            let n: u64 = last.parse().map_err(|_| invalid())?;
            (total.saturating_sub(n), total)
        }
        (false, true) => (first.parse().map_err(|_| invalid())?, total),
        (false, false) => {
            let start: u64 = first.parse().map_err(|_| invalid())?;
            let last: u64 = last.parse().map_err(|_| invalid())?;
            (start, last.saturating_add(1))
        }
    };

    if start >= total || end > total || start >= end {
        return Err(invalid());
    }
    Ok((start, end))
}
