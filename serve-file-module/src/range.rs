// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte range processing (`Range` HTTP header)

use http::header::{self, HeaderName};
use std::str::FromStr;

use crate::metadata::Metadata;
use crate::session::SessionWrapper;

/// Represents the result of parsing the `Range` HTTP header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Range {
    /// A valid range with the given start and end bounds (both inclusive)
    Valid(u64, u64),
    /// A range that is outside of the content’s boundaries
    OutOfBounds,
}

/// A single byte range as written in the header, before the content size is known
#[derive(Debug, Clone, Copy, PartialEq)]
enum RangeSpec {
    /// `bytes=<first>-<last>`
    Bounded(u64, u64),
    /// `bytes=<first>-`
    From(u64),
    /// `bytes=-<length>`
    Suffix(u64),
}

impl RangeSpec {
    fn parse(value: &str) -> Option<Self> {
        let (first, last) = value.trim().split_once('-')?;
        let (first, last) = (first.trim(), last.trim());
        let spec = if first.is_empty() {
            Self::Suffix(u64::from_str(last).ok()?)
        } else if last.is_empty() {
            Self::From(u64::from_str(first).ok()?)
        } else {
            Self::Bounded(u64::from_str(first).ok()?, u64::from_str(last).ok()?)
        };
        Some(spec)
    }

    fn resolve(self, size: u64) -> Range {
        let last_byte = size - 1;
        let (start, end) = match self {
            Self::Bounded(first, last) => (first, last),
            Self::From(first) => (first, last_byte),
            Self::Suffix(length) => match size.checked_sub(length) {
                Some(first) => (first, last_byte),
                None => return Range::OutOfBounds,
            },
        };

        if start <= end && end <= last_byte {
            Range::Valid(start, end)
        } else {
            Range::OutOfBounds
        }
    }
}

impl Range {
    /// Parses the value of a `Range` HTTP header. The content size is required to resolve ranges
    /// specified relative to the end and to recognize out of bounds ranges. Ranges that cannot be
    /// parsed (unexpected format) will result in `None`, so will any range on empty content.
    pub fn parse(range: &str, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let spec = RangeSpec::parse(range.strip_prefix("bytes=")?)?;
        Some(spec.resolve(size))
    }
}

impl Metadata {
    /// Determines the byte range requested via `Range` header.
    ///
    /// `None` means that the full content should be sent: there is no usable `Range` header
    /// (multiple ranges aren’t supported), the content is empty or the `If-Range` header doesn’t
    /// match this content.
    pub fn requested_range(&self, session: &impl SessionWrapper) -> Option<Range> {
        let header_value = move |name: HeaderName| {
            session
                .req_header()
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
        };

        if header_value(header::IF_RANGE).is_some_and(|value| !self.matches(value)) {
            return None;
        }
        Range::parse(header_value(header::RANGE)?, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::TestSession;
    use std::time::{Duration, SystemTime};

    fn metadata() -> Metadata {
        Metadata::new(
            "file.txt",
            1000,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_431_704_061),
        )
    }

    fn make_session(range: &str) -> TestSession {
        let mut session = TestSession::new("GET", "/").unwrap();
        if !range.is_empty() {
            session
                .req_header_mut()
                .insert_header("Range", range)
                .unwrap();
        }
        session
    }

    fn with_if_range(range: &str, if_range: &str) -> TestSession {
        let mut session = make_session(range);
        session
            .req_header_mut()
            .insert_header("If-Range", if_range)
            .unwrap();
        session
    }

    #[test]
    fn no_range() {
        assert_eq!(metadata().requested_range(&make_session("")), None);
    }

    #[test]
    fn valid_range() {
        assert_eq!(
            metadata().requested_range(&make_session("bytes=0-499")),
            Some(Range::Valid(0, 499))
        );
    }

    #[test]
    fn unknown_units() {
        assert_eq!(metadata().requested_range(&make_session("eur=0-499")), None);
    }

    #[test]
    fn open_range() {
        assert_eq!(
            metadata().requested_range(&make_session("bytes=500-")),
            Some(Range::Valid(500, 999))
        );
    }

    #[test]
    fn end_range() {
        assert_eq!(
            metadata().requested_range(&make_session("bytes=-10")),
            Some(Range::Valid(990, 999))
        );
    }

    #[test]
    fn out_of_bounds_ranges() {
        for range in ["bytes=-2000", "bytes=23-22", "bytes=1000-"] {
            assert_eq!(
                metadata().requested_range(&make_session(range)),
                Some(Range::OutOfBounds),
                "{range}"
            );
        }
    }

    #[test]
    fn multiple_ranges() {
        // Multiple ranges are unsupported, should be treated like no Range header.
        assert_eq!(
            metadata().requested_range(&make_session("bytes=1-2,3-4")),
            None
        );
    }

    #[test]
    fn range_specs() {
        assert_eq!(RangeSpec::parse(" 2 - 5 "), Some(RangeSpec::Bounded(2, 5)));
        assert_eq!(RangeSpec::parse("7-"), Some(RangeSpec::From(7)));
        assert_eq!(RangeSpec::parse("-7"), Some(RangeSpec::Suffix(7)));
        for spec in ["", "-", "7", "a-5", "1-2,3-4", "--1"] {
            assert_eq!(RangeSpec::parse(spec), None, "{spec}");
        }

        assert_eq!(RangeSpec::Suffix(0).resolve(10), Range::OutOfBounds);
        assert_eq!(RangeSpec::Suffix(10).resolve(10), Range::Valid(0, 9));
        assert_eq!(RangeSpec::Bounded(5, 5).resolve(10), Range::Valid(5, 5));
        assert_eq!(RangeSpec::Bounded(5, 10).resolve(10), Range::OutOfBounds);
        assert_eq!(RangeSpec::From(10).resolve(10), Range::OutOfBounds);
        assert_eq!(Range::parse(" bytes=0-1", 10), None);
    }

    #[test]
    fn empty_content() {
        assert_eq!(Range::parse("bytes=0-", 0), None);
        assert_eq!(Range::parse("bytes=-1", 0), None);
    }

    #[test]
    fn if_range() {
        let etag = metadata().etag;
        assert_eq!(
            metadata().requested_range(&with_if_range("bytes=0-499", &etag)),
            Some(Range::Valid(0, 499))
        );
        assert_eq!(
            metadata().requested_range(&with_if_range("bytes=0-499", "\"xyz\"")),
            None
        );
        assert_eq!(
            metadata().requested_range(&with_if_range("bytes=0-499", "Fri, 15 May 2015 15:34:21 GMT")),
            Some(Range::Valid(0, 499))
        );
        assert_eq!(
            metadata().requested_range(&with_if_range("bytes=0-499", "Thu, 01 Jan 1970 00:00:00 GMT")),
            None
        );
        assert_eq!(
            metadata().requested_range(&with_if_range("bytes=0-499", "bogus")),
            None
        );
    }
}
