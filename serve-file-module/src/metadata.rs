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

//! Content metadata handling

use http::{header, status::StatusCode};
use httpdate::{fmt_http_date, parse_http_date};
use mime_guess::Mime;
use pingora::http::ResponseHeader;
use pingora::Error;
use std::time::{Duration, SystemTime};

use crate::session::SessionWrapper;

/// Helper wrapping content metadata information
#[derive(Debug, Clone)]
pub struct Metadata {
    /// MIME type guessed from the content name
    pub mime: Mime,
    /// Content size in bytes
    pub size: u64,
    /// Last modified time truncated to seconds, `None` if unknown
    pub modified: Option<SystemTime>,
    /// ETag header for the content, encoding last modified time and size
    pub etag: String,
}

impl Metadata {
    /// Collects the metadata for a piece of content. The name is only used to guess the MIME type
    /// from its extension. A modification time at or before the Unix epoch counts as unknown.
    pub fn new(name: &str, size: u64, modified: SystemTime) -> Self {
        let seconds = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()
            .map(|duration| duration.as_secs())
            .filter(|seconds| *seconds > 0);

        Self {
            mime: mime_guess::from_path(name).first_or_octet_stream(),
            size,
            modified: seconds.map(|seconds| SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)),
            etag: format!("\"{:x}-{:x}\"", seconds.unwrap_or(0), size),
        }
    }

    /// Last modified time in the format `Fri, 15 May 2015 15:34:21 GMT` if known
    pub fn last_modified(&self) -> Option<String> {
        self.modified.map(fmt_http_date)
    }

    /// Checks whether a `If-Range` header value refers to this content (same ETag or same last
    /// modified time).
    pub fn matches(&self, value: &str) -> bool {
        value == self.etag
            || parse_http_date(value)
                .ok()
                .is_some_and(|date| self.modified == Some(date))
    }

    /// Checks `If-Match` and `If-Unmodified-Since` headers of the request to determine whether
    /// a `412 Precondition Failed` response should be produced.
    pub fn has_failed_precondition(&self, session: &impl SessionWrapper) -> bool {
        let headers = &session.req_header().headers;
        if let Some(value) = headers
            .get(header::IF_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value != "*"
                && value
                    .split(',')
                    .map(str::trim)
                    .all(|value| value != self.etag)
        } else if let Some(date) = headers
            .get(header::IF_UNMODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_http_date(value).ok())
        {
            self.modified.is_some_and(|modified| modified > date)
        } else {
            false
        }
    }

    /// Checks `If-None-Match` and `If-Modified-Since` headers of the request to determine whether
    /// a `304 Not Modified` response should be produced.
    pub fn is_not_modified(&self, session: &impl SessionWrapper) -> bool {
        let headers = &session.req_header().headers;
        if let Some(value) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value == "*"
                || value
                    .split(',')
                    .map(|value| value.trim().trim_start_matches("W/"))
                    .any(|value| value == self.etag)
        } else if let Some(date) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_http_date(value).ok())
        {
            self.modified.is_some_and(|modified| modified <= date)
        } else {
            false
        }
    }

    #[inline(always)]
    fn add_common_headers(&self, header: &mut ResponseHeader) -> Result<(), Box<Error>> {
        header.append_header(header::CONTENT_TYPE, self.mime.as_ref())?;
        if let Some(modified) = self.last_modified() {
            header.append_header(header::LAST_MODIFIED, modified)?;
        }
        header.append_header(header::ETAG, &self.etag)?;
        Ok(())
    }

    /// Produces a `200 OK` response and adds headers according to the metadata.
    pub(crate) fn to_response_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::OK, Some(8))?;
        header.append_header(header::CONTENT_LENGTH, self.size.to_string())?;
        header.append_header(header::ACCEPT_RANGES, "bytes")?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a `206 Partial Content` response and adds headers according to the metadata.
    pub(crate) fn to_partial_content_header(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::PARTIAL_CONTENT, Some(8))?;
        header.append_header(header::CONTENT_LENGTH, (end - start + 1).to_string())?;
        header.append_header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", self.size),
        )?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a `416 Range Not Satisfiable` response naming the actual content size.
    pub(crate) fn to_not_satisfiable_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = self.to_custom_header(StatusCode::RANGE_NOT_SATISFIABLE)?;
        header.append_header(header::CONTENT_RANGE, format!("bytes */{}", self.size))?;
        Ok(header)
    }

    /// Produces a response with specified status code and no response body (all headers added
    /// except `Content-Length`).
    pub(crate) fn to_custom_header(
        &self,
        status: StatusCode,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(status, Some(4))?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }
}
