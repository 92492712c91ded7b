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

//! Transmitting seekable content with conditional request and byte range support

use bytes::BytesMut;
use http::{method::Method, status::StatusCode};
use log::{debug, error, warn};
use pingora::{Error, ErrorType};
use std::cmp::min;
use std::io::{Read, Seek, SeekFrom};
use std::time::SystemTime;

use crate::metadata::Metadata;
use crate::range::Range;
use crate::session::SessionWrapper;
use crate::standard_response::{error_response, text_response};

const BUFFER_SIZE: usize = 64 * 1024;

/// Readable content supporting random access
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send + ?Sized> SeekRead for T {}

/// Responds with the given content.
///
/// The name identifies the content, its extension determines the `Content-Type` header. The
/// modification time is used for the `Last-Modified` header and together with the content size
/// for the `ETag` header. Conditional requests and single byte ranges are handled here, so are
/// `HEAD` requests. Other methods than `GET` and `HEAD` are rejected.
///
/// An error is only returned if writing to the session fails.
pub async fn serve_content(
    session: &mut impl SessionWrapper,
    name: &str,
    modified: SystemTime,
    content: &mut dyn SeekRead,
) -> Result<(), Box<Error>> {
    let method = session.req_header().method.clone();
    if method != Method::GET && method != Method::HEAD {
        warn!("Denying method {method}");
        error_response(session, StatusCode::METHOD_NOT_ALLOWED).await?;
        return Ok(());
    }

    let size = match content.seek(SeekFrom::End(0)) {
        Ok(size) => size,
        Err(err) => {
            warn!("failed determining size of {name}: {err}");
            text_response(
                session,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error (seek)",
            )
            .await?;
            return Ok(());
        }
    };

    let meta = Metadata::new(name, size, modified);

    if meta.has_failed_precondition(&*session) {
        debug!("If-Match/If-Unmodified-Since precondition failed");
        let header = meta.to_custom_header(StatusCode::PRECONDITION_FAILED)?;
        session.write_response_header(header, true).await?;
        return Ok(());
    }

    if meta.is_not_modified(&*session) {
        debug!("If-None-Match/If-Modified-Since check resulted in Not Modified");
        let header = meta.to_custom_header(StatusCode::NOT_MODIFIED)?;
        session.write_response_header(header, true).await?;
        return Ok(());
    }

    let (header, start, len) = match meta.requested_range(&*session) {
        Some(Range::Valid(start, end)) => {
            debug!("bytes range requested: {start}-{end}");
            (
                meta.to_partial_content_header(start, end)?,
                start,
                end - start + 1,
            )
        }
        Some(Range::OutOfBounds) => {
            debug!("requested bytes range is out of bounds");
            let header = meta.to_not_satisfiable_header()?;
            session.write_response_header(header, true).await?;
            return Ok(());
        }
        None => {
            // Range is either missing or cannot be parsed, produce the entire content.
            (meta.to_response_header()?, 0, size)
        }
    };

    let send_body = method == Method::GET && len > 0;
    session.write_response_header(header, !send_body).await?;

    if send_body {
        write_content(session, name, content, start, len).await?;
    }
    Ok(())
}

async fn write_content(
    session: &mut impl SessionWrapper,
    name: &str,
    content: &mut dyn SeekRead,
    start: u64,
    len: u64,
) -> Result<(), Box<Error>> {
    content.seek(SeekFrom::Start(start)).map_err(|err| {
        error!("failed seeking in {name}: {err}");
        Error::because(ErrorType::ReadError, "failed seeking in content", err)
    })?;

    let mut remaining = len;
    while remaining > 0 {
        let mut buf = BytesMut::zeroed(min(remaining, BUFFER_SIZE as u64) as usize);
        let read = content.read(buf.as_mut()).map_err(|err| {
            error!("failed reading data from {name}: {err}");
            Error::because(ErrorType::ReadError, "failed reading content", err)
        })?;

        if read == 0 {
            error!("content ended with {remaining} bytes left to be written");
            return Err(Error::new(ErrorType::ReadError));
        }

        buf.truncate(read);
        remaining -= read as u64;
        session
            .write_response_body(Some(buf.freeze()), remaining == 0)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::TestSession;
    use std::io::Cursor;
    use std::time::Duration;
    use test_log::test;

    const CONTENT: &str = "0123456789abcdef";

    fn modified() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000)
    }

    async fn serve(session: &mut TestSession) {
        let mut content = Cursor::new(CONTENT.as_bytes().to_vec());
        serve_content(session, "sub/data.txt", modified(), &mut content)
            .await
            .unwrap();
    }

    #[test(tokio::test)]
    async fn full_content() {
        let mut session = TestSession::new("GET", "/data.txt").unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 200);
        assert_eq!(session.response_header("Content-Length"), Some("16"));
        assert_eq!(session.response_header("Content-Type"), Some("text/plain"));
        assert_eq!(session.response_header("Accept-Ranges"), Some("bytes"));
        assert_eq!(
            session.response_header("Last-Modified"),
            Some("Sun, 09 Sep 2001 01:46:40 GMT")
        );
        assert_eq!(session.response_header("ETag"), Some("\"3b9aca00-10\""));
        assert_eq!(session.body_str(), CONTENT);
        assert!(session.is_finished());
    }

    #[test(tokio::test)]
    async fn head_request() {
        let mut session = TestSession::new("HEAD", "/data.txt").unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 200);
        assert_eq!(session.response_header("Content-Length"), Some("16"));
        assert_eq!(session.body_str(), "");
        assert!(session.is_finished());
    }

    #[test(tokio::test)]
    async fn wrong_method() {
        let mut session = TestSession::new("POST", "/data.txt").unwrap();
        serve(&mut session).await;
        assert_eq!(session.status(), 405);
    }

    #[test(tokio::test)]
    async fn partial_content() {
        let mut session = TestSession::new("GET", "/data.txt").unwrap();
        session
            .req_header_mut()
            .insert_header("Range", "bytes=2-5")
            .unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 206);
        assert_eq!(session.response_header("Content-Length"), Some("4"));
        assert_eq!(session.response_header("Content-Range"), Some("bytes 2-5/16"));
        assert_eq!(session.body_str(), "2345");
    }

    #[test(tokio::test)]
    async fn range_not_satisfiable() {
        let mut session = TestSession::new("GET", "/data.txt").unwrap();
        session
            .req_header_mut()
            .insert_header("Range", "bytes=20-")
            .unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 416);
        assert_eq!(session.response_header("Content-Range"), Some("bytes */16"));
        assert_eq!(session.body_str(), "");
    }

    #[test(tokio::test)]
    async fn not_modified() {
        let mut session = TestSession::new("GET", "/data.txt").unwrap();
        session
            .req_header_mut()
            .insert_header("If-Modified-Since", "Sun, 09 Sep 2001 01:46:40 GMT")
            .unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 304);
        assert_eq!(session.body_str(), "");
        assert!(session.is_finished());
    }

    #[test(tokio::test)]
    async fn precondition_failed() {
        let mut session = TestSession::new("GET", "/data.txt").unwrap();
        session
            .req_header_mut()
            .insert_header("If-Match", "\"xyz\"")
            .unwrap();
        serve(&mut session).await;

        assert_eq!(session.status(), 412);
        assert_eq!(session.body_str(), "");
    }

    #[test(tokio::test)]
    async fn empty_content() {
        let mut session = TestSession::new("GET", "/empty").unwrap();
        let mut content = Cursor::new(Vec::new());
        serve_content(&mut session, "empty", modified(), &mut content)
            .await
            .unwrap();

        assert_eq!(session.status(), 200);
        assert_eq!(session.response_header("Content-Length"), Some("0"));
        assert_eq!(
            session.response_header("Content-Type"),
            Some("application/octet-stream")
        );
        assert_eq!(session.body_str(), "");
        assert!(session.is_finished());
    }

    #[test(tokio::test)]
    async fn large_content() {
        let data = "0123456789".repeat(20_000);
        let mut session = TestSession::new("GET", "/large.txt").unwrap();
        let mut content = Cursor::new(data.clone().into_bytes());
        serve_content(&mut session, "large.txt", modified(), &mut content)
            .await
            .unwrap();

        assert_eq!(session.status(), 200);
        assert_eq!(session.body_str(), data);
    }
}
