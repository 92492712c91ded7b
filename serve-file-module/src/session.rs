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

//! Abstraction over the session a response is written to.
//!
//! The handlers in this crate only need to see the request header and to write a response. This
//! makes it possible to forward a request with a rewritten URI to another handler
//! ([`ForwardedSession`]) and to run handlers without a network connection ([`TestSession`]).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::Uri;
use pingora::http::{RequestHeader, ResponseHeader};
use pingora::proxy::Session;
use pingora::{Error, ErrorType};
use std::borrow::Cow;
use std::fmt::{self, Debug, Formatter};

use crate::path::encode_uri_path;

/// A trait implemented by wrappers around Pingora’s session
#[async_trait]
pub trait SessionWrapper: Send {
    /// Returns the request header.
    fn req_header(&self) -> &RequestHeader;

    /// Returns the request URI.
    fn uri(&self) -> &Uri {
        &self.req_header().uri
    }

    /// Writes the response header. If `end_of_stream` is `true`, no response body will follow.
    async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>>;

    /// Writes a chunk of the response body.
    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>>;
}

/// Adapter exposing a Pingora proxy session as [`SessionWrapper`]
pub struct PingoraSession<'a> {
    inner: &'a mut Session,
}

impl Debug for PingoraSession<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingoraSession")
            .field("uri", &self.inner.req_header().uri)
            .finish_non_exhaustive()
    }
}

impl<'a> PingoraSession<'a> {
    /// Wraps a Pingora session.
    pub fn new(inner: &'a mut Session) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionWrapper for PingoraSession<'_> {
    fn req_header(&self) -> &RequestHeader {
        self.inner.req_header()
    }

    async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.inner.write_response_header(resp, end_of_stream).await
    }

    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.inner.write_response_body(data, end_of_stream).await
    }
}

/// A session presenting a rewritten request to the handler while writing the response to the
/// original session
///
/// The rewritten request is a copy of the original one, only the URI path differs. The query
/// string is preserved.
#[derive(Debug)]
pub struct ForwardedSession<'a, S> {
    inner: &'a mut S,
    header: RequestHeader,
}

impl<'a, S: SessionWrapper> ForwardedSession<'a, S> {
    /// Wraps a session, replacing the URI path of its request by `path`. The path is expected in
    /// decoded form, it will be percent-encoded as necessary.
    pub fn new(inner: &'a mut S, path: &str) -> Result<Self, Box<Error>> {
        let header = forward_request_header(inner.req_header(), path)?;
        Ok(Self { inner, header })
    }
}

#[async_trait]
impl<S: SessionWrapper> SessionWrapper for ForwardedSession<'_, S> {
    fn req_header(&self) -> &RequestHeader {
        &self.header
    }

    async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.inner.write_response_header(resp, end_of_stream).await
    }

    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.inner.write_response_body(data, end_of_stream).await
    }
}

/// Copies a request header, replacing the URI path by the given decoded path.
pub fn forward_request_header(
    original: &RequestHeader,
    path: &str,
) -> Result<RequestHeader, Box<Error>> {
    let mut path_and_query = encode_uri_path(path);
    if let Some(query) = original.uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    let uri = Uri::builder()
        .path_and_query(path_and_query)
        .build()
        .map_err(|err| Error::because(ErrorType::InternalError, "failed rewriting URI", err))?;

    let mut header = original.clone();
    header.set_uri(uri);
    Ok(header)
}

/// A session without a connection, recording the response in memory
///
/// This is meant for tests: build a request, pass the session to a handler and inspect the
/// response afterwards.
#[derive(Debug)]
pub struct TestSession {
    header: RequestHeader,
    response: Option<ResponseHeader>,
    body: BytesMut,
    finished: bool,
}

impl TestSession {
    /// Creates a new session with a request using given method and path.
    pub fn new(method: &str, path: &str) -> Result<Self, Box<Error>> {
        let header = RequestHeader::build(method, path.as_bytes(), None)?;
        Ok(Self::from_header(header))
    }

    /// Creates a new session from a request header.
    pub fn from_header(header: RequestHeader) -> Self {
        Self {
            header,
            response: None,
            body: BytesMut::new(),
            finished: false,
        }
    }

    /// Provides read-write access to the request header, e.g. to add request headers.
    pub fn req_header_mut(&mut self) -> &mut RequestHeader {
        &mut self.header
    }

    /// Returns the response header if one has been written.
    pub fn response_written(&self) -> Option<&ResponseHeader> {
        self.response.as_ref()
    }

    /// Returns the status code of the response, `0` if no response has been written.
    pub fn status(&self) -> u16 {
        self.response
            .as_ref()
            .map_or(0, |response| response.status.as_u16())
    }

    /// Returns the value of a response header if present.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response
            .as_ref()?
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Retrieves the response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the response body as string.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Returns `true` if the end of the response has been signaled.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[async_trait]
impl SessionWrapper for TestSession {
    fn req_header(&self) -> &RequestHeader {
        &self.header
    }

    async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response.is_some() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response header written twice",
            ));
        }
        self.response = Some(*resp);
        self.finished = end_of_stream;
        Ok(())
    }

    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response.is_none() || self.finished {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response body written without an open response",
            ));
        }
        if let Some(data) = data {
            self.body.extend_from_slice(&data);
        }
        self.finished = end_of_stream;
        Ok(())
    }
}
