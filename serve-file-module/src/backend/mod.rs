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

//! Backends resolving content paths against a storage medium
//!
//! Three backends are available: [`FileSystemBackend`] serves a directory tree,
//! [`StoreBackend`] serves from any [`ContentStore`] implementation and [`ArchiveBackend`] serves
//! the entries of a zip archive. [`ContentServer`] wraps whichever one has been configured.
//!
//! All backends strip a fixed number of bytes (the length of the URL prefix) from the request
//! path, substitute a default document for requests to the prefix itself and refuse to serve
//! anything outside their root.

mod archive;
mod filesystem;
mod store;

pub use archive::{ArchiveBackend, ZipContentServer};
pub use filesystem::FileSystemBackend;
pub use store::{ContentStore, MemoryStore, StoreBackend, StoreEntry};

use http::status::StatusCode;
use log::debug;
use pingora::{Error, ErrorType};
use std::fmt::{self, Debug, Formatter};
use std::time::SystemTime;

use crate::content::{serve_content, SeekRead};
use crate::path::{decode_uri_path, resolve_target};
use crate::session::SessionWrapper;
use crate::standard_response::{error_response, text_response};

/// Reasons for a request not resolving to servable content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeError {
    /// Content is missing, is a directory or lies outside the root. Results in `404 Not Found`.
    NotFound,
    /// Accessing the content failed for another reason. Results in `500 Internal Server Error`.
    BackendFailure,
    /// The backing resource has been closed. Results in `502 Bad Gateway`.
    Unavailable,
}

/// Content resolved for a single request, released once the request has been handled
pub struct ServedResource {
    /// Content data
    pub content: Box<dyn SeekRead>,
    /// Resolved path of the content, its extension determines the MIME type
    pub name: String,
    /// Modification time of the content
    pub modified: SystemTime,
}

impl Debug for ServedResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServedResource")
            .field("name", &self.name)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Creates the error returned when a backend is configured with invalid parameters.
pub fn configuration_error(message: &'static str) -> Box<Error> {
    Error::explain(ErrorType::Custom("ConfigurationError"), message)
}

/// Determines the content path for the request.
///
/// An explicit target is used as is. Otherwise the request path is decoded and resolved, `None`
/// is returned if it cannot be decoded or the prefix length splits a character.
pub(crate) fn request_target(
    session: &impl SessionWrapper,
    prefix_length: usize,
    default_name: &str,
    explicit_target: &str,
) -> Option<String> {
    if !explicit_target.is_empty() {
        return Some(explicit_target.to_owned());
    }

    let Some(path) = decode_uri_path(session.uri().path()) else {
        debug!("request path {} cannot be decoded", session.uri().path());
        return None;
    };
    let target = resolve_target(&path, prefix_length, explicit_target, default_name);
    if target.is_none() {
        debug!("request path {path} doesn’t match the prefix length {prefix_length}");
    }
    target.map(str::to_owned)
}

/// Produces the response for a resolution result. `failure_message` is the text sent with
/// `500 Internal Server Error` responses.
pub(crate) async fn respond(
    session: &mut impl SessionWrapper,
    resolved: Result<ServedResource, ServeError>,
    failure_message: &str,
) -> Result<(), Box<Error>> {
    match resolved {
        Ok(mut resource) => {
            serve_content(
                session,
                &resource.name,
                resource.modified,
                resource.content.as_mut(),
            )
            .await
        }
        Err(ServeError::NotFound) => error_response(session, StatusCode::NOT_FOUND).await,
        Err(ServeError::BackendFailure) => {
            text_response(session, StatusCode::INTERNAL_SERVER_ERROR, failure_message).await
        }
        Err(ServeError::Unavailable) => {
            text_response(session, StatusCode::BAD_GATEWAY, "archive file closed").await
        }
    }
}

/// One of the available backends
///
/// This is what callers will typically hold on to: it is created once at startup, shared by all
/// requests and closed when shutting down.
#[derive(Debug)]
pub enum ContentServer {
    /// Content from a directory
    FileSystem(FileSystemBackend),
    /// Content from an abstract content store
    Store(StoreBackend),
    /// Content from a zip archive
    Archive(ArchiveBackend),
}

impl ContentServer {
    /// Responds to the request with the content it refers to.
    ///
    /// If `target` is non-empty, it is served regardless of the request path. Otherwise the URL
    /// prefix is stripped from the request path and the remainder is served, `default_name`
    /// replacing an empty remainder.
    ///
    /// Missing content and backend failures are reported to the client, an error is only returned
    /// if writing the response fails.
    pub async fn serve(
        &self,
        session: &mut impl SessionWrapper,
        default_name: &str,
        target: &str,
    ) -> Result<(), Box<Error>> {
        match self {
            Self::FileSystem(backend) => backend.serve(session, default_name, target).await,
            Self::Store(backend) => backend.serve(session, default_name, target).await,
            Self::Archive(backend) => backend.serve(session, default_name, target).await,
        }
    }

    /// Releases the resources held by the backend. Closing a backend again does nothing.
    pub fn close(&self) -> Result<(), Box<Error>> {
        match self {
            Self::FileSystem(_) | Self::Store(_) => Ok(()),
            Self::Archive(backend) => backend.close(),
        }
    }

    /// The number of bytes stripped from request paths
    pub fn prefix_length(&self) -> usize {
        match self {
            Self::FileSystem(backend) => backend.prefix_length(),
            Self::Store(backend) => backend.prefix_length(),
            Self::Archive(backend) => backend.prefix_length(),
        }
    }
}

impl From<FileSystemBackend> for ContentServer {
    fn from(backend: FileSystemBackend) -> Self {
        Self::FileSystem(backend)
    }
}

impl From<StoreBackend> for ContentServer {
    fn from(backend: StoreBackend) -> Self {
        Self::Store(backend)
    }
}

impl From<ArchiveBackend> for ContentServer {
    fn from(backend: ArchiveBackend) -> Self {
        Self::Archive(backend)
    }
}
