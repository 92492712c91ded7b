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

//! Request handler routing requests to the configured content server

use http::status::StatusCode;
use log::{debug, info, warn};
use pingora::Error;

use crate::backend::{ArchiveBackend, ContentServer, FileSystemBackend};
use crate::configuration::ContentConf;
use crate::path::{decode_uri_path, sanitize_prefix};
use crate::session::SessionWrapper;
use crate::standard_response::error_response;

/// Handler serving content under the configured URL prefix
///
/// Requests to `<url_prefix>target` receive the configured target file. Other requests under the
/// URL prefix receive the file their path refers to. Anything else is answered with
/// `404 Not Found`.
#[derive(Debug)]
pub struct ContentHandler {
    conf: ContentConf,
    prefix: String,
    server: Option<ContentServer>,
}

impl ContentHandler {
    /// Creates a handler for the given configuration, setting up the backend it asks for.
    ///
    /// A content folder takes precedence over a zip archive. With neither configured, the
    /// handler answers all requests with `404 Not Found`.
    pub fn new(conf: ContentConf) -> Result<Self, Box<Error>> {
        let prefix = sanitize_prefix(&conf.url_prefix);
        let server = if let Some(folder) = &conf.folder {
            info!("serving content from folder {folder:?} under {prefix}");
            Some(FileSystemBackend::with_prefix(&prefix, folder)?.into())
        } else if let Some(zip) = &conf.zip {
            info!("serving content from archive {zip:?} under {prefix}");
            Some(
                ArchiveBackend::with_prefix(&prefix, zip, &conf.store_prefix, &conf.default_file)?
                    .into(),
            )
        } else {
            warn!("neither content folder nor archive configured, all requests will be rejected");
            None
        };

        Ok(Self {
            conf,
            prefix,
            server,
        })
    }

    /// Creates a handler for a content server that has been set up already. Backend settings
    /// of the configuration are ignored.
    pub fn with_server(conf: ContentConf, server: ContentServer) -> Self {
        let prefix = sanitize_prefix(&conf.url_prefix);
        Self {
            conf,
            prefix,
            server: Some(server),
        }
    }

    /// The configuration this handler has been created with
    pub fn conf(&self) -> &ContentConf {
        &self.conf
    }

    /// The URL prefix content is served under, starting and ending with a slash
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Responds to the request. Always returns `Ok(true)` since the response has been written.
    pub async fn handle(&self, session: &mut impl SessionWrapper) -> Result<bool, Box<Error>> {
        let Some(server) = &self.server else {
            debug!("no content server configured");
            error_response(session, StatusCode::NOT_FOUND).await?;
            return Ok(true);
        };

        let Some(path) = decode_uri_path(session.uri().path()).map(|path| path.into_owned())
        else {
            debug!("request path {} cannot be decoded", session.uri().path());
            error_response(session, StatusCode::NOT_FOUND).await?;
            return Ok(true);
        };

        match path.strip_prefix(self.prefix.as_str()) {
            Some("target") => {
                let target = self.conf.target.as_deref().unwrap_or("");
                debug!("serving configured target {target:?}");
                server
                    .serve(session, &self.conf.default_file, target)
                    .await?;
            }
            Some(_) => {
                server.serve(session, &self.conf.default_file, "").await?;
            }
            None => {
                debug!("request path {path} outside of the URL prefix");
                error_response(session, StatusCode::NOT_FOUND).await?;
            }
        }
        Ok(true)
    }

    /// Closes the content server, further requests will fail. Closing again does nothing.
    pub fn close(&self) -> Result<(), Box<Error>> {
        match &self.server {
            Some(server) => server.close(),
            None => Ok(()),
        }
    }
}
