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

//! Backend serving content from a directory

use log::{debug, warn};
use pingora::{Error, ErrorType};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{configuration_error, request_target, respond, ServeError, ServedResource};
use crate::path::{clamp_prefix_length, contains_path, join_path, sanitize_prefix};
use crate::session::SessionWrapper;

/// Serves files below a root directory
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    prefix_length: usize,
    root: PathBuf,
}

impl FileSystemBackend {
    /// Creates a backend for the given root directory, stripping `prefix_length` bytes from
    /// request paths. The prefix length is raised to 1 if it is lower.
    ///
    /// The root directory is resolved to its canonical absolute form, so it has to exist.
    pub fn new(prefix_length: usize, root: impl AsRef<Path>) -> Result<Self, Box<Error>> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(configuration_error("content storage path is not given"));
        }

        let root = root.canonicalize().map_err(|err| {
            Error::because(
                ErrorType::FileOpenError,
                format!("failed accessing root directory {root:?}"),
                err,
            )
        })?;
        if !root.is_dir() {
            return Err(configuration_error("content storage path is not a directory"));
        }

        debug!("serving files from {root:?}");
        Ok(Self {
            prefix_length: clamp_prefix_length(prefix_length),
            root,
        })
    }

    /// Creates a backend for the given root directory, stripping the given URL prefix from
    /// request paths. The prefix is normalized to start and end with a slash.
    pub fn with_prefix(prefix: &str, root: impl AsRef<Path>) -> Result<Self, Box<Error>> {
        Self::new(sanitize_prefix(prefix).len(), root)
    }

    /// Creates a backend for the given root directory, stripping only the leading slash from
    /// request paths.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, Box<Error>> {
        Self::new(1, root)
    }

    /// The canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The number of bytes stripped from request paths
    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    /// Opens the file a content path refers to.
    pub fn open(&self, target: &str) -> Result<ServedResource, ServeError> {
        let path = join_path(&self.root, target);
        if !contains_path(&self.root, &path) {
            debug!("rejecting path {target} outside of the root directory");
            return Err(ServeError::NotFound);
        }

        let meta = fs::metadata(&path).map_err(|err| {
            warn!("failed on stat file {path:?}: {err}");
            ServeError::BackendFailure
        })?;
        if meta.is_dir() {
            debug!("{path:?} is a directory");
            return Err(ServeError::NotFound);
        }

        let file = File::open(&path).map_err(|err| {
            warn!("failed opening file {path:?}: {err}");
            ServeError::BackendFailure
        })?;

        Ok(ServedResource {
            content: Box::new(file),
            name: path.to_string_lossy().into_owned(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }

    /// Responds with the file the request refers to, see [`ContentServer::serve`].
    ///
    /// [`ContentServer::serve`]: super::ContentServer::serve
    pub async fn serve(
        &self,
        session: &mut impl SessionWrapper,
        default_name: &str,
        target: &str,
    ) -> Result<(), Box<Error>> {
        let resolved = request_target(&*session, self.prefix_length, default_name, target)
            .map_or(Err(ServeError::NotFound), |target| self.open(&target));
        respond(session, resolved, "internal error (file-system)").await
    }
}
