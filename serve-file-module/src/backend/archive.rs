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

//! Backend serving content from a zip archive

use chrono::{NaiveDate, TimeZone, Utc};
use http::status::StatusCode;
use log::{debug, info, warn};
use pingora::{Error, ErrorType};
use std::fmt::{self, Debug, Formatter};
use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{configuration_error, request_target, respond, ServeError, ServedResource};
use crate::path::{clamp_prefix_length, clean, contains, decode_uri_path, join, sanitize_prefix};
use crate::session::{ForwardedSession, SessionWrapper};
use crate::standard_response::{error_response, text_response};

/// Entries larger than this are rejected unless configured otherwise
pub(crate) const DEFAULT_MAX_ENTRY_SIZE: u64 = 256 * 1024 * 1024;

/// Upper bound for the buffer allocated up front when reading an entry
const MAX_INITIAL_CAPACITY: u64 = 1024 * 1024;

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// Handle to the archive file with a read position of its own
///
/// Copies share the open file but not the position, so each request can read from its own copy
/// without coordinating with others.
#[derive(Debug, Clone)]
struct ArchiveFile {
    file: Arc<File>,
    len: u64,
    position: u64,
}

impl ArchiveFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            position: 0,
        })
    }
}

impl Read for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = read_at(&self.file, buf, self.position)?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for ArchiveFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(position) => Some(position),
            SeekFrom::End(offset) => self.len.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };
        self.position = position.ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "seek to an invalid position")
        })?;
        Ok(self.position)
    }
}

fn entry_modified(time: zip::DateTime) -> SystemTime {
    NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )
    .and_then(|date| {
        date.and_hms_opt(
            u32::from(time.hour()),
            u32::from(time.minute()),
            u32::from(time.second()),
        )
    })
    .map(|naive| Utc.from_utc_datetime(&naive).into())
    .unwrap_or(UNIX_EPOCH)
}

/// Serves the entries of an open zip archive
///
/// This server sees complete request paths: a leading slash is stripped and the remainder is
/// looked up below the content prefix within the archive. Paths that are empty or end with a
/// slash get the default entry name appended.
///
/// The archive index is read once. Requests work on their own copies of it, so reading entries
/// happens concurrently.
pub struct ZipContentServer {
    path: PathBuf,
    prefix: String,
    default_entry: String,
    max_entry_size: u64,
    archive: RwLock<Option<ZipArchive<ArchiveFile>>>,
}

impl Debug for ZipContentServer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipContentServer")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .field("default_entry", &self.default_entry)
            .field("max_entry_size", &self.max_entry_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ZipContentServer {
    /// Opens the archive at `path`, serving the entries below `prefix`.
    pub fn new(
        path: impl AsRef<Path>,
        prefix: &str,
        default_entry: &str,
    ) -> Result<Self, Box<Error>> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(configuration_error("archive file path is not given"));
        }

        let file = ArchiveFile::open(path).map_err(|err| {
            Error::because(
                ErrorType::FileOpenError,
                format!("failed opening archive {path:?}"),
                err,
            )
        })?;
        let archive = ZipArchive::new(file).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading archive {path:?}"),
                err,
            )
        })?;

        let prefix = clean(prefix)
            .trim_matches(|c| c == '/' || c == '\\')
            .to_owned();
        info!(
            "opened archive {path:?} with {} entries, serving prefix {prefix:?}",
            archive.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            prefix,
            default_entry: default_entry.to_owned(),
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            archive: RwLock::new(Some(archive)),
        })
    }

    /// Changes the size limit for entries, larger entries produce `500 Internal Server Error`.
    pub fn with_max_entry_size(mut self, max_entry_size: u64) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    /// Checks whether the archive has been closed.
    pub fn is_closed(&self) -> bool {
        self.archive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn entry_name(&self, uri_path: &str) -> Option<String> {
        let mut relative = uri_path.strip_prefix('/').unwrap_or(uri_path).to_owned();
        if relative.is_empty() || relative.ends_with('/') {
            relative.push_str(&self.default_entry);
        }

        let name = join(&self.prefix, &relative);
        if name.is_empty() || !contains(&self.prefix, &name) {
            debug!("rejecting path {uri_path} outside of the archive prefix");
            return None;
        }
        Some(name)
    }

    /// Reads the entry a (decoded) request path refers to.
    pub fn open(&self, uri_path: &str) -> Result<ServedResource, ServeError> {
        let name = self.entry_name(uri_path).ok_or(ServeError::NotFound)?;

        let Some(mut archive) = self
            .archive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return Err(ServeError::Unavailable);
        };

        let mut entry = match archive.by_name(&name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                debug!("no entry {name} in archive {:?}", self.path);
                return Err(ServeError::NotFound);
            }
            Err(err) => {
                warn!("failed on open entry {name}: {err}");
                return Err(ServeError::BackendFailure);
            }
        };
        if entry.is_dir() {
            debug!("{name} is a directory");
            return Err(ServeError::NotFound);
        }

        // The declared size comes from the archive and cannot be trusted.
        if entry.size() > self.max_entry_size {
            warn!(
                "entry {name} declares {} bytes, exceeding the limit of {} bytes",
                entry.size(),
                self.max_entry_size
            );
            return Err(ServeError::BackendFailure);
        }

        let capacity = usize::try_from(entry.size().min(MAX_INITIAL_CAPACITY)).unwrap_or(0);
        let mut content = Vec::with_capacity(capacity);
        (&mut entry)
            .take(self.max_entry_size.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(|err| {
                warn!("failed reading entry {name}: {err}");
                ServeError::BackendFailure
            })?;
        if content.len() as u64 > self.max_entry_size {
            warn!("entry {name} exceeds the limit of {} bytes", self.max_entry_size);
            return Err(ServeError::BackendFailure);
        }
        let modified = entry_modified(entry.last_modified());

        Ok(ServedResource {
            content: Box::new(Cursor::new(content)),
            name,
            modified,
        })
    }

    /// Responds with the archive entry the request refers to.
    pub async fn serve(&self, session: &mut impl SessionWrapper) -> Result<(), Box<Error>> {
        let resolved = match decode_uri_path(session.uri().path()) {
            Some(path) => self.open(&path),
            None => Err(ServeError::NotFound),
        };
        respond(session, resolved, "internal error (zip-archive)").await
    }

    /// Closes the archive, requests will be rejected afterwards. Closing again does nothing.
    pub fn close(&self) -> Result<(), Box<Error>> {
        let archive = self
            .archive
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if archive.is_some() {
            info!("closed archive {:?}", self.path);
        }
        Ok(())
    }
}

/// Serves the entries of a zip archive, handing requests over to a [`ZipContentServer`]
///
/// The URL prefix is stripped from the request path, the remainder is forwarded to the archive
/// server as a rewritten request. Once closed, all requests receive `502 Bad Gateway`.
#[derive(Debug)]
pub struct ArchiveBackend {
    prefix_length: usize,
    server: RwLock<Option<Arc<ZipContentServer>>>,
}

impl ArchiveBackend {
    /// Opens the archive at `path` and serves the entries below `archive_prefix`, stripping
    /// `prefix_length` bytes from request paths. The prefix length is raised to 1 if it is lower.
    pub fn new(
        prefix_length: usize,
        path: impl AsRef<Path>,
        archive_prefix: &str,
        default_entry: &str,
    ) -> Result<Self, Box<Error>> {
        let server = ZipContentServer::new(path, archive_prefix, default_entry)?;
        Ok(Self::with_server(prefix_length, server))
    }

    /// Opens the archive, stripping the given URL prefix from request paths. The prefix is
    /// normalized to start and end with a slash.
    pub fn with_prefix(
        prefix: &str,
        path: impl AsRef<Path>,
        archive_prefix: &str,
        default_entry: &str,
    ) -> Result<Self, Box<Error>> {
        Self::new(
            sanitize_prefix(prefix).len(),
            path,
            archive_prefix,
            default_entry,
        )
    }

    /// Wraps an archive server that has been opened already.
    pub fn with_server(prefix_length: usize, server: ZipContentServer) -> Self {
        Self {
            prefix_length: clamp_prefix_length(prefix_length),
            server: RwLock::new(Some(Arc::new(server))),
        }
    }

    /// The number of bytes stripped from request paths
    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    fn server(&self) -> Option<Arc<ZipContentServer>> {
        self.server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Responds with the archive entry the request refers to, see [`ContentServer::serve`].
    ///
    /// [`ContentServer::serve`]: super::ContentServer::serve
    pub async fn serve(
        &self,
        session: &mut impl SessionWrapper,
        default_name: &str,
        target: &str,
    ) -> Result<(), Box<Error>> {
        let Some(server) = self.server() else {
            debug!("archive closed, rejecting request");
            return text_response(session, StatusCode::BAD_GATEWAY, "archive file closed").await;
        };

        let mut target =
            request_target(&*session, self.prefix_length, default_name, target).unwrap_or_default();
        if target.is_empty() {
            return error_response(session, StatusCode::NOT_FOUND).await;
        }
        if !target.starts_with('/') {
            target.insert(0, '/');
        }

        debug!("forwarding request to archive as {target}");
        let mut forwarded = match ForwardedSession::new(&mut *session, &target) {
            Ok(forwarded) => forwarded,
            Err(err) => {
                debug!("cannot forward request for {target}: {err}");
                return error_response(session, StatusCode::NOT_FOUND).await;
            }
        };
        server.serve(&mut forwarded).await
    }

    /// Closes the archive. Closing again does nothing.
    pub fn close(&self) -> Result<(), Box<Error>> {
        let server = self
            .server
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match server {
            Some(server) => server.close(),
            None => Ok(()),
        }
    }
}
