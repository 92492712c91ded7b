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

//! Backend serving content from an abstract content store

use bytes::Bytes;
use log::{debug, warn};
use pingora::Error;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{self, Cursor, ErrorKind};
use std::sync::Arc;
use std::time::SystemTime;

use super::{request_target, respond, ServeError, ServedResource};
use crate::content::SeekRead;
use crate::path::{clamp_prefix_length, clean, contains, join, sanitize_prefix};
use crate::session::SessionWrapper;

/// A read-only hierarchical namespace of files
///
/// Paths are slash-separated and relative to the store root, without leading or trailing
/// slashes. The empty path designates the store root.
pub trait ContentStore: Debug + Send + Sync {
    /// Opens the entry at the given path. An error of kind [`ErrorKind::NotFound`] indicates that
    /// there is no such entry.
    fn open(&self, path: &str) -> io::Result<Box<dyn StoreEntry>>;
}

/// An entry opened from a [`ContentStore`]
pub trait StoreEntry: Send {
    /// Checks whether the entry is a directory.
    fn is_dir(&self) -> io::Result<bool>;

    /// Converts the entry into readable content with random access, `None` if the entry doesn’t
    /// support it.
    fn into_seekable(self: Box<Self>) -> Option<Box<dyn SeekRead>>;
}

/// Serves files from a sub-tree of a content store
///
/// A content store carries no modification times, all content is reported as modified at the
/// same point in time.
#[derive(Debug, Clone)]
pub struct StoreBackend {
    prefix_length: usize,
    store: Arc<dyn ContentStore>,
    root: String,
    modified: SystemTime,
}

impl StoreBackend {
    /// Creates a backend serving the sub-tree at `root` within the store, stripping
    /// `prefix_length` bytes from request paths. The prefix length is raised to 1 if it is lower.
    ///
    /// All content is reported as modified at `modified`, the current time if `None`.
    pub fn new(
        prefix_length: usize,
        store: Arc<dyn ContentStore>,
        root: &str,
        modified: Option<SystemTime>,
    ) -> Self {
        let root = clean(root)
            .trim_matches(|c| c == '/' || c == '\\')
            .to_owned();
        debug!("serving content store sub-tree {root:?}");

        Self {
            prefix_length: clamp_prefix_length(prefix_length),
            store,
            root,
            modified: modified.unwrap_or_else(SystemTime::now),
        }
    }

    /// Creates a backend stripping the given URL prefix from request paths. The prefix is
    /// normalized to start and end with a slash.
    pub fn with_prefix(
        prefix: &str,
        store: Arc<dyn ContentStore>,
        root: &str,
        modified: Option<SystemTime>,
    ) -> Self {
        Self::new(sanitize_prefix(prefix).len(), store, root, modified)
    }

    /// The number of bytes stripped from request paths
    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    /// The modification time reported for all content
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Opens the entry a content path refers to.
    pub fn open(&self, target: &str) -> Result<ServedResource, ServeError> {
        let path = join(&self.root, target);
        if !contains(&self.root, &path) {
            debug!("rejecting path {target} outside of the store root");
            return Err(ServeError::NotFound);
        }
        if path.is_empty() {
            debug!("refusing to serve the store root");
            return Err(ServeError::NotFound);
        }

        let entry = match self.store.open(&path) {
            Ok(entry) => entry,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no entry {path} in the content store");
                return Err(ServeError::NotFound);
            }
            Err(err) => {
                warn!("failed on open file [{path}]: {err}");
                return Err(ServeError::BackendFailure);
            }
        };

        match entry.is_dir() {
            Ok(true) => {
                debug!("{path} is a directory");
                return Err(ServeError::NotFound);
            }
            Ok(false) => {}
            Err(err) => {
                warn!("failed on stat file [{path}]: {err}");
                return Err(ServeError::BackendFailure);
            }
        }

        let Some(content) = entry.into_seekable() else {
            warn!("failed on cast file reference [{path}]: content isn’t seekable");
            return Err(ServeError::BackendFailure);
        };

        Ok(ServedResource {
            content,
            name: path,
            modified: self.modified,
        })
    }

    /// Responds with the entry the request refers to, see [`ContentServer::serve`].
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
        respond(session, resolved, "internal error (content-store)").await
    }
}

/// A content store keeping files in memory
///
/// Directories are implicit: any path that is a proper prefix of a file path is a directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Bytes>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file to the store, replacing any file previously stored under the same path.
    pub fn insert(&mut self, path: &str, content: impl Into<Bytes>) {
        self.files
            .insert(clean(path.trim_start_matches('/')), content.into());
    }

    /// Adds a file to the store, builder-style.
    pub fn with_file(mut self, path: &str, content: impl Into<Bytes>) -> Self {
        self.insert(path, content);
        self
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }
}

impl ContentStore for MemoryStore {
    fn open(&self, path: &str) -> io::Result<Box<dyn StoreEntry>> {
        if clean(path) != path
            || path.starts_with('/')
            || path == ".."
            || path.starts_with("../")
        {
            return Err(io::Error::new(ErrorKind::InvalidInput, "invalid path"));
        }

        if path.is_empty() || self.is_dir(path) {
            Ok(Box::new(MemoryEntry::Directory))
        } else if let Some(content) = self.files.get(path) {
            Ok(Box::new(MemoryEntry::File(Cursor::new(content.clone()))))
        } else {
            Err(ErrorKind::NotFound.into())
        }
    }
}

#[derive(Debug)]
enum MemoryEntry {
    Directory,
    File(Cursor<Bytes>),
}

impl StoreEntry for MemoryEntry {
    fn is_dir(&self) -> io::Result<bool> {
        Ok(matches!(self, Self::Directory))
    }

    fn into_seekable(self: Box<Self>) -> Option<Box<dyn SeekRead>> {
        match *self {
            Self::Directory => None,
            Self::File(cursor) => Some(Box::new(cursor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;
    use std::time::{Duration, UNIX_EPOCH};
    use test_log::test;

    // Required by `Result::unwrap_err()` on `io::Result<Box<dyn StoreEntry>>`
    impl Debug for dyn StoreEntry {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("StoreEntry")
        }
    }

    fn store() -> Arc<dyn ContentStore> {
        Arc::new(
            MemoryStore::new()
                .with_file("assets/index.html", "<h1>Home</h1>")
                .with_file("/assets/sub/page.html", "<h1>Page</h1>")
                .with_file("other/secret.txt", "secret"),
        )
    }

    fn read(resource: ServedResource) -> String {
        let mut content = resource.content;
        let mut result = String::new();
        content.read_to_string(&mut result).unwrap();
        result
    }

    #[test]
    fn memory_store() {
        let store = store();
        assert!(store.open("").unwrap().is_dir().unwrap());
        assert!(store.open("assets").unwrap().is_dir().unwrap());
        assert!(store.open("assets/sub").unwrap().is_dir().unwrap());
        assert!(!store.open("assets/index.html").unwrap().is_dir().unwrap());
        assert!(store.open("assets/index.html").unwrap().into_seekable().is_some());
        assert!(store.open("assets").unwrap().into_seekable().is_none());

        assert_eq!(
            store.open("assets/missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store.open("assets/sub/page.html/x").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(store.open("ass").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            store.open("../x").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            store.open("/assets").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            store.open("assets/./index.html").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn construction() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let backend = StoreBackend::new(0, store(), "/assets/", Some(modified));
        assert_eq!(backend.prefix_length(), 1);
        assert_eq!(backend.root, "assets");
        assert_eq!(backend.modified(), modified);

        let backend = StoreBackend::with_prefix("/content", store(), "", None);
        assert_eq!(backend.prefix_length(), 9);
        assert_eq!(backend.root, "");
        assert!(backend.modified() > UNIX_EPOCH);

        let backend = StoreBackend::new(1, store(), "assets\\", None);
        assert_eq!(backend.root, "assets");
    }

    #[test]
    fn open_entries() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let backend = StoreBackend::new(1, store(), "assets", Some(modified));

        let resource = backend.open("index.html").unwrap();
        assert_eq!(resource.name, "assets/index.html");
        assert_eq!(resource.modified, modified);
        assert_eq!(read(resource), "<h1>Home</h1>");

        let resource = backend.open("/sub/page.html").unwrap();
        assert_eq!(resource.name, "assets/sub/page.html");
        assert_eq!(read(resource), "<h1>Page</h1>");

        assert_eq!(backend.open("sub").unwrap_err(), ServeError::NotFound);
        assert_eq!(backend.open("").unwrap_err(), ServeError::NotFound);
        assert_eq!(backend.open("missing").unwrap_err(), ServeError::NotFound);
    }

    #[test]
    fn outside_root() {
        let backend = StoreBackend::new(1, store(), "assets", None);
        assert_eq!(
            backend.open("../other/secret.txt").unwrap_err(),
            ServeError::NotFound
        );
        assert_eq!(
            backend.open("/sub/../../other/secret.txt").unwrap_err(),
            ServeError::NotFound
        );

        let backend = StoreBackend::new(1, store(), "", None);
        assert_eq!(backend.open("../x").unwrap_err(), ServeError::NotFound);
        assert_eq!(read(backend.open("other/secret.txt").unwrap()), "secret");
    }

    #[derive(Debug)]
    struct FailingStore;

    struct StreamEntry;

    impl StoreEntry for StreamEntry {
        fn is_dir(&self) -> io::Result<bool> {
            Ok(false)
        }

        fn into_seekable(self: Box<Self>) -> Option<Box<dyn SeekRead>> {
            None
        }
    }

    impl ContentStore for FailingStore {
        fn open(&self, path: &str) -> io::Result<Box<dyn StoreEntry>> {
            match path {
                "stream" => Ok(Box::new(StreamEntry)),
                "missing" => Err(ErrorKind::NotFound.into()),
                _ => Err(ErrorKind::PermissionDenied.into()),
            }
        }
    }

    #[test]
    fn failures() {
        let backend = StoreBackend::new(1, Arc::new(FailingStore), "", None);
        assert_eq!(
            backend.open("stream").unwrap_err(),
            ServeError::BackendFailure
        );
        assert_eq!(backend.open("missing").unwrap_err(), ServeError::NotFound);
        assert_eq!(
            backend.open("forbidden").unwrap_err(),
            ServeError::BackendFailure
        );
    }
}
