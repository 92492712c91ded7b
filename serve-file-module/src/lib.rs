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

//! # Serve File Module for Pingora
//!
//! This crate allows extending [Pingora Proxy](https://github.com/cloudflare/pingora) with the
//! capability to serve static content under a URL prefix from one of several backends:
//!
//! * [`FileSystemBackend`]: files below a directory
//! * [`StoreBackend`]: entries of any [`ContentStore`] implementation, e.g. [`MemoryStore`]
//! * [`ArchiveBackend`]: entries of a zip archive
//!
//! All backends strip the URL prefix from the request path and serve a default document (e.g.
//! `index.html`) for requests to the prefix itself. Requests resolving to a location outside the
//! backend’s root are answered with 404 Not Found, same as requests for missing content.
//!
//! ## Supported functionality
//!
//! * `GET` and `HEAD` requests
//! * Conditional requests via `If-Modified-Since`, `If-Unmodified-Since`, `If-Match`, `If-None`
//!   match HTTP headers
//! * Byte range requests via `Range` and `If-Range` HTTP headers
//! * Serving a fixed target file under `<url_prefix>target`
//!
//! ## Known limitations
//!
//! * Requests with multiple byte ranges are not supported and will result in the full file being
//!   returned.
//! * Archive entries are read into memory completely before being served.
//!
//! ## Code example
//!
//! You will typically create a [`ContentHandler`] instance and make your server call it during
//! the `request_filter` stage, wrapping the Pingora session into a
//! [`PingoraSession`](session::PingoraSession). The handler always produces a response.
//!
//! ```rust
//! use serve_file_module::{ContentConf, ContentHandler};
//!
//! let conf = ContentConf {
//!     folder: Some(env!("CARGO_MANIFEST_DIR").into()),
//!     ..Default::default()
//! };
//! let handler = ContentHandler::new(conf).unwrap();
//! assert_eq!(handler.prefix(), "/content/");
//! ```
//!
//! Backends can also be used directly via [`ContentServer`]:
//!
//! ```rust
//! use serve_file_module::session::TestSession;
//! use serve_file_module::{ContentServer, MemoryStore, StoreBackend};
//! use std::sync::Arc;
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let store = MemoryStore::new().with_file("assets/index.html", "<h1>Home</h1>");
//! let server: ContentServer =
//!     StoreBackend::with_prefix("/content/", Arc::new(store), "assets", None).into();
//!
//! let mut session = TestSession::new("GET", "/content/").unwrap();
//! server.serve(&mut session, "index.html", "").await.unwrap();
//! assert_eq!(session.status(), 200);
//! assert_eq!(session.body_str(), "<h1>Home</h1>");
//! # }
//! ```

pub mod backend;
mod configuration;
pub mod content;
mod handler;
pub mod metadata;
pub mod path;
pub mod range;
pub mod session;
pub mod standard_response;

pub use backend::{
    ArchiveBackend, ContentServer, ContentStore, FileSystemBackend, MemoryStore, ServeError,
    ServedResource, StoreBackend, StoreEntry, ZipContentServer,
};
pub use configuration::{ContentConf, ContentOpt};
pub use content::{serve_content, SeekRead};
pub use handler::ContentHandler;
