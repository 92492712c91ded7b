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

//! Path resolution logic
//!
//! Request paths go through three steps before any backend touches them: the URL prefix is
//! stripped ([`resolve_target`]), the remainder is joined onto the backend root ([`join`] or
//! [`join_path`]) and the result is checked against the root ([`contains`] or
//! [`contains_path`]). All of this is purely lexical, nothing here accesses the file system.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

// This matches pingora logic, see https://github.com/cloudflare/pingora/blob/2501d4adb038d93613c0edbd7c1e3b3de9b415b1/pingora-core/src/protocols/http/v1/server.rs#L934
// `%`, `?` and `#` are added so that decoding the result produces the original path again.
// `` ` ``, `{` and `}` are rejected by `http::Uri` in paths.
const URI_ESC_CHARSET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'<')
    .add(b'>')
    .add(b'"')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'?')
    .add(b'#');

/// Makes sure that a URL path prefix starts and ends with a slash (`/`). An empty prefix becomes
/// `/`. Applying this function to its own result doesn’t change anything.
///
/// ```rust
/// use serve_file_module::path::sanitize_prefix;
///
/// assert_eq!(sanitize_prefix("content"), "/content/");
/// assert_eq!(sanitize_prefix(""), "/");
/// ```
pub fn sanitize_prefix(prefix: &str) -> String {
    let mut result = String::with_capacity(prefix.len() + 2);
    if !prefix.starts_with('/') {
        result.push('/');
    }
    result.push_str(prefix);
    if !result.ends_with('/') {
        result.push('/');
    }
    result
}

/// Coerces a URL path prefix length into the valid range. Every request path starts with a slash,
/// so at least one character is always stripped.
pub fn clamp_prefix_length(prefix_length: usize) -> usize {
    prefix_length.max(1)
}

/// Percent-decodes a URI path. Returns `None` if the decoded path isn’t valid UTF-8.
pub fn decode_uri_path(uri_path: &str) -> Option<Cow<'_, str>> {
    percent_decode_str(uri_path).decode_utf8().ok()
}

/// Percent-encodes a path so that it can be used as URI path. This reverses [`decode_uri_path`].
pub fn encode_uri_path(path: &str) -> String {
    utf8_percent_encode(path, URI_ESC_CHARSET).to_string()
}

/// Determines the content path a request refers to.
///
/// A non-empty `explicit_target` is returned verbatim, the request path is ignored then.
/// Otherwise the first `prefix_length` bytes of the request path are stripped. If nothing or
/// merely a slash remains, `default_name` is returned. `None` is returned if `prefix_length`
/// doesn’t fall on a character boundary of the request path.
///
/// ```rust
/// use serve_file_module::path::resolve_target;
///
/// assert_eq!(resolve_target("/content/", 9, "", "index.html"), Some("index.html"));
/// assert_eq!(resolve_target("/content/a.txt", 9, "", "index.html"), Some("a.txt"));
/// assert_eq!(resolve_target("/content/a.txt", 9, "b.txt", "index.html"), Some("b.txt"));
/// assert_eq!(resolve_target("/ä", 2, "", "index.html"), None);
/// ```
pub fn resolve_target<'a>(
    request_path: &'a str,
    prefix_length: usize,
    explicit_target: &'a str,
    default_name: &'a str,
) -> Option<&'a str> {
    if !explicit_target.is_empty() {
        return Some(explicit_target);
    }

    // A prefix length within a multi-byte character means the path never matched the prefix.
    let remainder = if prefix_length >= request_path.len() {
        ""
    } else {
        request_path.get(prefix_length..)?
    };
    if remainder.is_empty() || remainder == "/" {
        Some(default_name)
    } else {
        Some(remainder)
    }
}

/// Lexically cleans a slash-separated path.
///
/// Empty and `.` segments are dropped, `..` segments remove the preceding segment. A rooted path
/// stays rooted and `..` cannot climb above its root. A relative path keeps leading `..` segments
/// that have nothing left to remove. An empty relative result is returned as empty string.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            _ => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Joins a target path onto a slash-separated root and cleans the result. Leading slashes of the
/// target don’t make it replace the root.
pub fn join(root: &str, target: &str) -> String {
    if root.is_empty() {
        clean(target.trim_start_matches('/'))
    } else {
        clean(&format!("{root}/{target}"))
    }
}

/// Checks whether a slash-separated path lies within the root, comparing the cleaned forms of both.
///
/// The check respects segment boundaries: `assets2/file` is not within `assets`. An empty root
/// designates the root of a relative namespace, everything is contained in it except for rooted
/// paths and paths climbing out via `..`.
pub fn contains(root: &str, joined: &str) -> bool {
    let root = clean(root);
    let joined = clean(joined);
    if root.is_empty() {
        !(joined.starts_with('/') || joined == ".." || joined.starts_with("../"))
    } else if root == "/" {
        joined.starts_with('/')
    } else {
        joined
            .strip_prefix(root.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Joins a slash-separated target path onto a directory, one segment at a time.
///
/// `..` segments remove the last component, so the result might end up outside the root. Use
/// [`contains_path`] to verify.
pub fn join_path(root: &Path, target: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                path.pop();
            }
            _ => path.push(segment),
        }
    }
    path
}

/// Checks whether a joined path lies within the root directory.
pub fn contains_path(root: &Path, joined: &Path) -> bool {
    joined.starts_with(root)
        && !joined
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_prefix(""), "/");
        assert_eq!(sanitize_prefix("/"), "/");
        assert_eq!(sanitize_prefix("content"), "/content/");
        assert_eq!(sanitize_prefix("/content"), "/content/");
        assert_eq!(sanitize_prefix("content/"), "/content/");
        assert_eq!(sanitize_prefix("/a/b/"), "/a/b/");

        for prefix in ["", "/", "x", "/x", "x/", "//", "/a//b", "ä"] {
            let sanitized = sanitize_prefix(prefix);
            assert!(sanitized.starts_with('/'), "{sanitized}");
            assert!(sanitized.ends_with('/'), "{sanitized}");
            assert_eq!(sanitize_prefix(&sanitized), sanitized);
        }
    }

    #[test]
    fn prefix_length() {
        assert_eq!(clamp_prefix_length(0), 1);
        assert_eq!(clamp_prefix_length(1), 1);
        assert_eq!(clamp_prefix_length(9), 9);
    }

    #[test]
    fn default_substitution() {
        let resolve = |path| resolve_target(path, 9, "", "index.html");
        assert_eq!(resolve("/content"), Some("index.html"));
        assert_eq!(resolve("/content/"), Some("index.html"));
        assert_eq!(resolve("/content//"), Some("index.html"));
        assert_eq!(resolve("/content/x"), Some("x"));
        assert_eq!(resolve("/content/sub/page.html"), Some("sub/page.html"));

        assert_eq!(resolve_target("/", 1, "", "index.html"), Some("index.html"));
        assert_eq!(resolve_target("/a", 1, "", "index.html"), Some("a"));
        assert_eq!(resolve_target("/content/", 9, "", ""), Some(""));
    }

    #[test]
    fn explicit_target() {
        assert_eq!(resolve_target("/content/x", 9, "y", "index.html"), Some("y"));
        assert_eq!(resolve_target("/content/", 9, "y", "index.html"), Some("y"));
        assert_eq!(resolve_target("", 9, "../y", "index.html"), Some("../y"));
    }

    #[test]
    fn prefix_within_character() {
        assert_eq!(resolve_target("/ä/x", 2, "", "index.html"), None);
        assert_eq!(resolve_target("/ä", 2, "", "index.html"), None);
        assert_eq!(resolve_target("/ä/x", 3, "", "index.html"), Some("/x"));
        assert_eq!(resolve_target("/ä", 2, "y", "index.html"), Some("y"));
        assert_eq!(resolve_target("/ä", 9, "", "index.html"), Some("index.html"));
    }

    #[test]
    fn cleaning() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("."), "");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("a/./b//c/"), "a/b/c");
        assert_eq!(clean("a/../b"), "b");
        assert_eq!(clean("a/../../b"), "../b");
        assert_eq!(clean("../../a"), "../../a");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("/srv/www/../www2/x"), "/srv/www2/x");
    }

    #[test]
    fn joining() {
        assert_eq!(join("assets", "sub/page.html"), "assets/sub/page.html");
        assert_eq!(join("assets", "/sub/page.html"), "assets/sub/page.html");
        assert_eq!(join("assets", "../secret"), "secret");
        assert_eq!(join("", "/sub/page.html"), "sub/page.html");
        assert_eq!(join("", "../secret"), "../secret");
    }

    #[test]
    fn containment() {
        assert!(contains("assets", "assets"));
        assert!(contains("assets", "assets/sub/page.html"));
        assert!(contains("assets/", "assets/./sub/../page.html"));
        assert!(!contains("assets", "assets/../secret"));
        assert!(!contains("assets", "assets2/page.html"));
        assert!(!contains("assets", "../assets/page.html"));
        assert!(!contains("assets", "secret"));

        assert!(contains("", "page.html"));
        assert!(contains("", "sub/../page.html"));
        assert!(!contains("", "../page.html"));
        assert!(!contains("", ".."));
        assert!(!contains("", "/etc/passwd"));

        assert!(contains("/srv/www", "/srv/www/index.html"));
        assert!(!contains("/srv/www", "/srv/www/../www2/index.html"));
        assert!(!contains("/srv/www", "/srv/www2/index.html"));
        assert!(!contains("/srv/www", "/srv/www/../../etc/passwd"));
        assert!(contains("/", "/etc/passwd"));
    }

    #[test]
    fn adversarial_joins() {
        let root = "assets";
        for target in [
            "..",
            "../secret",
            "../../secret",
            "sub/../../secret",
            "./../assets2/x",
            "/../secret",
        ] {
            let joined = join(root, target);
            assert!(!contains(root, &joined), "{target} resolved to {joined}");
        }
    }

    #[test]
    fn path_joining() {
        let root = Path::new("/srv/www");
        assert_eq!(
            join_path(root, "sub/page.html"),
            PathBuf::from("/srv/www/sub/page.html")
        );
        assert_eq!(
            join_path(root, "/./sub//page.html"),
            PathBuf::from("/srv/www/sub/page.html")
        );
        assert!(contains_path(root, &join_path(root, "sub/../page.html")));

        for target in ["..", "../www2/x", "../../../etc/passwd", "/../../etc/passwd"] {
            let joined = join_path(root, target);
            assert!(!contains_path(root, &joined), "{target} resolved to {joined:?}");
        }
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(decode_uri_path("/a%20b/%2e%2e").unwrap(), "/a b/..");
        assert!(decode_uri_path("/%ff").is_none());
        assert_eq!(encode_uri_path("/a b/c%d?e"), "/a%20b/c%25d%3Fe");
        assert_eq!(encode_uri_path("/a`b{c}.html"), "/a%60b%7Bc%7D.html");
        assert_eq!(decode_uri_path(&encode_uri_path("/a`b.html")).unwrap(), "/a`b.html");
        assert_eq!(
            decode_uri_path(&encode_uri_path("/файл %41.txt")).unwrap(),
            "/файл %41.txt"
        );
    }
}
