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

//! Data structures required for `ContentHandler` configuration

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command line options of the serve file module
#[derive(Debug, Default, Parser)]
pub struct ContentOpt {
    /// URL path prefix to serve content under, e.g. /content/
    #[clap(long)]
    pub url_prefix: Option<String>,

    /// Directory to serve content from. Takes precedence over --zip.
    #[clap(long)]
    pub folder: Option<PathBuf>,

    /// Zip archive to serve content from.
    #[clap(long)]
    pub zip: Option<PathBuf>,

    /// Content prefix path inside the zip archive, e.g. assets
    #[clap(long)]
    pub store_prefix: Option<String>,

    /// File name to serve for requests to the URL prefix or a directory.
    #[clap(long)]
    pub default_file: Option<String>,

    /// Relative path of the file to serve for the <url-prefix>target URL.
    #[clap(long)]
    pub target: Option<String>,
}

/// Configuration file settings of the serve file module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConf {
    /// URL path prefix to serve content under, e.g. /content/
    pub url_prefix: String,

    /// Directory to serve content from. Takes precedence over `zip`.
    pub folder: Option<PathBuf>,

    /// Zip archive to serve content from.
    pub zip: Option<PathBuf>,

    /// Content prefix path inside the zip archive, e.g. assets
    pub store_prefix: String,

    /// File name to serve for requests to the URL prefix or a directory.
    pub default_file: String,

    /// Relative path of the file to serve for the `<url_prefix>target` URL.
    pub target: Option<String>,
}

impl ContentConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: ContentOpt) {
        if let Some(url_prefix) = opt.url_prefix {
            self.url_prefix = url_prefix;
        }

        if opt.folder.is_some() {
            self.folder = opt.folder;
        }

        if opt.zip.is_some() {
            self.zip = opt.zip;
        }

        if let Some(store_prefix) = opt.store_prefix {
            self.store_prefix = store_prefix;
        }

        if let Some(default_file) = opt.default_file {
            self.default_file = default_file;
        }

        if opt.target.is_some() {
            self.target = opt.target;
        }
    }
}

impl Default for ContentConf {
    fn default() -> Self {
        Self {
            url_prefix: "/content/".to_owned(),
            folder: None,
            zip: None,
            store_prefix: String::new(),
            default_file: "index.html".to_owned(),
            target: None,
        }
    }
}
