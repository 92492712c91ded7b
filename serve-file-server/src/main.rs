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

#![doc = include_str!("../README.md")]

mod app;
mod configuration;

use clap::Parser;
use log::{error, info};
use serve_file_module::{ContentHandler, ContentOpt};

use crate::app::ContentApp;
use crate::configuration::{Conf, StartupOpt};

/// Serve static content from a directory or a zip archive
#[derive(Debug, Parser)]
struct Opt {
    #[command(flatten)]
    startup: StartupOpt,
    #[command(flatten)]
    content: ContentOpt,
}

fn main() {
    env_logger::init();

    let opt = Opt::parse();

    let mut conf = match Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])) {
        Ok(conf) => conf,
        Err(err) => {
            error!("{err}");
            Conf::default()
        }
    };
    conf.content.merge_with_opt(opt.content);

    let handler = match ContentHandler::new(conf.content) {
        Ok(handler) => handler,
        Err(err) => {
            error!("{err}");
            return;
        }
    };
    info!("serving content under {}", handler.prefix());

    let server = conf
        .startup
        .into_server(ContentApp::new(handler), Some(opt.startup));
    server.run_forever();
}
