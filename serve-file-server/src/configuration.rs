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

//! Configuration and command line options of the server

use clap::Parser;
use log::trace;
use pingora::proxy::{http_proxy_service, ProxyHttp};
use pingora::server::configuration::{Opt as ServerOpt, ServerConf};
use pingora::server::Server;
use pingora::{Error, ErrorType};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use serve_file_module::ContentConf;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// Run a web server
#[derive(Debug, Default, Parser)]
pub(crate) struct StartupOpt {
    /// Address and port to listen on, e.g. "127.0.0.1:8080". This command line flag can be
    /// specified multiple times.
    #[clap(short, long)]
    pub(crate) listen: Option<Vec<String>>,
    /// Use this flag to make the server run in the background.
    #[clap(short, long)]
    pub(crate) daemon: bool,
    /// Test the configuration and exit. This is useful to validate the configuration before
    /// restarting the process.
    #[clap(short, long)]
    pub(crate) test: bool,
    /// The path to the configuration file. This command line flag can be specified multiple times.
    #[clap(short, long)]
    pub(crate) conf: Option<Vec<PathBuf>>,
}

/// Configuration settings of the server startup
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct StartupConf {
    /// List of address/port combinations to listen on, e.g. "127.0.0.1:8080".
    pub(crate) listen: Vec<String>,
    /// Pingora’s default server configuration options
    pub(crate) server: ServerConf,
}

impl StartupConf {
    /// Sets up a server with the given configuration and command line options
    pub(crate) fn into_server<SV>(self, app: SV, opt: Option<StartupOpt>) -> Server
    where
        SV: ProxyHttp + Send + Sync + 'static,
        <SV as ProxyHttp>::CTX: Send + Sync,
    {
        let opt = opt.unwrap_or_default();

        let listen = self.listen_addrs(opt.listen);
        let mut server = Server::new_with_opt_and_conf(
            ServerOpt {
                daemon: opt.daemon,
                test: opt.test,
                upgrade: false,
                nocapture: false,
                conf: None,
            },
            self.server,
        );
        server.bootstrap();

        let mut proxy = http_proxy_service(&server.configuration, app);
        for addr in listen {
            proxy.add_tcp(&addr);
        }
        server.add_service(proxy);

        server
    }

    fn listen_addrs(&self, opt: Option<Vec<String>>) -> Vec<String> {
        let mut listen = opt.unwrap_or_else(|| self.listen.clone());
        if listen.is_empty() {
            // Make certain we have a listening address
            listen.push("127.0.0.1:8080".to_owned());
            listen.push("[::1]:8080".to_owned());
        }
        listen
    }
}

/// The configuration of the server
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Conf {
    #[serde(flatten)]
    pub(crate) startup: StartupConf,
    pub(crate) content: ContentConf,
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Mapping(target), Value::Mapping(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (target, source) => *target = source,
    }
}

impl Conf {
    /// Loads the configuration from a number of YAML files. Settings from later files take
    /// precedence, nested mappings are merged.
    pub(crate) fn load_from_files(files: &[PathBuf]) -> Result<Self, Box<Error>> {
        let mut merged = Value::Mapping(Mapping::new());
        for path in files {
            let file = File::open(path).map_err(|err| {
                Error::because(
                    ErrorType::FileOpenError,
                    format!("failed opening configuration file {path:?}"),
                    err,
                )
            })?;
            let value = serde_yaml::from_reader(BufReader::new(file)).map_err(|err| {
                Error::because(
                    ErrorType::FileReadError,
                    format!("failed reading configuration file {path:?}"),
                    err,
                )
            })?;
            merge_values(&mut merged, value);
        }

        let conf = serde_yaml::from_value(merged).map_err(|err| {
            Error::because(
                ErrorType::Custom("ConfigurationError"),
                "invalid configuration",
                err,
            )
        })?;
        trace!("Loaded configuration: {conf:#?}");
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn conf_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("testdata");
        path.push(name);
        path
    }

    #[test]
    fn no_files() {
        let conf = Conf::load_from_files(&[]).unwrap();
        assert!(conf.startup.listen.is_empty());
        assert_eq!(conf.content, ContentConf::default());
    }

    #[test]
    fn single_file() {
        let conf = Conf::load_from_files(&[conf_path("base.yaml")]).unwrap();
        assert_eq!(conf.startup.listen, vec!["127.0.0.1:8000".to_owned()]);
        assert_eq!(conf.startup.server.threads, 2);
        assert_eq!(conf.content.url_prefix, "/static/");
        assert_eq!(conf.content.zip, Some("content.zip".into()));
        assert_eq!(conf.content.store_prefix, "assets");
    }

    #[test]
    fn merged_files() {
        let conf =
            Conf::load_from_files(&[conf_path("base.yaml"), conf_path("override.yaml")]).unwrap();
        assert_eq!(
            conf.startup.listen,
            vec!["0.0.0.0:8000".to_owned(), "[::]:8000".to_owned()]
        );
        assert_eq!(conf.startup.server.threads, 2);
        assert_eq!(conf.content.url_prefix, "/static/");
        assert_eq!(conf.content.folder, Some("/srv/www".into()));
        assert_eq!(conf.content.zip, Some("content.zip".into()));
        assert_eq!(conf.content.default_file, "home.html");
    }

    #[test]
    fn invalid_files() {
        assert!(Conf::load_from_files(&[conf_path("missing.yaml")]).is_err());
        assert!(Conf::load_from_files(&[conf_path("invalid.yaml")]).is_err());
    }

    #[test]
    fn listen_addrs() {
        let conf = StartupConf::default();
        assert_eq!(
            conf.listen_addrs(None),
            vec!["127.0.0.1:8080".to_owned(), "[::1]:8080".to_owned()]
        );

        let conf = StartupConf {
            listen: vec!["127.0.0.1:8000".to_owned()],
            ..Default::default()
        };
        assert_eq!(conf.listen_addrs(None), vec!["127.0.0.1:8000".to_owned()]);
        assert_eq!(
            conf.listen_addrs(Some(vec!["[::1]:9000".to_owned()])),
            vec!["[::1]:9000".to_owned()]
        );
    }
}
