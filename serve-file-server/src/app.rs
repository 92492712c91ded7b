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

//! The Pingora application answering all requests from the content handler

use async_trait::async_trait;
use log::warn;
use pingora::proxy::{ProxyHttp, Session};
use pingora::upstreams::peer::HttpPeer;
use pingora::{Error, ErrorType};
use serve_file_module::session::PingoraSession;
use serve_file_module::ContentHandler;

/// Application handling every request during the `request_filter` phase
#[derive(Debug)]
pub(crate) struct ContentApp {
    handler: ContentHandler,
}

impl ContentApp {
    pub(crate) fn new(handler: ContentHandler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ProxyHttp for ContentApp {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<bool, Box<Error>> {
        self.handler
            .handle(&mut PingoraSession::new(session))
            .await
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>, Box<Error>> {
        // Never reached, request_filter always produces a response
        Err(Error::new(ErrorType::HTTPStatus(404)))
    }
}

impl Drop for ContentApp {
    fn drop(&mut self) {
        if let Err(err) = self.handler.close() {
            warn!("failed closing content server: {err}");
        }
    }
}
