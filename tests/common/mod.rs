//! Shared test support: a scripted transport that replays recorded vendor
//! responses without a network.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_bridge::cancel::CancellationHandle;
use llm_bridge::transport::{ByteStream, HttpRequest, HttpResponse, Transport};
use llm_bridge::{CancelStage, Error, Result};

/// One scripted exchange.
pub enum Scripted {
    /// A complete buffered response.
    Buffered {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: String,
    },
    /// A streamed body delivered as chunks.
    Stream { status: u16, chunks: Vec<String> },
    /// Never responds; only cancellation ends the call.
    Hang,
}

impl Scripted {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Scripted::Buffered {
            status,
            headers: vec![("content-type", "application/json")],
            body: body.to_string(),
        }
    }

    pub fn sse(chunks: &[&str]) -> Self {
        Scripted::Stream {
            status: 200,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Transport that pops scripted responses in order and records every
/// request it saw.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    fn next(&self) -> Option<Scripted> {
        self.script.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: HttpRequest, cancel: &CancellationHandle) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        match self.next() {
            Some(Scripted::Buffered { status, headers, body }) => Ok(HttpResponse {
                status,
                status_text: String::new(),
                headers: headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.into_bytes(),
            }),
            Some(Scripted::Stream { status, chunks }) => Ok(HttpResponse {
                status,
                status_text: String::new(),
                headers: BTreeMap::new(),
                body: chunks.concat().into_bytes(),
            }),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(Error::cancelled(CancelStage::Execution))
            }
            None => Err(Error::transport("mock script exhausted")),
        }
    }

    async fn stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<(u16, BTreeMap<String, String>, ByteStream)> {
        self.requests.lock().unwrap().push(request);
        match self.next() {
            Some(Scripted::Stream { status, chunks }) => {
                let items: Vec<Result<Vec<u8>>> =
                    chunks.into_iter().map(|c| Ok(c.into_bytes())).collect();
                Ok((
                    status,
                    BTreeMap::new(),
                    Box::pin(futures::stream::iter(items)),
                ))
            }
            Some(Scripted::Buffered { status, headers, body }) => Ok((
                status,
                headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                Box::pin(futures::stream::iter(vec![Ok(body.into_bytes())])),
            )),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(Error::cancelled(CancelStage::Streaming))
            }
            None => Err(Error::transport("mock script exhausted")),
        }
    }
}
