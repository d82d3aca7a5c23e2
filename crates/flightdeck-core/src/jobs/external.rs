// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upload of recordings to an external datasource.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::archive::MAX_EMPTY_READ_RETRIES;
use crate::error::Result;
use crate::stream::{ByteStream, ChunkRead};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Destination for recordings pushed out of the archive.
#[async_trait]
pub trait ExternalSink: Send + Sync {
    /// Upload a recording and return the sink's response message.
    async fn upload(&self, filename: &str, stream: Box<dyn ByteStream>) -> Result<String>;
}

/// Posts recordings as `multipart/form-data` to `{base_url}/load`.
///
/// The request body is streamed; the recording is never buffered whole.
/// Connecting is bounded by `connect_timeout`; the upload as a whole only by
/// `upload_timeout`, since pushing a large recording outlasts any
/// request-sized limit.
#[derive(Debug, Clone)]
pub struct HttpDatasourceSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDatasourceSink {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        upload_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = upload_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Endpoint recordings are posted to.
    pub fn load_url(&self) -> String {
        format!("{}/load", self.base_url)
    }
}

#[async_trait]
impl ExternalSink for HttpDatasourceSink {
    async fn upload(&self, filename: &str, stream: Box<dyn ByteStream>) -> Result<String> {
        let url = self.load_url();
        debug!(url = %url, filename = %filename, "Uploading recording to datasource");

        let body = reqwest::Body::wrap_stream(body_stream(stream));
        let part = Part::stream(body)
            .file_name(filename.to_string())
            .mime_str(crate::archive::RECORDING_MIME_TYPE)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let message = response.text().await?;

        info!(url = %url, filename = %filename, "Uploaded recording to datasource");
        Ok(message)
    }
}

/// Adapt a [`ByteStream`] into a stream of byte buffers.
fn body_stream(
    stream: Box<dyn ByteStream>,
) -> impl futures::Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut empty_reads = 0u32;
        loop {
            match stream.read_chunk(&mut buf).await {
                Ok(ChunkRead::Bytes(n)) => {
                    buf.truncate(n);
                    return Some((Ok(buf), Some(stream)));
                }
                Ok(ChunkRead::Empty) => {
                    empty_reads += 1;
                    if empty_reads > MAX_EMPTY_READ_RETRIES {
                        let err = io::Error::new(
                            io::ErrorKind::TimedOut,
                            "recording stream returned no data",
                        );
                        return Some((Err(err), None));
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(ChunkRead::Eof) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}
