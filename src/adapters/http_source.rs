//! HTTP firmware image source.
//!
//! Fetches the node image from the fleet server with a plain blocking GET
//! and exposes it to the relay as an [`ImageStream`]. One connection per
//! transfer; the relay's pacing keeps the socket open for the duration, so
//! the read timeout is generous.

use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};
use esp_idf_svc::http::Method;
use log::{error, info};

use crate::error::TransferError;
use crate::transfer::{ImageSource, ImageStream};

const READ_TIMEOUT_MS: u32 = 10_000;

pub struct HttpImageSource;

pub struct HttpImageStream {
    conn: EspHttpConnection,
    content_length: Option<u64>,
}

impl ImageSource for HttpImageSource {
    type Stream = HttpImageStream;

    fn open(&mut self, url: &str) -> Result<HttpImageStream, TransferError> {
        let mut conn = EspHttpConnection::new(&HttpConfiguration {
            timeout: Some(core::time::Duration::from_millis(u64::from(READ_TIMEOUT_MS))),
            ..Default::default()
        })
        .map_err(|e| {
            error!("http: connection setup failed: {e}");
            TransferError::SourceOpen
        })?;

        conn.initiate_request(Method::Get, url, &[]).map_err(|e| {
            error!("http: GET {url} failed: {e}");
            TransferError::SourceOpen
        })?;
        conn.initiate_response().map_err(|e| {
            error!("http: no response from {url}: {e}");
            TransferError::SourceOpen
        })?;

        let status = conn.status();
        if status != 200 {
            error!("http: GET {url} returned status {status}");
            return Err(TransferError::SourceOpen);
        }
        let content_length = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok());
        info!("http: image stream open (length {content_length:?})");
        Ok(HttpImageStream {
            conn,
            content_length,
        })
    }
}

impl ImageStream for HttpImageStream {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.conn.read(buf).map_err(|e| {
            error!("http: stream read failed: {e}");
            TransferError::SourceRead
        })
    }
}
