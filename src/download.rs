//! The `/download` route.
//!
//! Every `GET /download` answers with the same bundled image as an attachment. The body is a
//! [`FileRegion`] covering the whole file, so the bytes are moved by the transport (with
//! `sendfile(2)` on Linux) instead of being read into a buffer here.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::{
    http::{
        headers::Headers,
        request::{HttpError, Request},
        response::{Body, FileRegion, Response, StatusCode, html_response},
    },
    runtime::handler::Handler,
    settings::DownloadSettings,
};

/// The only route this server answers.
pub const DOWNLOAD_ROUTE: &str = "/download";

/// Serves a fixed file as an attachment on [`DOWNLOAD_ROUTE`].
#[derive(Debug, Clone)]
pub struct DownloadHandler {
    resource: PathBuf,
    filename: String,
    content_type: String,
}

impl DownloadHandler {
    /// Builds a handler serving the resource described by `settings`.
    #[must_use]
    pub fn new(settings: &DownloadSettings) -> Self {
        Self {
            resource: settings.resource.clone(),
            filename: settings.filename.clone(),
            content_type: settings.content_type.clone(),
        }
    }

    /// The file this handler serves.
    #[must_use]
    pub fn resource(&self) -> &Path {
        &self.resource
    }

    /// Opens the resource and builds the attachment response.
    ///
    /// With `include_body` unset the response carries the same headers but no payload, as
    /// required for `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Io` if the resource cannot be opened or its length read.
    pub async fn attachment(&self, include_body: bool) -> Result<Response, HttpError> {
        let file = tokio::fs::File::open(&self.resource).await?;
        let len = file.metadata().await?.len();

        let mut headers = Headers::new();
        headers.insert(
            "content-disposition",
            format!("attachment; filename={}", self.filename),
        );
        headers.insert("content-type", self.content_type.as_str());
        headers.insert("content-length", len.to_string());

        let body = if include_body {
            Body::File(FileRegion::whole(file.into_std().await, len))
        } else {
            Body::Empty
        };

        info!(resource = %self.resource.display(), bytes = len, "serving attachment");
        Ok(Response {
            status: StatusCode::Ok,
            headers,
            body,
        })
    }
}

impl Handler for DownloadHandler {
    async fn call<W: AsyncWrite + Unpin + Send>(
        &self,
        request: &Request,
        _stream: W,
    ) -> Result<Option<Response>, HttpError> {
        if request.path() != DOWNLOAD_ROUTE {
            debug!(path = request.path(), "no such route");
            let html = "<html><body><h1>Not Found</h1></body></html>";
            return Ok(Some(html_response(StatusCode::NotFound, html)));
        }

        match request.method() {
            "GET" => self.attachment(true).await.map(Some),
            "HEAD" => self.attachment(false).await.map(Some),
            _ => {
                let html = "<html><body><h1>Method Not Allowed</h1></body></html>";
                let mut response = html_response(StatusCode::MethodNotAllowed, html);
                response.headers.insert("allow", "GET, HEAD");
                Ok(Some(response))
            }
        }
    }
}
