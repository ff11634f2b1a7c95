use std::{fmt, fs::File};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    http::{
        headers::{Headers, canonical_name},
        request::HttpError,
    },
    runtime::transport::Transport,
};

/// Representation of a HTTP response with status code, headers and body
#[derive(Debug)]
pub struct Response {
    /// The status of the response.
    pub status: StatusCode,
    /// The headers sent with the response.
    pub headers: Headers,
    /// The body sent after the headers.
    pub body: Body,
}

/// The payload of a response.
#[derive(Debug, Default)]
pub enum Body {
    /// No payload, e.g. for `HEAD` requests.
    #[default]
    Empty,
    /// An in-memory payload.
    Bytes(Vec<u8>),
    /// A byte range of an open file, handed to the transport without being read into memory.
    File(FileRegion),
}

/// A byte range `[offset, offset + len)` of an open file.
#[derive(Debug)]
pub struct FileRegion {
    /// The open file to send from.
    pub file: File,
    /// The first byte to send.
    pub offset: u64,
    /// The number of bytes to send.
    pub len: u64,
}

impl FileRegion {
    /// A region spanning the whole of `file`, `len` bytes long.
    #[must_use]
    pub const fn whole(file: File, len: u64) -> Self {
        Self {
            file,
            offset: 0,
            len,
        }
    }
}

/// The status codes used by this server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    /// 200
    Ok = 200,
    /// 400
    BadRequest = 400,
    /// 404
    NotFound = 404,
    /// 405
    MethodNotAllowed = 405,
    /// 408
    RequestTimeout = 408,
    /// 500
    InternalServerError = 500,
    /// 504
    GatewayTimeout = 504,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl StatusCode {
    /// The numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// The reason phrase sent on the status line.
    #[must_use]
    pub const fn reason_phrase(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::RequestTimeout => "Request Timeout",
            Self::InternalServerError => "Internal Server Error",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// Writes the status line. Hardcodes HTTP/1.1 as the only supported version.
///
/// # Errors
///
/// Returns an `HttpError` if writing fails.
pub async fn write_status_line<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    status_code: StatusCode,
) -> Result<(), HttpError> {
    let line = format!(
        "HTTP/1.1 {} {}\r\n",
        status_code.code(),
        status_code.reason_phrase()
    );
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Writes the headers in conventional casing, followed by the blank line that ends the header
/// section.
///
/// # Errors
///
/// Returns an `HttpError` if writing fails.
pub async fn write_headers<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    headers: &Headers,
) -> Result<(), HttpError> {
    let mut block = String::new();
    for (key, value) in headers.iter() {
        block.push_str(&canonical_name(key));
        block.push_str(": ");
        block.push_str(value);
        block.push_str("\r\n");
    }
    block.push_str("\r\n");
    writer.write_all(block.as_bytes()).await?;
    Ok(())
}

/// Writes a complete response. File bodies go through [`Transport::send_file`].
///
/// # Errors
///
/// Returns an `HttpError` if writing fails or a file body ends before its declared length.
pub async fn write_response<T: Transport + ?Sized>(
    transport: &mut T,
    response: Response,
) -> Result<(), HttpError> {
    write_status_line(transport, response.status).await?;
    write_headers(transport, &response.headers).await?;
    match response.body {
        Body::Empty => {}
        Body::Bytes(bytes) => transport.write_all(&bytes).await?,
        Body::File(region) => {
            transport.send_file(region).await?;
        }
    }
    transport.flush().await?;
    Ok(())
}

/// Helper function to remove boilerplate for creating html responses with associated headers.
#[must_use]
pub fn html_response(status_code: StatusCode, html: &str) -> Response {
    let mut headers = Headers::new();
    headers.insert("content-type", "text/html");
    headers.insert("content-length", html.len().to_string());
    Response {
        status: status_code,
        headers,
        body: Body::Bytes(html.as_bytes().to_vec()),
    }
}
