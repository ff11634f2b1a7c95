use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::{
    headers::{Headers, find_crlf},
    request_line::{RequestLine, parse_request_line},
};

/// Representation of a HTTP request with request line, headers and body
///
/// Includes a parse state to keep track of the progress of the parsing
#[derive(Debug)]
pub struct Request {
    /// The state of the parser.
    parse_state: ParseState,
    /// The parsed request line.
    pub request_line: RequestLine,
    /// The parsed headers, keyed by lowercase name.
    pub headers: Headers,
    /// The request body (can be empty).
    pub body: Vec<u8>,
}

/// Represents the different stages of the parser.
#[derive(Debug, PartialEq, Eq)]
enum ParseState {
    /// The parser was initialized.
    Initialized,
    /// The parser is parsing headers.
    ParsingHeaders,
    /// The parser is parsing the body.
    ParsingBody,
    /// The parser finished parsing.
    Done,
}

/// Represents the kind of error that can occur while reading a request or writing a response
#[derive(Error, Debug)]
pub enum HttpError {
    /// The request contains an unsupported / invalid HTTP version
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    /// The request contains an unsupported / invalid HTTP method.
    #[error("unsupported HTTP method: {0}")]
    InvalidMethod(String),

    /// The request line does not follow the RFC standard.
    #[error("request line is malformed")]
    MalformedRequestLine,

    /// The header does not follow the RFC standard.
    #[error("header is malformed")]
    MalformedHeader,

    /// A header carries a value that is not allowed.
    #[error("headers are invalid")]
    InvalidHeaders,

    /// A header that must be unique was sent more than once.
    #[error("duplicate header")]
    DuplicateHeader,

    /// The parser unexpectedly reached an end of file.
    #[error("unexpected end of file")]
    UnexpectedEOF,

    /// The passed body length does not match the header specification.
    #[error("body length does not match header")]
    InvalidBodyLength,

    /// There was a generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// There was an error parsing an integer from a header value.
    #[error("Parsing error: {0}")]
    ParseError(#[from] std::num::ParseIntError),
}

/// Reads a complete request from an asynchronous reader.
///
/// # Errors
///
/// Throws a `HttpError` if the request was not valid or the reader ended before the request
/// was complete.
pub async fn request_from_reader<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Request, HttpError> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut temp = [0u8; 256];
    let mut request = Request {
        parse_state: ParseState::Initialized,
        request_line: RequestLine {
            method: String::new(),
            request_target: String::new(),
            http_version: String::new(),
        },
        headers: Headers::new(),
        body: Vec::new(),
    };

    loop {
        if request.parse_state == ParseState::Done {
            return Ok(request);
        }

        let parsed = request.parse(&buffer)?;
        if parsed > 0 {
            buffer.drain(..parsed);
            continue;
        }

        if request.parse_state == ParseState::Done {
            return Ok(request);
        }

        let read = reader.read(&mut temp).await?;
        if read == 0 {
            return Err(HttpError::UnexpectedEOF);
        }
        buffer.extend_from_slice(&temp[..read]);
    }
}

impl Request {
    /// The request method, e.g. `GET`.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.request_line.method
    }

    /// The request path without its query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.request_line.path()
    }

    /// Whether the client asked for the connection to be kept open after this request.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        !self
            .headers
            .get("connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }

    /// Parses passed byte data and returns how many bytes were consumed.
    ///
    /// # Errors
    ///
    /// Throws an `HttpError` if the data contains RFC-incompatible formatting.
    fn parse(&mut self, data: &[u8]) -> Result<usize, HttpError> {
        match self.parse_state {
            ParseState::Initialized => {
                let Some(end) = find_crlf(data) else {
                    return Ok(0);
                };
                let line = std::str::from_utf8(&data[..end + 2])
                    .map_err(|_| HttpError::MalformedRequestLine)?;
                let (request_line, size) = parse_request_line(line)?;
                if let Some(request_line) = request_line {
                    if request_line.http_version != "1.1" {
                        return Err(HttpError::UnsupportedVersion(request_line.http_version));
                    }
                    self.request_line = request_line;
                    self.parse_state = ParseState::ParsingHeaders;
                }
                Ok(size)
            }
            ParseState::ParsingHeaders => {
                let (size, done) = self.headers.parse_header(data)?;
                if done {
                    if self.headers.duplicate_headers() {
                        return Err(HttpError::DuplicateHeader);
                    }
                    self.parse_state = ParseState::ParsingBody;
                }
                Ok(size)
            }
            ParseState::ParsingBody => {
                let Some(content) = self.headers.get("content-length") else {
                    self.parse_state = ParseState::Done;
                    return Ok(0);
                };
                let content_length: usize = content.trim().parse()?;

                let remaining = content_length.saturating_sub(self.body.len());
                if data.len() > remaining {
                    return Err(HttpError::InvalidBodyLength);
                }

                self.body.extend_from_slice(data);
                if self.body.len() == content_length {
                    self.parse_state = ParseState::Done;
                }
                Ok(data.len())
            }
            ParseState::Done => {
                if !data.is_empty() {
                    return Err(HttpError::InvalidBodyLength);
                }
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::io::{self, AsyncRead, BufReader, ReadBuf};

    use crate::http::request::{HttpError, request_from_reader};

    pub struct ChunkReader<'a> {
        data: &'a [u8],
        num_bytes_per_read: usize,
        pos: usize,
    }

    impl<'a> ChunkReader<'a> {
        pub fn new(data: &'a str, num_bytes_per_read: usize) -> Self {
            Self {
                data: data.as_bytes(),
                num_bytes_per_read: num_bytes_per_read.max(1),
                pos: 0,
            }
        }
    }

    impl AsyncRead for ChunkReader<'_> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.data.len() - self.pos;
            let take = self.num_bytes_per_read.min(remaining).min(buf.remaining());
            if take > 0 {
                let chunk = &self.data[self.pos..self.pos + take];
                buf.put_slice(chunk);
                self.pos += take;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn download_request_valid() {
        let input = "GET /download HTTP/1.1\r\n\
             Host: localhost:8080\r\n\
             User-Agent: curl/7.81.0\r\n\
             Accept: */*\r\n\
             \r\n";
        let mut chunk_reader = ChunkReader::new(input, 7);
        let mut buffered = BufReader::new(&mut chunk_reader);
        let r = request_from_reader(&mut buffered).await.unwrap();

        assert_eq!(r.method(), "GET");
        assert_eq!(r.path(), "/download");
        assert_eq!(r.request_line.http_version, "1.1");
        assert_eq!(r.headers.get("host").unwrap(), "localhost:8080");
        assert_eq!(r.headers.get("user-agent").unwrap(), "curl/7.81.0");
        assert!(r.keep_alive());
    }

    #[tokio::test]
    async fn request_split_into_single_bytes_valid() {
        let input = "GET /download?token=abc HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let mut chunk_reader = ChunkReader::new(input, 1);
        let r = request_from_reader(&mut chunk_reader).await.unwrap();

        assert_eq!(r.path(), "/download");
        assert_eq!(r.request_line.query(), Some("token=abc"));
        assert!(!r.keep_alive());
    }

    #[tokio::test]
    async fn invalid_number_of_requestline_parts_should_throw_malformedrequestline() {
        let input = "/download HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
        let mut chunk_reader = ChunkReader::new(input, 3);
        let result = request_from_reader(&mut chunk_reader).await;

        assert!(
            matches!(result, Err(HttpError::MalformedRequestLine)),
            "Expected Err(HttpError::MalformedRequestLine), got {result:?}"
        );
    }

    #[tokio::test]
    async fn invalid_http_version_should_throw_unsupportedversion() {
        let input = "GET / HTTP/1.0\r\nHost: localhost:8080\r\n\r\n";
        let mut chunk_reader = ChunkReader::new(input, 8);
        let result = request_from_reader(&mut chunk_reader).await;

        assert!(
            matches!(result, Err(HttpError::UnsupportedVersion(_))),
            "Expected Err(HttpError::UnsupportedVersion), got {result:?}"
        );
    }

    #[tokio::test]
    async fn invalid_http_method_should_throw_invalidmethod() {
        let input = "FETCH /download HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
        let mut chunk_reader = ChunkReader::new(input, 15);
        let result = request_from_reader(&mut chunk_reader).await;

        assert!(
            matches!(result, Err(HttpError::InvalidMethod(_))),
            "Expected Err(HttpError::InvalidMethod), got {result:?}"
        );
    }

    #[tokio::test]
    async fn incomplete_request_should_throw_unexpectedeof() {
        let mut reader = "GET / HTTP/1.1".as_bytes();
        let result = request_from_reader(&mut reader).await;

        assert!(matches!(result, Err(HttpError::UnexpectedEOF)));
    }

    #[tokio::test]
    async fn duplicate_host_should_throw_duplicateheader() {
        let input = "GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n";
        let mut reader = input.as_bytes();
        let result = request_from_reader(&mut reader).await;

        assert!(matches!(result, Err(HttpError::DuplicateHeader)));
    }

    #[tokio::test]
    async fn request_with_malformed_headers_throws_malformedheader() {
        let input = "GET / HTTP/1.1\r\nHost localhost:8080\r\n\r\n";
        let mut chunk_reader = ChunkReader::new(input, 7);
        let result = request_from_reader(&mut chunk_reader).await;

        assert!(matches!(result, Err(HttpError::MalformedHeader)));
    }

    #[tokio::test]
    async fn body_valid() {
        let input = "POST /download HTTP/1.1\r\n\
                     Host: localhost:8080\r\n\
                     Content-Length: 12\r\n\
                     \r\n\
                     hello world!";
        let mut chunk_reader = ChunkReader::new(input, 5);
        let r = request_from_reader(&mut chunk_reader).await.unwrap();

        assert_eq!(String::from_utf8(r.body).unwrap(), "hello world!");
    }

    #[tokio::test]
    async fn body_shorter_than_content_length_should_throw_unexpectedeof() {
        let input = "POST /download HTTP/1.1\r\n\
                     Host: localhost:8080\r\n\
                     Content-Length: 20\r\n\
                     \r\n\
                     hello world!";
        let mut chunk_reader = ChunkReader::new(input, 32);
        let result = request_from_reader(&mut chunk_reader).await;

        assert!(matches!(result, Err(HttpError::UnexpectedEOF)));
    }

    #[tokio::test]
    async fn body_longer_than_content_length_should_throw_invalidbodylength() {
        let input = "POST /download HTTP/1.1\r\n\
                     Host: localhost:8080\r\n\
                     Content-Length: 5\r\n\
                     \r\n\
                     hello world!";
        let mut reader = input.as_bytes();
        let result = request_from_reader(&mut reader).await;

        assert!(matches!(result, Err(HttpError::InvalidBodyLength)));
    }

    #[tokio::test]
    async fn empty_body_without_content_length_valid() {
        let input = "GET /download HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
        let mut reader = input.as_bytes();
        let request = request_from_reader(&mut reader).await.unwrap();

        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn non_utf8_header_should_throw_malformedheader() {
        let input: &[u8] = b"GET /download HTTP/1.1\r\nHost: a\r\nX: \xff\xff\xff\xff\r\n\r\n";
        let mut reader = input;
        let result = request_from_reader(&mut reader).await;

        assert!(matches!(result, Err(HttpError::MalformedHeader)));
    }

    #[tokio::test]
    async fn non_utf8_request_target_should_throw_malformedrequestline() {
        let input: &[u8] = b"GET /download\xff\xfe HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut reader = input;
        let result = request_from_reader(&mut reader).await;

        assert!(matches!(result, Err(HttpError::MalformedRequestLine)));
    }
}
