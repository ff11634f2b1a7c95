use crate::http::request::HttpError;

/// A Http Request Line representation with method, target and http version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// The method of the parsed request
    pub method: String,
    /// The raw request target, including any query string
    pub request_target: String,
    /// The HTTP version used in the request, without the `HTTP/` prefix
    pub http_version: String,
}

impl RequestLine {
    /// The request target without its query string.
    ///
    /// # Examples
    /// ```
    /// use fileserve::http::request_line::parse_request_line;
    ///
    /// let (line, _) = parse_request_line("GET /download?size=full HTTP/1.1\r\n").unwrap();
    /// assert_eq!(line.unwrap().path(), "/download");
    /// ```
    #[must_use]
    pub fn path(&self) -> &str {
        self.request_target
            .split_once('?')
            .map_or(self.request_target.as_str(), |(path, _)| path)
    }

    /// The query string of the request target, if one was sent.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.request_target.split_once('?').map(|(_, query)| query)
    }
}

/// Parses a passed string into a Request Line Struct
///
/// Returns `None` and a size of zero while the passed string does not yet hold a full line,
/// otherwise the parsed line and the number of bytes it occupied including the CRLF.
///
/// # Errors
///
/// Throws an `HttpError` if the parsed request line is invalid.
pub fn parse_request_line(request: &str) -> Result<(Option<RequestLine>, usize), HttpError> {
    const VALID_METHODS: &[&str] = &[
        "GET", "POST", "PATCH", "PUT", "DELETE", "HEAD", "OPTIONS", "CONNECT", "TRACE",
    ];
    const CRLF_LEN: usize = 2;

    let Some((first, _)) = request.split_once("\r\n") else {
        return Ok((None, 0));
    };

    let mut parts = first.split(' ');
    let (Some(method), Some(request_target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::MalformedRequestLine);
    };

    if request_target.is_empty() {
        return Err(HttpError::MalformedRequestLine);
    }

    let http_version = version
        .strip_prefix("HTTP/")
        .ok_or(HttpError::MalformedRequestLine)?;

    if !VALID_METHODS.contains(&method) {
        return Err(HttpError::InvalidMethod(method.to_string()));
    }

    let request_line = RequestLine {
        method: method.to_string(),
        request_target: request_target.to_string(),
        http_version: http_version.to_string(),
    };
    Ok((Some(request_line), first.len() + CRLF_LEN))
}
