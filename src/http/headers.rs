use std::collections::BTreeMap;

use crate::http::request::HttpError;

/// Header names that must never carry more than one value in a request.
const SINGLETON_HEADERS: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

const CRLF: &[u8] = b"\r\n";

/// Position of the first CRLF in `data`, counted in bytes.
pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|window| window == CRLF)
}

/// A map of lowercase header names to their (comma-joined) values.
///
/// Backed by a `BTreeMap` so headers are written to the wire in a stable order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Returns an empty set of headers.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a header, replacing any previous value. The name is stored lowercase.
    ///
    /// # Examples
    /// ```
    /// let mut headers = fileserve::http::headers::Headers::new();
    /// headers.insert("Content-Type", "image/png");
    /// assert_eq!(headers.get("content-type"), Some("image/png"));
    /// ```
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into().to_ascii_lowercase(), value.into());
    }

    /// Retrieves the value of a header, ignoring the case of `key`.
    ///
    /// # Examples
    /// ```
    /// let mut headers = fileserve::http::headers::Headers::new();
    /// headers.insert("connection", "close");
    /// assert_eq!(headers.get("Connection"), Some("close"));
    /// assert_eq!(headers.get("host"), None);
    /// ```
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Appends a value to a header, joining repeated values with `", "`.
    ///
    /// # Examples
    /// ```
    /// let mut headers = fileserve::http::headers::Headers::new();
    /// headers.append("accept", "image/png");
    /// headers.append("accept", "image/*");
    /// assert_eq!(headers.get("accept"), Some("image/png, image/*"));
    /// ```
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        let value = value.into();

        if let Some(existing) = self.0.get_mut(&key) {
            if !existing.is_empty() {
                existing.push_str(", ");
            }
            existing.push_str(&value);
        } else {
            self.0.insert(key, value);
        }
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any header that must be unique was received more than once.
    #[must_use]
    pub fn duplicate_headers(&self) -> bool {
        SINGLETON_HEADERS
            .iter()
            .filter_map(|header| self.get(header))
            .any(|value| value.contains(", "))
    }

    /// Parses as many complete header lines as `data` holds.
    ///
    /// Returns the number of bytes consumed and whether the blank line closing the header
    /// section was reached. Incomplete trailing lines are left unconsumed.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::MalformedHeader` if a complete line is not valid UTF-8 or not a valid
    /// `name: value` pair.
    pub fn parse_header<B>(&mut self, data: B) -> Result<(usize, bool), HttpError>
    where
        B: AsRef<[u8]>,
    {
        let mut rest = data.as_ref();
        let mut consumed = 0;

        while let Some(end) = find_crlf(rest) {
            consumed += end + CRLF.len();
            if end == 0 {
                return Ok((consumed, true));
            }
            let line = std::str::from_utf8(&rest[..end]).map_err(|_| HttpError::MalformedHeader)?;
            self.create_header_from_line(line)?;
            rest = &rest[end + CRLF.len()..];
        }

        Ok((consumed, false))
    }

    fn create_header_from_line(&mut self, line: &str) -> Result<(), HttpError> {
        let (key, value) = line.trim().split_once(':').ok_or(HttpError::MalformedHeader)?;
        let value = value.trim();

        if key.is_empty() || !key.chars().all(is_token_char) {
            return Err(HttpError::MalformedHeader);
        }

        if key.eq_ignore_ascii_case("host") && value.is_empty() {
            return Err(HttpError::InvalidHeaders);
        }

        self.append(key, value);
        Ok(())
    }
}

/// Converts a lowercase header name to its conventional wire casing, e.g. `content-type` to
/// `Content-Type`.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Token characters as defined in <https://www.rfc-editor.org/rfc/rfc9110#section-5.6.2>
const fn is_token_char(c: char) -> bool {
    if c.is_ascii_alphanumeric() {
        return true;
    }

    matches!(
        c,
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
    )
}
