/// Module containing logic to parse HTTP headers
pub mod headers;
/// Module containing logic to parse requests
pub mod request;
/// Module containing logic to parse HTTP request lines
pub mod request_line;
/// Module formatting and writing responses.
pub mod response;
