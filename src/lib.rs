//! # fileserve
//!
//! A small HTTP/1.1 file server showing two ways of moving file bytes.
//!
//! The [`download`] route hands a file region to the transport, which pushes it to the socket
//! with `sendfile(2)` instead of staging it in application memory. The [`reader`] module reads a
//! file sequentially in fixed-size chunks, one asynchronous read in flight at a time.
//!
//! Refer to the included binary for a complete server setup.

/// Module containing the `/download` route handler
pub mod download;
/// Module containing HTTP parsing and response writing
pub mod http;
/// Module containing the logging setup
pub mod logging;
/// Module containing the chunked asynchronous file reader
pub mod reader;
/// Module containing the server runtime
pub mod runtime;
/// Module containing the layered configuration
pub mod settings;
