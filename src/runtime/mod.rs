/// Module containing the handler
pub mod handler;
/// Module containing the logic for the server
pub mod server;
/// Module containing the transports responses are written to
pub mod transport;
