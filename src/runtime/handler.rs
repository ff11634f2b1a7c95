use tokio::io::AsyncWrite;

use crate::http::{
    request::{HttpError, Request},
    response::Response,
};

/// A trait that determines the handling for each server.
pub trait Handler: Send + Sync {
    /// Determines what happens to a given request.
    ///
    /// Returning `Ok(Some(response))` lets the server write the response, including any file
    /// body, through its transport. Returning `Ok(None)` means the handler already wrote to
    /// `stream` itself and the connection is closed afterwards.
    ///
    /// # Errors
    /// Throws an `HttpError` if processing the request fails. The server answers with
    /// `500 Internal Server Error` and closes the connection.
    fn call<W: AsyncWrite + Unpin + Send>(
        &self,
        req: &Request,
        stream: W,
    ) -> impl Future<Output = Result<Option<Response>, HttpError>> + Send;
}
