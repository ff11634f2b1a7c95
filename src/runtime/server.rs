use std::{
    io::Error,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::Notify,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::http::{
    request::{HttpError, request_from_reader},
    response::{StatusCode, html_response, write_response},
};
use crate::runtime::handler::Handler;

/// How long an idle keep-alive connection may wait for its next request.
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(15);
/// How long a single request, including writing its response, may take.
const SERVER_TIMEOUT: Duration = Duration::from_secs(120);

/// A handle to a running server.
#[derive(Debug)]
pub struct Server<H: Handler> {
    server_state: Arc<ServerState<H>>,
    local_addr: SocketAddr,
}

/// The state shared between the handle and the accept loop.
#[derive(Debug)]
struct ServerState<H: Handler> {
    listener: TcpListener,
    closed: AtomicBool,
    shutdown: Notify,
    handler: Arc<H>,
}

impl<H: Handler> Server<H> {
    /// Stops accepting new connections. Connections already accepted run to completion.
    pub fn close(&self) {
        self.server_state.closed.store(true, Ordering::SeqCst);
        self.server_state.shutdown.notify_one();
    }

    /// The address the server is bound to. Useful when binding to port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl<H: Handler + 'static> ServerState<H> {
    /// Accepts connections until the server is closed, spawning a task per connection.
    async fn listen(self: Arc<Self>) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                info!("server closed, no longer accepting connections");
                return;
            }
            tokio::select! {
                () = self.shutdown.notified() => continue,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle(stream, &*handler).await {
                                warn!(%peer, error = %e, "error handling connection");
                            }
                        });
                    }
                    Err(e) => {
                        if self.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        error!(error = %e, "error accepting connection");
                        sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
    }
}

/// Binds `addr` and serves requests with `handler` on a background task.
///
/// # Errors
///
/// Throws an Error if binding the tcp listener fails.
pub async fn serve<A: ToSocketAddrs, H: Handler + 'static>(
    addr: A,
    handler: Arc<H>,
) -> Result<Server<H>, Error> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "listening");

    let state = Arc::new(ServerState {
        listener,
        closed: AtomicBool::new(false),
        shutdown: Notify::new(),
        handler,
    });
    tokio::spawn(Arc::clone(&state).listen());

    Ok(Server {
        server_state: state,
        local_addr,
    })
}

/// Serves requests on one connection until either side closes it.
///
/// # Errors
///
/// Throws an `HttpError` if writing a timeout response fails.
async fn handle<H: Handler>(mut stream: TcpStream, handler: &H) -> Result<(), HttpError> {
    loop {
        match timeout(SERVER_TIMEOUT, process_request(&mut stream, handler)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Ok(()),
            Ok(Err(e)) => {
                debug!(error = %e, "closing connection after error");
                return Ok(());
            }
            Err(_elapsed) => {
                let html = "<html><body><h1>Gateway Timed out</h1></body></html>";
                write_response(&mut stream, html_response(StatusCode::GatewayTimeout, html))
                    .await?;
                return Ok(());
            }
        }
    }
}

/// Handles a single request and reports whether the connection should stay open.
///
/// # Errors
///
/// Throws an `HttpError` if writing the response fails.
async fn process_request<H: Handler>(
    stream: &mut TcpStream,
    handler: &H,
) -> Result<bool, HttpError> {
    let request = match timeout(KEEP_ALIVE_TIMEOUT, request_from_reader(stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(HttpError::UnexpectedEOF)) => return Ok(false),
        Ok(Err(HttpError::Io(e))) => return Err(HttpError::Io(e)),
        Ok(Err(e)) => {
            debug!(error = %e, "rejecting malformed request");
            let html = "<html><body><h1>Bad Request</h1></body></html>";
            write_response(stream, html_response(StatusCode::BadRequest, html)).await?;
            return Ok(false);
        }
        Err(_elapsed) => {
            let html = "<html><body><h1>Request timed out</h1></body></html>";
            write_response(stream, html_response(StatusCode::RequestTimeout, html)).await?;
            return Ok(false);
        }
    };

    debug!(method = request.method(), target = %request.request_line.request_target, "request");

    let response = match handler.call(&request, &mut *stream).await {
        Ok(Some(response)) => response,
        Ok(None) => return Ok(false),
        Err(e) => {
            error!(path = request.path(), error = %e, "handler failed");
            let html = "<html><body><h1>Internal Server Error</h1></body></html>";
            write_response(stream, html_response(StatusCode::InternalServerError, html)).await?;
            return Ok(false);
        }
    };

    let close_requested = response
        .headers
        .get("connection")
        .is_some_and(|value| value.eq_ignore_ascii_case("close"));
    write_response(stream, response).await?;

    Ok(request.keep_alive() && !close_requested)
}
