//! # fileserve
//!
//! Serves the bundled image on `GET /download` until interrupted with ctrl-c.
//!
//! On startup the resource is also read once in the background with the chunked reader, so a
//! missing or unreadable file shows up in the log before the first request does.
//!
//! Settings are read from `fileserve.toml` in the working directory when present, and from
//! `FILESERVE__*` environment variables.
use std::sync::Arc;

use fileserve::{
    download::DownloadHandler, logging::init_logging, reader::ChunkedReader,
    runtime::server::serve, settings::Settings,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_logging(&settings.log.level, settings.log.format)?;

    let handler = DownloadHandler::new(&settings.download);
    info!(resource = %handler.resource().display(), "serving download");

    match ChunkedReader::open_with_capacity(handler.resource(), settings.reader.buffer_capacity)
        .await
    {
        Ok(reader) => {
            let check = reader.spawn(tokio::io::sink());
            tokio::spawn(async move {
                match check.join().await {
                    Ok(report) => {
                        info!(termination = ?report.termination, bytes = report.bytes_read, reads = report.reads, "resource check finished");
                    }
                    Err(e) => warn!(error = %e, "resource check did not finish"),
                }
            });
        }
        Err(e) => warn!(error = %e, "resource check could not open the download resource"),
    }

    let server = serve(
        (settings.server.host.as_str(), settings.server.port),
        Arc::new(handler),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.close();
    Ok(())
}
