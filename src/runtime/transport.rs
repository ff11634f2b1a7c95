use std::io::{self, SeekFrom};

use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWrite},
    net::TcpStream,
};
use tracing::trace;

use crate::http::response::FileRegion;

/// A connection a response can be written to.
///
/// Besides plain writes, a transport knows how to move a [`FileRegion`] onto the wire. The
/// default implementation streams the region through a buffered copy; transports backed by a
/// socket override it with a kernel-side zero-copy send.
pub trait Transport: AsyncWrite + Unpin + Send {
    /// Sends every byte of `region` and returns how many were sent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading the file or writing the transport fails, or if the file
    /// ends before `region.len` bytes were sent.
    fn send_file(&mut self, region: FileRegion) -> impl Future<Output = io::Result<u64>> + Send {
        async move { copy_region(self, region).await }
    }
}

/// Copies `region` into `writer` through tokio's blocking file pool.
///
/// # Errors
///
/// Returns an I/O error if the copy fails or the file is shorter than the region.
pub async fn copy_region<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    region: FileRegion,
) -> io::Result<u64> {
    let FileRegion { file, offset, len } = region;
    let mut file = tokio::fs::File::from_std(file);
    file.seek(SeekFrom::Start(offset)).await?;

    let copied = tokio::io::copy(&mut file.take(len), writer).await?;
    if copied < len {
        return Err(short_file(copied, len));
    }
    trace!(bytes = copied, "copied file region");
    Ok(copied)
}

fn short_file(sent: u64, expected: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("file ended after {sent} of {expected} bytes"),
    )
}

impl Transport for Vec<u8> {}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Transport for TcpStream {
    /// Sends the region with `sendfile(2)`, so the bytes travel from the page cache to the
    /// socket without passing through this process.
    async fn send_file(&mut self, region: FileRegion) -> io::Result<u64> {
        use nix::{libc::off_t, sys::sendfile::sendfile};
        use tokio::io::Interest;

        // Upper bound on a single sendfile(2) call on Linux.
        const MAX_CHUNK: usize = 0x7fff_f000;

        let FileRegion { file, offset, len } = region;
        let mut position = off_t::try_from(offset).map_err(io::Error::other)?;
        let mut sent: u64 = 0;

        while sent < len {
            let count = usize::try_from(len - sent).map_or(MAX_CHUNK, |left| left.min(MAX_CHUNK));
            self.writable().await?;

            let socket: &Self = self;
            match socket.try_io(Interest::WRITABLE, || {
                sendfile(socket, &file, Some(&mut position), count).map_err(io::Error::from)
            }) {
                Ok(0) => return Err(short_file(sent, len)),
                Ok(written) => sent += written as u64,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => return Err(error),
            }
        }

        trace!(bytes = sent, "sent file region with sendfile");
        Ok(sent)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Transport for TcpStream {}
