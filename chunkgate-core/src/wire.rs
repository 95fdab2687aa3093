//! Framed binary protocol spoken between the router and chunkservers.
//!
//! Requests carry a fixed header (`op`, `file_id`, `start`, `end`, payload
//! length) followed by the payload; replies carry a status byte and a
//! payload that holds fragment data on success or UTF-8 error text on
//! failure. Both directions live here so servers (and test fixtures) can
//! reuse the same codec.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Store the payload under `file_id`.
pub const OP_PUT: u8 = 1;
/// Fetch the payload stored under `file_id` for the given byte range.
pub const OP_GET: u8 = 2;

/// Reply status for a completed operation.
pub const STATUS_OK: u8 = 0;
/// Reply status for a failed operation; the payload carries the error text.
pub const STATUS_ERR: u8 = 1;

/// Upper bound on any frame payload. Guards both sides against a corrupt
/// length prefix committing them to an absurd allocation.
pub const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// One decoded request frame, as seen by a chunkserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation code (`OP_PUT` or `OP_GET`).
    pub op: u8,
    /// File id the operation addresses.
    pub file_id: u64,
    /// Byte range start (zero for PUT).
    pub start: u64,
    /// Byte range end (payload length for PUT).
    pub end: u64,
    /// Request payload; the fragment body for PUT, empty for GET.
    pub body: Vec<u8>,
}

/// A pooled TCP connection to one replica.
///
/// Borrowers own the connection exclusively until they release it back to
/// its pool; a connection marked closed is dropped on release instead of
/// being reused.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
    peer: String,
    closed: bool,
}

impl FramedConn {
    /// Dials the replica with a bounded connect timeout.
    pub async fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr}")))??;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer: addr.to_string(),
            closed: false,
        })
    }

    /// `host:port` of the replica this connection is bound to.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Flags the connection as unusable; the pool drops it on release.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Whether the connection has been flagged for disposal.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends a framed PUT and waits for the replica's acknowledgement.
    pub async fn put(&mut self, file_id: u64, body: &[u8]) -> io::Result<()> {
        self.send_request(OP_PUT, file_id, 0, body.len() as u64, body)
            .await?;
        self.read_reply().await.map(|_| ())
    }

    /// Sends a framed GET for the byte range and returns the fragment data.
    pub async fn get(&mut self, file_id: u64, start: u64, end: u64) -> io::Result<Vec<u8>> {
        self.send_request(OP_GET, file_id, start, end, &[]).await?;
        self.read_reply().await
    }

    async fn send_request(
        &mut self,
        op: u8,
        file_id: u64,
        start: u64,
        end: u64,
        body: &[u8],
    ) -> io::Result<()> {
        if body.len() as u64 > u64::from(MAX_FRAME) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame payload of {} bytes exceeds limit", body.len()),
            ));
        }
        self.stream.write_u8(op).await?;
        self.stream.write_u64(file_id).await?;
        self.stream.write_u64(start).await?;
        self.stream.write_u64(end).await?;
        self.stream.write_u32(body.len() as u32).await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await
    }

    async fn read_reply(&mut self) -> io::Result<Vec<u8>> {
        let status = self.stream.read_u8().await?;
        let payload = read_payload(&mut self.stream).await?;
        if status == STATUS_OK {
            Ok(payload)
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&payload).into_owned(),
            ))
        }
    }
}

/// Reads one request frame from a chunkserver-side stream.
pub async fn read_request(stream: &mut TcpStream) -> io::Result<Request> {
    let op = stream.read_u8().await?;
    let file_id = stream.read_u64().await?;
    let start = stream.read_u64().await?;
    let end = stream.read_u64().await?;
    let body = read_payload(stream).await?;
    Ok(Request {
        op,
        file_id,
        start,
        end,
        body,
    })
}

/// Writes one reply frame on a chunkserver-side stream.
pub async fn write_reply(stream: &mut TcpStream, status: u8, payload: &[u8]) -> io::Result<()> {
    stream.write_u8(status).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

async fn read_payload(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {len} bytes exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Whether an I/O failure suggests the peer tore the connection down, in
/// which case the rest of the pool's idle connections are suspect too.
#[must_use]
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn put_then_get_round_trips_through_a_replica() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let put = read_request(&mut stream).await.unwrap();
            assert_eq!(put.op, OP_PUT);
            assert_eq!(put.file_id, 42);
            write_reply(&mut stream, STATUS_OK, &[]).await.unwrap();

            let get = read_request(&mut stream).await.unwrap();
            assert_eq!(get.op, OP_GET);
            assert_eq!((get.start, get.end), (0, put.body.len() as u64));
            write_reply(&mut stream, STATUS_OK, &put.body).await.unwrap();
        });

        let mut conn = FramedConn::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        conn.put(42, b"hello").await.unwrap();
        let data = conn.get(42, 0, 5).await.unwrap();
        assert_eq!(data, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_carries_the_server_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut stream).await.unwrap();
            write_reply(&mut stream, STATUS_ERR, b"disk full")
                .await
                .unwrap();
        });

        let mut conn = FramedConn::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = conn.put(7, b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn disconnects_are_classified() {
        assert!(is_disconnect(&io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "eof"
        )));
        assert!(!is_disconnect(&io::Error::other("disk full")));
    }
}
