//! Duplex channels to tool provider endpoints.
//!
//! Every transport carries one logical message per line (newline-delimited
//! JSON). `receive` returning `Ok(None)` means the peer closed the channel;
//! the session layer converts that into its own closed-channel error so
//! callers are never left hanging on a dropped connection.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

/// One logical frame each way. Implementations own the framing; callers own
/// the request/response discipline.
#[async_trait]
pub trait Transport: Send {
    /// Write one frame to the peer.
    async fn send(&mut self, frame: &str) -> io::Result<()>;

    /// Read the next frame. Returns `None` once the peer has closed.
    async fn receive(&mut self) -> io::Result<Option<String>>;
}

/// Local-process-pipe transport: spawns a provider process and frames
/// messages over its stdin/stdout. The child is killed when the transport
/// is dropped, so release is scoped to the owning session.
pub struct ChildProcessTransport {
    // Held so kill_on_drop fires when the transport goes away.
    _child: Child,
    reader: BufReader<ChildStdout>,
    writer: ChildStdin,
}

impl ChildProcessTransport {
    /// Spawn `program` with `args`, piping stdin/stdout for framing.
    /// The child's stderr is inherited so provider diagnostics stay visible.
    pub fn spawn<S: AsRef<str>>(program: &str, args: &[S]) -> io::Result<Self> {
        tracing::info!(program = %program, "spawning tool provider process");

        let mut child = Command::new(program)
            .args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "provider stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "provider stdout not captured")
        })?;

        Ok(Self {
            _child: child,
            reader: BufReader::new(stdout),
            writer: stdin,
        })
    }

    /// Spawn from a whitespace-separated command line, e.g. `"tether serve"`.
    pub fn spawn_command_line(command: &str) -> io::Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty provider command")
        })?;
        let args: Vec<&str> = parts.collect();
        Self::spawn(program, &args)
    }
}

#[async_trait]
impl Transport for ChildProcessTransport {
    async fn send(&mut self, frame: &str) -> io::Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<String>> {
        read_frame(&mut self.reader).await
    }
}

/// Network-stream transport over TCP.
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpTransport {
    /// Connect to a provider listening at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted connection. Lets a provider serve the same framing
    /// it would over stdio.
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: &str) -> io::Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<String>> {
        read_frame(&mut self.reader).await
    }
}

/// Serves a provider over the current process's own stdin/stdout. This is
/// the other end of [`ChildProcessTransport`].
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, frame: &str) -> io::Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<String>> {
        read_frame(&mut self.reader).await
    }
}

/// In-memory transport pair, used to wire a session to an in-process
/// provider and throughout the test suite.
pub struct DuplexTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
}

impl DuplexTransport {
    /// Create two connected ends; frames sent on one are received on the
    /// other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(32);
        let (tx_b, rx_a) = mpsc::channel(32);
        (Self { rx: rx_a, tx: tx_a }, Self { rx: rx_b, tx: tx_b })
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&mut self, frame: &str) -> io::Result<()> {
        self.tx
            .send(frame.to_string())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    async fn receive(&mut self) -> io::Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// Read one non-empty line, trimmed of its terminator. `None` at EOF.
async fn read_frame<R>(reader: &mut BufReader<R>) -> io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}
