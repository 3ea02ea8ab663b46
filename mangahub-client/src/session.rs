//! Duplex session client.

use crate::error::ClientError;
use mangahub_types::messages::{
    AddToLibraryPayload, AuthPayload, ConnectPayload, ConnectResponsePayload, DisconnectPayload,
    GetProgressPayload, HeartbeatPayload, LibraryItem, ProgressInfo, RemoveFromLibraryPayload,
    StatusResponsePayload, SubscribeUpdatesPayload, SyncProgressPayload, UpdateEventPayload,
};
use mangahub_types::Envelope;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{timeout, Instant};

/// Connect deadline for new sessions.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read deadline for the status query path.
pub const STATUS_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Default read deadline for request/reply exchanges.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A client connection to the session server.
///
/// Fan-out frames (`update_event` and the raw mutation events) can arrive
/// interleaved with replies; the client parks them in a pending queue so a
/// request always sees its own reply. Drain them with
/// [`next_update_event`](Self::next_update_event) or
/// [`next_frame`](Self::next_frame).
pub struct SessionClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending: VecDeque<Envelope>,
}

fn is_fanout(kind: &str) -> bool {
    matches!(kind, "update_event" | "progress_update" | "library_update")
}

impl SessionClient {
    /// Connect with the standard 5 s deadline.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)??;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            pending: VecDeque::new(),
        })
    }

    /// Write a raw line (newline appended if missing). Test hook for
    /// malformed frames.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        let line = envelope.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Envelope, ClientError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            return Ok(Envelope::parse(raw)?);
        }
    }

    /// Next frame of any kind, pending queue first.
    pub async fn next_frame(&mut self, deadline: Duration) -> Result<Envelope, ClientError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        timeout(deadline, self.read_frame())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Wait for the next `update_event`, parking other fan-out frames.
    pub async fn next_update_event(
        &mut self,
        deadline: Duration,
    ) -> Result<UpdateEventPayload, ClientError> {
        if let Some(pos) = self.pending.iter().position(|f| f.kind == "update_event") {
            if let Some(frame) = self.pending.remove(pos) {
                return Ok(frame.payload_as()?);
            }
        }

        let until = Instant::now() + deadline;
        loop {
            let remaining = until
                .checked_duration_since(Instant::now())
                .ok_or(ClientError::Timeout)?;
            let frame = timeout(remaining, self.read_frame())
                .await
                .map_err(|_| ClientError::Timeout)??;
            if frame.kind == "update_event" {
                return Ok(frame.payload_as()?);
            }
            self.pending.push_back(frame);
        }
    }

    async fn request(&mut self, envelope: Envelope) -> Result<Envelope, ClientError> {
        self.request_with_deadline(envelope, REQUEST_TIMEOUT).await
    }

    async fn request_with_deadline(
        &mut self,
        envelope: Envelope,
        deadline: Duration,
    ) -> Result<Envelope, ClientError> {
        self.send(&envelope).await?;
        let until = Instant::now() + deadline;
        loop {
            let remaining = until
                .checked_duration_since(Instant::now())
                .ok_or(ClientError::Timeout)?;
            let frame = timeout(remaining, self.read_frame())
                .await
                .map_err(|_| ClientError::Timeout)??;
            if is_fanout(&frame.kind) {
                self.pending.push_back(frame);
                continue;
            }
            return Ok(frame);
        }
    }

    fn server_fault(frame: Envelope) -> ClientError {
        match frame.payload_as() {
            Ok(payload) => ClientError::Server(payload),
            Err(err) => ClientError::Frame(err),
        }
    }

    fn expect_success(frame: Envelope) -> Result<(), ClientError> {
        match frame.kind.as_str() {
            "success" => Ok(()),
            "error" => Err(Self::server_fault(frame)),
            other => Err(ClientError::UnexpectedReply {
                expected: "success",
                actual: other.to_string(),
            }),
        }
    }

    fn expect_data<T: serde::de::DeserializeOwned>(
        frame: Envelope,
        expected: &'static str,
    ) -> Result<T, ClientError> {
        if frame.kind == expected {
            return Ok(frame.payload_as()?);
        }
        if frame.kind == "error" {
            return Err(Self::server_fault(frame));
        }
        Err(ClientError::UnexpectedReply {
            expected,
            actual: frame.kind,
        })
    }

    /// `ping` -> `pong`.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let reply = self.request(Envelope::bare("ping")).await?;
        match reply.kind.as_str() {
            "pong" => Ok(()),
            "error" => Err(Self::server_fault(reply)),
            other => Err(ClientError::UnexpectedReply {
                expected: "pong",
                actual: other.to_string(),
            }),
        }
    }

    /// Authenticate the connection.
    pub async fn auth(&mut self, token: &str) -> Result<(), ClientError> {
        let env = Envelope::data(
            "auth",
            &AuthPayload {
                token: token.to_string(),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }

    /// Create a session for this device.
    pub async fn connect_device(
        &mut self,
        device_type: &str,
        device_name: &str,
    ) -> Result<ConnectResponsePayload, ClientError> {
        let env = Envelope::data(
            "connect",
            &ConnectPayload {
                device_type: device_type.to_string(),
                device_name: device_name.to_string(),
            },
        )?;
        let reply = self.request(env).await?;
        Self::expect_data(reply, "connect_response")
    }

    /// Refresh liveness; the server echoes a `heartbeat` frame.
    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        let env = Envelope::data("heartbeat", &HeartbeatPayload::default())?;
        let reply = self.request(env).await?;
        match reply.kind.as_str() {
            "heartbeat" => Ok(()),
            "error" => Err(Self::server_fault(reply)),
            other => Err(ClientError::UnexpectedReply {
                expected: "heartbeat",
                actual: other.to_string(),
            }),
        }
    }

    /// Opt into `update_event` fan-out.
    pub async fn subscribe_updates(&mut self, event_types: &[&str]) -> Result<(), ClientError> {
        let env = Envelope::data(
            "subscribe_updates",
            &SubscribeUpdatesPayload {
                event_types: event_types.iter().map(|s| s.to_string()).collect(),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }

    /// Opt out of `update_event` fan-out.
    pub async fn unsubscribe_updates(&mut self) -> Result<(), ClientError> {
        Self::expect_success(self.request(Envelope::bare("unsubscribe_updates")).await?)
    }

    /// Upsert reading progress.
    pub async fn sync_progress(
        &mut self,
        manga_id: &str,
        current_chapter: i64,
        status: Option<&str>,
    ) -> Result<(), ClientError> {
        let env = Envelope::data(
            "sync_progress",
            &SyncProgressPayload {
                manga_id: manga_id.to_string(),
                current_chapter,
                status: status.map(String::from),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }

    /// Put a manga into the library.
    pub async fn add_to_library(
        &mut self,
        manga_id: &str,
        status: Option<&str>,
    ) -> Result<(), ClientError> {
        let env = Envelope::data(
            "add_to_library",
            &AddToLibraryPayload {
                manga_id: manga_id.to_string(),
                status: status.map(String::from),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }

    /// Remove a manga from the library.
    pub async fn remove_from_library(&mut self, manga_id: &str) -> Result<(), ClientError> {
        let env = Envelope::data(
            "remove_from_library",
            &RemoveFromLibraryPayload {
                manga_id: manga_id.to_string(),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }

    /// Fetch the library, newest mutation first.
    pub async fn get_library(&mut self) -> Result<Vec<LibraryItem>, ClientError> {
        let reply = self.request(Envelope::bare("get_library")).await?;
        Self::expect_data(reply, "library")
    }

    /// Fetch progress for one manga.
    pub async fn get_progress(&mut self, manga_id: &str) -> Result<ProgressInfo, ClientError> {
        let env = Envelope::data(
            "get_progress",
            &GetProgressPayload {
                manga_id: manga_id.to_string(),
            },
        )?;
        let reply = self.request(env).await?;
        Self::expect_data(reply, "progress")
    }

    /// Aggregate session status. Uses the tighter 2 s read deadline of the
    /// status query path.
    pub async fn status_request(&mut self) -> Result<StatusResponsePayload, ClientError> {
        let reply = self
            .request_with_deadline(Envelope::bare("status_request"), STATUS_READ_TIMEOUT)
            .await?;
        Self::expect_data(reply, "status")
    }

    /// End the session; the transport stays open.
    pub async fn disconnect(&mut self, reason: Option<&str>) -> Result<(), ClientError> {
        let env = Envelope::data(
            "disconnect",
            &DisconnectPayload {
                reason: reason.map(String::from),
            },
        )?;
        Self::expect_success(self.request(env).await?)
    }
}

/// One-shot status probe over an ephemeral connection: connect (5 s
/// deadline), authenticate, open a session, query (2 s read deadline), and
/// disconnect.
pub async fn query_status<A: ToSocketAddrs>(
    addr: A,
    token: &str,
    device_type: &str,
    device_name: &str,
) -> Result<StatusResponsePayload, ClientError> {
    let mut client = SessionClient::connect(addr).await?;
    client.auth(token).await?;
    client.connect_device(device_type, device_name).await?;
    let status = client.status_request().await?;
    client.disconnect(None).await?;
    Ok(status)
}
