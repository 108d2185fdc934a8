//! Backend reached over a child process's stdio, one JSON [`Frame`] per line.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use shared::{
    error::BridgeError,
    protocol::{Frame, ReplyResult},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::{received_payload, EventStream, Transport, CHANNEL_CAPACITY};

type PendingReplies = HashMap<u64, oneshot::Sender<ReplyResult>>;

struct Shared {
    pending: Mutex<PendingReplies>,
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every waiter with `Closed`.
        pending.clear();
        drop(pending);
        // Ends every open event stream.
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Value> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

pub struct ProcessTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
    _child: Option<Child>,
}

impl ProcessTransport {
    /// Launch `program` and talk to it over stdin/stdout.
    pub fn spawn(program: &str, args: &[String], timeout: Duration) -> Result<Self, BridgeError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| BridgeError::Transport(format!("failed to start {program}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Transport("backend stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Transport("backend stdout unavailable".into()))?;

        info!(program, pid = child.id(), "backend process started");
        let mut transport = Self::from_io(stdout, stdin, timeout);
        transport._child = Some(child);
        Ok(transport)
    }

    /// Speak the frame protocol over an arbitrary byte pipe.
    pub fn from_io<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(write_frames(writer, outbound_rx, Arc::clone(&shared))),
            tokio::spawn(read_frames(reader, Arc::clone(&shared))),
        ];

        Self {
            outbound,
            shared,
            next_id: AtomicU64::new(1),
            timeout,
            tasks,
            _child: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn forget(&self, id: u64) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(BridgeError::Closed);
            }
            pending.insert(id, reply_tx);
        }

        let frame = Frame::Invoke {
            id,
            command: command.to_string(),
            payload,
        };
        if self.outbound.send(frame).is_err() {
            self.forget(id);
            return Err(BridgeError::Closed);
        }
        debug!(command, id, "invoke frame queued");

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(ReplyResult::Ok(value))) => Ok(value),
            Ok(Ok(ReplyResult::Err(message))) => Err(BridgeError::backend(command, message)),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.forget(id);
                Err(BridgeError::Timeout {
                    command: command.to_string(),
                    millis: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        let channel_name = channel.to_string();
        let stream = BroadcastStream::new(self.shared.channel(channel).subscribe()).filter_map(
            move |received| futures::future::ready(received_payload(&channel_name, received)),
        );
        Ok(stream.boxed())
    }

    async fn emit(&self, channel: &str, payload: Value) -> Result<(), BridgeError> {
        self.outbound
            .send(Frame::Event {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| BridgeError::Closed)
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let line = match frame.encode_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "dropping unencodable frame");
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            warn!(error = %err, "backend pipe write failed");
            shared.close();
            return;
        }
    }
}

async fn read_frames<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "backend pipe read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Frame::decode_line(&line) {
            Ok(Frame::Reply { id, result }) => {
                let waiter = shared
                    .pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!(id, "reply for unknown or expired request"),
                }
            }
            Ok(Frame::Event { channel, payload }) => {
                // No subscribers yet is fine; the event is simply not observed.
                let _ = shared.channel(&channel).send(payload);
            }
            Ok(Frame::Invoke { command, .. }) => {
                warn!(command, "backend sent an invoke frame; ignoring");
            }
            Err(err) => warn!(error = %err, "undecodable line from backend"),
        }
    }
    info!("backend stream ended");
    shared.close();
}
