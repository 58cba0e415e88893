//! CLI Dispatcher: the TCP, line-oriented command surface operators use to
//! inspect and drive a running node.
//!
//! Each session is a lightweight per-connection task. Commands are injected
//! into the orchestrator's single event loop via an unbounded channel and a
//! oneshot reply.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec};

use crate::database::WORD_COUNT;
use crate::peer::Peer;

/// A slow client that would block a write for longer than this is dropped;
/// writes are best-effort and must never stall the event loop.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// A request injected by a CLI session into the orchestrator loop.
#[derive(Debug)]
pub enum Operation {
    Peers(oneshot::Sender<Vec<Peer>>),
    Current(oneshot::Sender<[String; WORD_COUNT]>),
    StartConsensus {
        index: u8,
        word: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    SetLyingPercent {
        percent: u8,
        reply: oneshot::Sender<()>,
    },
}

pub type OperationSender = mpsc::UnboundedSender<Operation>;

/// Accepts TCP connections and spawns one session task per connection.
pub struct CliDispatcher {
    listener: TcpListener,
    operations: OperationSender,
}

impl CliDispatcher {
    pub fn new(listener: TcpListener, operations: OperationSender) -> Self {
        Self {
            listener,
            operations,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs forever, accepting and spawning sessions. Intended to be raced
    /// against the orchestrator's own event loop with `tokio::select!`.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("CLI session opened from {addr}");
                    let operations = self.operations.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_session(stream, operations).await {
                            debug!("CLI session with {addr} ended: {err}");
                        }
                    });
                }
                Err(err) => {
                    warn!("failed to accept CLI connection: {err}");
                }
            }
        }
    }
}

async fn handle_session(stream: TcpStream, operations: OperationSender) -> std::io::Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new());

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!("CLI session framing error: {err}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }

        let response = dispatch(line, &operations).await;
        if write_line(&mut framed, response).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn write_line(
    framed: &mut Framed<TcpStream, LinesCodec>,
    line: String,
) -> std::io::Result<()> {
    match tokio::time::timeout(WRITE_TIMEOUT, framed.send(line)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "CLI write failed",
        )),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "CLI write would block",
        )),
    }
}

/// Parses and executes one command line, returning the text to send back.
/// A single line may need multiple printed lines (`peers`, `current`); those
/// are joined with `\n` and written as one frame.
async fn dispatch(line: &str, operations: &OperationSender) -> String {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return "error: unknown command".to_string();
    };

    match command {
        "peers" => {
            let (tx, rx) = oneshot::channel();
            if operations.send(Operation::Peers(tx)).is_err() {
                return "error: node is shutting down".to_string();
            }
            match rx.await {
                Ok(peers) => {
                    if peers.is_empty() {
                        String::new()
                    } else {
                        peers
                            .into_iter()
                            .map(|p| format!("{}  age={}s", p.key, age_seconds(p.last_heard)))
                            .collect::<Vec<_>>()
                            .join("\n")
                    }
                }
                Err(_) => "error: node is shutting down".to_string(),
            }
        }

        "current" => {
            let (tx, rx) = oneshot::channel();
            if operations.send(Operation::Current(tx)).is_err() {
                return "error: node is shutting down".to_string();
            }
            match rx.await {
                Ok(words) => words
                    .iter()
                    .enumerate()
                    .map(|(i, w)| format!("{i}: {w}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(_) => "error: node is shutting down".to_string(),
            }
        }

        "consensus" => {
            let (Some(index_arg), Some(word)) = (parts.next(), parts.next()) else {
                return "error: usage: consensus <index> <word>".to_string();
            };
            let Ok(index) = index_arg.parse::<u8>() else {
                return format!("error: '{index_arg}' is not a valid index");
            };
            let (tx, rx) = oneshot::channel();
            let op = Operation::StartConsensus {
                index,
                word: word.to_string(),
                reply: tx,
            };
            if operations.send(op).is_err() {
                return "error: node is shutting down".to_string();
            }
            match rx.await {
                Ok(Ok(round_id)) => round_id,
                Ok(Err(reason)) => format!("error: {reason}"),
                Err(_) => "error: node is shutting down".to_string(),
            }
        }

        "lie" => {
            let percent = match parts.next() {
                Some(arg) => match arg.parse::<u16>() {
                    Ok(p) => p.min(100) as u8,
                    Err(_) => return format!("error: '{arg}' is not a valid percentage"),
                },
                None => 100,
            };
            set_lying_percent(operations, percent).await
        }

        "truth" => set_lying_percent(operations, 0).await,

        _ => "error: unknown command".to_string(),
    }
}

async fn set_lying_percent(operations: &OperationSender, percent: u8) -> String {
    let (tx, rx) = oneshot::channel();
    if operations
        .send(Operation::SetLyingPercent { percent, reply: tx })
        .is_err()
    {
        return "error: node is shutting down".to_string();
    }
    match rx.await {
        Ok(()) => String::new(),
        Err(_) => "error: node is shutting down".to_string(),
    }
}

fn age_seconds(last_heard_millis: u64) -> u64 {
    crate::utilities::time::EphemeraTime::now()
        .saturating_sub(last_heard_millis)
        / 1000
}
