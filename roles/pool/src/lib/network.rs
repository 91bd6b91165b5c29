//! Newline-framed JSON-RPC over a `TcpStream`. One reader and one writer
//! task per connection; either side failing closes both. Inbound frames
//! are stamped with their arrival time so the submit handler can drop
//! aged submissions.

use async_channel::{unbounded, Receiver, Sender};
use futures::StreamExt;
use std::time::Instant;
use sv1_api::json_rpc;
use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, warn};

const MAX_LINE_LENGTH: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct TimestampedMessage {
    pub received_at: Instant,
    pub message: json_rpc::Message,
}

/// One side of a Stratum connection: read parsed frames, write messages.
#[derive(Debug)]
pub struct StratumConnection {
    receiver: Receiver<TimestampedMessage>,
    sender: Sender<json_rpc::Message>,
}

struct ConnectionState {
    receiver_outgoing: Receiver<json_rpc::Message>,
    sender_outgoing: Sender<json_rpc::Message>,
    receiver_incoming: Receiver<TimestampedMessage>,
    sender_incoming: Sender<TimestampedMessage>,
}

impl ConnectionState {
    fn close(&self) {
        self.receiver_incoming.close();
        self.receiver_outgoing.close();
        self.sender_incoming.close();
        self.sender_outgoing.close();
    }
}

impl Drop for StratumConnection {
    /// Closing the channels lets the writer drain any queued responses and
    /// exit, which drops the socket halves and sends the peer its FIN.
    fn drop(&mut self) {
        self.receiver.close();
        self.sender.close();
    }
}

impl StratumConnection {
    pub async fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (sender_incoming, receiver_incoming) = unbounded();
        let (sender_outgoing, receiver_outgoing) = unbounded();

        let state = ConnectionState {
            receiver_outgoing: receiver_outgoing.clone(),
            sender_outgoing: sender_outgoing.clone(),
            receiver_incoming: receiver_incoming.clone(),
            sender_incoming: sender_incoming.clone(),
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = Self::run_reader(BufReader::new(read_half), sender_incoming.clone()) => {
                    debug!("reader exited; closing connection channels");
                }
                _ = Self::run_writer(BufWriter::new(write_half), receiver_outgoing.clone()) => {
                    debug!("writer exited; closing connection channels");
                }
            }
            state.close();
        });

        Self {
            receiver: receiver_incoming,
            sender: sender_outgoing,
        }
    }

    async fn run_reader(
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        sender: Sender<TimestampedMessage>,
    ) {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        while let Some(result) = lines.next().await {
            match result {
                Ok(line) => match serde_json::from_str::<json_rpc::Message>(&line) {
                    Ok(message) => {
                        let frame = TimestampedMessage {
                            received_at: Instant::now(),
                            message,
                        };
                        if sender.send(frame).await.is_err() {
                            warn!("frame receiver dropped, stopping reader");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("failed to deserialize inbound frame: {e:?}");
                    }
                },
                Err(e) => {
                    debug!("error reading from stream: {e:?}");
                    break;
                }
            }
        }
    }

    async fn run_writer(
        mut writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
        receiver: Receiver<json_rpc::Message>,
    ) {
        while let Ok(message) = receiver.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => {
                    let data = format!("{line}\n");
                    if writer.write_all(data.as_bytes()).await.is_err() {
                        debug!("failed to write to stream");
                        break;
                    }
                    if writer.flush().await.is_err() {
                        debug!("failed to flush writer");
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to serialize outbound message: {e:?}");
                    break;
                }
            }
        }
    }

    /// True when the write was queued; false means the peer is gone.
    pub async fn send(&self, message: impl Into<json_rpc::Message>) -> bool {
        self.sender.send(message.into()).await.is_ok()
    }

    pub async fn receive(&self) -> Option<TimestampedMessage> {
        self.receiver.recv().await.ok()
    }
}
