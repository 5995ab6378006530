//! Frame-level transports.
//!
//! A [`Connector`] opens a [`Link`]: an outbound sender and an inbound event
//! receiver. The connection manager never touches sockets directly, so the
//! same state machine runs over a real WebSocket or an in-memory channel.

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::codec::{Frame, MessageCodec};
use crate::models::flow::FlowRecord;
use crate::utils::error::{PipelineError, PipelineResult};

/// Close code for a peer that vanished without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code for an orderly shutdown
pub const NORMAL_CLOSE: u16 = 1000;

/// Something the transport reports
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Frame),
    Closed { code: u16, reason: String },
    Error(String),
}

/// Something written to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Frame),
    /// Orderly close; nothing is written after this
    Close,
}

/// An open transport
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to an endpoint
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, PipelineResult<Link>>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, PipelineResult<Link>> {
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let (ws, _response) = connect_async(endpoint.as_str()).await?;
            info!("WebSocket connected to {}", endpoint);

            let (mut sink, mut stream) = ws.split();
            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
            let (inbound_tx, inbound) = mpsc::unbounded_channel::<TransportEvent>();

            // Writer
            let writer_events = inbound_tx.clone();
            tokio::spawn(async move {
                while let Some(item) = outbound_rx.recv().await {
                    let result = match item {
                        Outbound::Frame(Frame::Text(text)) => sink.send(Message::Text(text.into())).await,
                        Outbound::Frame(Frame::Binary(data)) => sink.send(Message::Binary(data.into())).await,
                        Outbound::Close => {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client disconnect".into(),
                            };
                            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                                debug!("Close frame not delivered: {}", e);
                            }
                            break;
                        }
                    };
                    if let Err(e) = result {
                        error!("WebSocket send failed: {}", e);
                        let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                let _ = sink.close().await;
                debug!("WebSocket writer finished");
            });

            // Reader
            tokio::spawn(async move {
                let mut code = ABNORMAL_CLOSE;
                let mut reason = String::from("connection lost");

                while let Some(message) = stream.next().await {
                    let event = match message {
                        Ok(Message::Text(text)) => TransportEvent::Frame(Frame::Text(text.as_str().to_owned())),
                        Ok(Message::Binary(data)) => TransportEvent::Frame(Frame::Binary(data.to_vec())),
                        Ok(Message::Close(frame)) => {
                            match frame {
                                Some(frame) => {
                                    code = u16::from(frame.code);
                                    reason = frame.reason.as_str().to_owned();
                                }
                                None => {
                                    code = 1005;
                                    reason = String::new();
                                }
                            }
                            break;
                        }
                        // tungstenite answers pings itself
                        Ok(_) => continue,
                        Err(e) => {
                            warn!("WebSocket read failed: {}", e);
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            return;
                        }
                    };
                    if inbound_tx.send(event).is_err() {
                        // Link dropped on our side
                        return;
                    }
                }

                let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                debug!("WebSocket reader finished");
            });

            Ok(Link { outbound, inbound })
        })
    }
}

/// In-memory transport. Every open is handed to the paired receiver as a
/// [`PendingOpen`], which the other side accepts or refuses.
#[derive(Clone)]
pub struct ChannelConnector {
    opens: mpsc::UnboundedSender<PendingOpen>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingOpen>) {
        let (opens, rx) = mpsc::unbounded_channel();
        (Self { opens }, rx)
    }
}

impl Connector for ChannelConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, PipelineResult<Link>> {
        let (reply, outcome) = oneshot::channel();
        let request = PendingOpen {
            endpoint: endpoint.to_string(),
            reply,
        };
        let sent = self.opens.send(request).is_ok();

        Box::pin(async move {
            if !sent {
                return Err(PipelineError::Transport("no listener for in-memory transport".to_string()));
            }
            outcome
                .await
                .unwrap_or_else(|_| Err(PipelineError::Transport("open abandoned".to_string())))
        })
    }
}

/// An open request waiting for the remote side to answer
pub struct PendingOpen {
    endpoint: String,
    reply: oneshot::Sender<PipelineResult<Link>>,
}

impl PendingOpen {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Complete the open and return the remote half of the link
    pub fn accept(self) -> RemoteEnd {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.reply.send(Ok(Link { outbound, inbound }));
        RemoteEnd {
            to_client,
            from_client,
            codec: MessageCodec::new(),
        }
    }

    /// Fail the open with a transport error
    pub fn refuse(self, cause: &str) {
        let _ = self.reply.send(Err(PipelineError::Transport(cause.to_string())));
    }
}

/// Server side of an in-memory link
pub struct RemoteEnd {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<Outbound>,
    codec: MessageCodec,
}

impl RemoteEnd {
    /// Push a raw frame. Returns false once the client dropped the link.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(TransportEvent::Frame(frame)).is_ok()
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.send(Frame::Text(text.to_string()))
    }

    /// Push a flow record as a binary envelope
    pub fn send_flow(&self, record: &FlowRecord) -> bool {
        self.send(self.codec.encode_flow(record))
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.to_client
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Report a transport failure to the client
    pub fn fail(&self, cause: &str) -> bool {
        self.to_client.send(TransportEvent::Error(cause.to_string())).is_ok()
    }

    /// Next item the client wrote; `None` once the client dropped the link
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.from_client.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepted_open_links_both_sides() {
        let (connector, mut opens) = ChannelConnector::new();
        let opening = connector.open("ws://memory/ws");

        let pending = opens.recv().await.unwrap();
        assert_eq!(pending.endpoint(), "ws://memory/ws");
        let mut remote = pending.accept();
        let mut link = opening.await.unwrap();

        assert!(remote.send_text("hi"));
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Frame(Frame::Text("hi".to_string())))
        );

        link.outbound.send(Outbound::Close).unwrap();
        assert_eq!(remote.recv().await, Some(Outbound::Close));

        drop(link);
        assert!(remote.recv().await.is_none());
        assert!(!remote.send_text("late"));
    }

    #[tokio::test]
    async fn test_refused_open_is_transport_error() {
        let (connector, mut opens) = ChannelConnector::new();
        let opening = connector.open("ws://memory/ws");
        opens.recv().await.unwrap().refuse("connection refused");

        assert_eq!(
            opening.await.err(),
            Some(PipelineError::Transport("connection refused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_open_without_listener_fails() {
        let (connector, opens) = ChannelConnector::new();
        drop(opens);
        assert!(matches!(
            connector.open("ws://memory/ws").await,
            Err(PipelineError::Transport(_))
        ));
    }
}
