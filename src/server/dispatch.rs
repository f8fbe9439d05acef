//! Update dispatch loop.
//!
//! One loop runs per open WebSocket. It resolves the plot
//! (`Connecting`), forwards every [`UpdateEvent`](crate::plot::UpdateEvent)
//! from the update stream as a JSON text frame (`Streaming`), and stops
//! (`Closed`) when the client leaves, a frame cannot be delivered, or the
//! server shuts down. A failed delivery is never retried: the loop exits and
//! its subscription is released.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures_util::{Sink, SinkExt, Stream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::PlotRegistry;
use super::stream::{StreamPolicy, open_stream};

/// Connection state of a dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Resolving the plot.
    Connecting,
    /// Forwarding updates.
    Streaming,
    /// Finished; resources released.
    Closed,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a dispatch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The plot was not registered; the reason was sent as the close frame.
    Rejected(String),
    /// The client closed the connection.
    ClientClosed,
    /// A frame could not be delivered or read.
    TransportClosed(String),
    /// The server is shutting down.
    Shutdown,
    /// The update stream ended.
    StreamEnded,
}

/// Close reason sent when a client asks for an unknown plot.
pub fn not_registered_reason(plot_id: &str) -> String {
    format!("Plot with id='{plot_id}' not registered")
}

/// Per-connection dispatch loop.
pub struct DispatchLoop {
    plot_id: String,
    since: Option<u64>,
    policy: StreamPolicy,
    registry: Arc<PlotRegistry>,
    cancel: CancellationToken,
    state: DispatchState,
}

impl DispatchLoop {
    /// Create a loop for `plot_id`, starting from the client's `since` version.
    pub fn new(
        plot_id: impl Into<String>,
        since: Option<u64>,
        policy: StreamPolicy,
        registry: Arc<PlotRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plot_id: plot_id.into(),
            since,
            policy,
            registry,
            cancel,
            state: DispatchState::Connecting,
        }
    }

    /// Current state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Drive the connection until it closes.
    ///
    /// `tx` receives outgoing frames, `rx` yields frames from the client.
    pub async fn run<Tx, Rx, E>(mut self, mut tx: Tx, mut rx: Rx) -> DispatchOutcome
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: std::fmt::Display,
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: std::fmt::Display,
    {
        debug!(plot_id = %self.plot_id, state = %self.state, "dispatch loop started");

        let mut updates = match open_stream(&self.registry, &self.plot_id, self.since, self.policy)
        {
            Ok(updates) => updates,
            Err(e) => {
                let reason = not_registered_reason(&self.plot_id);
                warn!(plot_id = %self.plot_id, error = %e, "rejecting update stream");
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: reason.clone().into(),
                }));
                if let Err(e) = tx.send(close).await {
                    debug!(plot_id = %self.plot_id, error = %e, "close frame not delivered");
                }
                self.transition(DispatchState::Closed);
                return DispatchOutcome::Rejected(reason);
            }
        };

        self.transition(DispatchState::Streaming);
        let mut frames: u64 = 0;

        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    }));
                    if let Err(e) = tx.send(close).await {
                        debug!(plot_id = %self.plot_id, error = %e, "close frame not delivered");
                    }
                    break DispatchOutcome::Shutdown;
                }
                event = updates.next() => {
                    let Some(event) = event else {
                        break DispatchOutcome::StreamEnded;
                    };
                    let text = match event.to_json_string() {
                        Ok(text) => text,
                        Err(e) => break DispatchOutcome::TransportClosed(e.to_string()),
                    };
                    if let Err(e) = tx.send(Message::Text(text.into())).await {
                        debug!(plot_id = %self.plot_id, error = %e, "subscriber disconnected");
                        break DispatchOutcome::TransportClosed(e.to_string());
                    }
                    frames += 1;
                }
                incoming = rx.next() => match incoming {
                    None | Some(Ok(Message::Close(_))) => break DispatchOutcome::ClientClosed,
                    Some(Err(e)) => break DispatchOutcome::TransportClosed(e.to_string()),
                    Some(Ok(_)) => {}
                },
            }
        };

        drop(updates);
        self.transition(DispatchState::Closed);
        info!(plot_id = %self.plot_id, frames, outcome = ?outcome, "update stream closed");
        outcome
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(plot_id = %self.plot_id, from = %self.state, to = %next, "dispatch state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::plot::{Plot, PlotState, Trace};
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_util::sync::PollSender;

    struct FakeClient {
        outgoing: mpsc::Receiver<Message>,
        incoming: mpsc::Sender<Result<Message, Infallible>>,
    }

    fn spawn_loop(
        registry: Arc<PlotRegistry>,
        plot_id: &str,
        since: Option<u64>,
        cancel: CancellationToken,
    ) -> (FakeClient, tokio::task::JoinHandle<DispatchOutcome>) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(16);
        let dispatch = DispatchLoop::new(plot_id, since, StreamPolicy::Push, registry, cancel);
        assert_eq!(dispatch.state(), DispatchState::Connecting);
        let handle = tokio::spawn(dispatch.run(PollSender::new(out_tx), ReceiverStream::new(in_rx)));
        (
            FakeClient {
                outgoing: out_rx,
                incoming: in_tx,
            },
            handle,
        )
    }

    fn registry_with(id: &str) -> (Arc<PlotRegistry>, Arc<PlotState>) {
        let registry = Arc::new(PlotRegistry::new());
        let state = PlotState::with_id(id, Plot::new().with_trace(Trace::new())).shared();
        registry.register_state(Arc::clone(&state));
        (registry, state)
    }

    async fn next_text(client: &mut FakeClient) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.outgoing.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_plot_is_rejected_without_updates() {
        let registry = Arc::new(PlotRegistry::new());
        let (mut client, handle) =
            spawn_loop(registry, "missing", Some(0), CancellationToken::new());

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected("Plot with id='missing' not registered".to_owned())
        );

        match client.outgoing.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.reason.as_str(), "Plot with id='missing' not registered");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(client.outgoing.recv().await.is_none());
    }

    #[tokio::test]
    async fn forwards_each_mutation_in_order() {
        let (registry, state) = registry_with("p1");
        let (mut client, handle) =
            spawn_loop(registry, "p1", Some(0), CancellationToken::new());

        state.mutate(|p| p.add_trace(Trace::new()));
        let first = next_text(&mut client).await;
        assert_eq!(first["toVersion"], 1);

        state.mutate(|p| p.add_trace(Trace::new()));
        let second = next_text(&mut client).await;
        assert_eq!(second["sinceVersion"], 1);
        assert_eq!(second["toVersion"], 2);

        drop(client.incoming);
        assert_eq!(handle.await.unwrap(), DispatchOutcome::ClientClosed);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_frame_from_client_ends_loop() {
        let (registry, state) = registry_with("p1");
        let (client, handle) = spawn_loop(registry, "p1", None, CancellationToken::new());
        client.incoming.send(Ok(Message::Close(None))).await.unwrap();
        assert_eq!(handle.await.unwrap(), DispatchOutcome::ClientClosed);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_terminates_loop() {
        let (registry, state) = registry_with("p1");
        let (client, handle) = spawn_loop(registry, "p1", Some(0), CancellationToken::new());
        let FakeClient { outgoing, incoming } = client;
        drop(outgoing);

        state.mutate(|p| p.add_trace(Trace::new()));
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::TransportClosed(_)));
        drop(incoming);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_closes_connection() {
        let (registry, _state) = registry_with("p1");
        let cancel = CancellationToken::new();
        let (mut client, handle) = spawn_loop(registry, "p1", None, cancel.clone());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), DispatchOutcome::Shutdown);
        assert!(matches!(client.outgoing.recv().await, Some(Message::Close(Some(_)))));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(DispatchState::Connecting.to_string(), "CONNECTING");
        assert_eq!(DispatchState::Streaming.to_string(), "STREAMING");
        assert_eq!(DispatchState::Closed.to_string(), "CLOSED");
    }

    #[tokio::test]
    async fn cancellation_with_gone_client_still_shuts_down() {
        let (registry, state) = registry_with("p1");
        let cancel = CancellationToken::new();
        let (client, handle) = spawn_loop(registry, "p1", None, cancel.clone());
        let FakeClient { outgoing, incoming } = client;
        drop(outgoing);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), DispatchOutcome::Shutdown);
        drop(incoming);
        assert_eq!(state.subscriber_count(), 0);
    }
}
