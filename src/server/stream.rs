//! Update stream source.
//!
//! Turns a registered plot into an endless, lazily produced sequence of
//! [`UpdateEvent`]s starting from a client-supplied version. Each call opens
//! an independent stream; dropping it releases the underlying
//! [`Subscription`](crate::plot::Subscription).

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

use super::registry::PlotRegistry;
use crate::config::{ServerConfig, UpdateMode};
use crate::error::Result;
use crate::plot::{PlotState, UpdateEvent};

/// Boxed update stream handed to dispatch loops.
pub type UpdateStream = Pin<Box<dyn Stream<Item = UpdateEvent> + Send>>;

/// How a stream produces events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPolicy {
    /// Emit as soon as a mutation lands; suspend in between.
    Push,
    /// Sample every `interval` and emit a full snapshot when the version moved.
    Pull {
        /// Sampling period.
        interval: Duration,
    },
}

impl StreamPolicy {
    /// The policy matching a server configuration, or `None` when live
    /// updates are disabled.
    pub fn for_config(config: &ServerConfig) -> Option<Self> {
        match config.update.mode {
            UpdateMode::None => None,
            UpdateMode::Push => Some(Self::Push),
            UpdateMode::Pull => Some(Self::Pull {
                interval: config.update_interval(),
            }),
        }
    }
}

/// Open a stream for the plot registered as `plot_id`.
///
/// `from_version` is the version the client already holds; `None` means
/// "whatever is current", so only future changes are sent.
///
/// # Errors
///
/// Returns [`PlotError::NotFound`](crate::error::PlotError::NotFound) if the
/// plot is not registered.
pub fn open_stream(
    registry: &PlotRegistry,
    plot_id: &str,
    from_version: Option<u64>,
    policy: StreamPolicy,
) -> Result<UpdateStream> {
    let state = registry.get(plot_id)?;
    Ok(stream_updates(state, from_version, policy))
}

/// Open a stream directly on a plot state.
pub fn stream_updates(
    state: Arc<PlotState>,
    from_version: Option<u64>,
    policy: StreamPolicy,
) -> UpdateStream {
    let from = from_version.unwrap_or_else(|| state.current_version());
    let mut subscription = state.subscribe(from);

    match policy {
        StreamPolicy::Push => Box::pin(async_stream::stream! {
            while let Some(event) = subscription.next_update().await {
                yield event;
            }
        }),
        StreamPolicy::Pull { interval } => {
            let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Box::pin(IntervalStream::new(ticks).filter_map(move |_| subscription.poll_snapshot()))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::plot::{Plot, Trace};

    fn registered(id: &str) -> (PlotRegistry, Arc<PlotState>) {
        let registry = PlotRegistry::new();
        let state = PlotState::with_id(id, Plot::new().with_trace(Trace::new())).shared();
        registry.register_state(Arc::clone(&state));
        (registry, state)
    }

    #[test]
    fn policy_follows_update_mode() {
        let none = ServerConfig::default();
        assert_eq!(StreamPolicy::for_config(&none), None);

        let push = ServerConfig::default().push_updates(Duration::from_millis(50));
        assert_eq!(StreamPolicy::for_config(&push), Some(StreamPolicy::Push));

        let pull = ServerConfig::default().pull_updates(Duration::from_millis(75));
        assert_eq!(
            StreamPolicy::for_config(&pull),
            Some(StreamPolicy::Pull {
                interval: Duration::from_millis(75)
            })
        );
    }

    #[test]
    fn unknown_plot_is_not_found() {
        let registry = PlotRegistry::new();
        let err = open_stream(&registry, "missing", Some(0), StreamPolicy::Push)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Plot with id = missing not found");
    }

    #[tokio::test]
    async fn push_stream_delivers_each_version_once() {
        let (registry, state) = registered("p1");
        let mut stream = open_stream(&registry, "p1", Some(0), StreamPolicy::Push).unwrap();

        state.mutate(|p| p.add_trace(Trace::new()));
        let first = stream.next().await.unwrap();
        assert_eq!((first.since_version, first.to_version), (0, 1));

        state.mutate(|p| p.add_trace(Trace::new()));
        let second = stream.next().await.unwrap();
        assert_eq!((second.since_version, second.to_version), (1, 2));
    }

    #[tokio::test]
    async fn push_stream_stale_client_gets_snapshot() {
        let (registry, state) = registered("p1");
        state.mutate(|p| p.add_trace(Trace::new()));
        let mut stream = open_stream(&registry, "p1", Some(99), StreamPolicy::Push).unwrap();
        let event = stream.next().await.unwrap();
        assert!(event.is_snapshot());
        assert_eq!(event.to_version, 1);
    }

    #[tokio::test]
    async fn dropping_stream_releases_subscription() {
        let (registry, state) = registered("p1");
        let stream = open_stream(&registry, "p1", None, StreamPolicy::Push).unwrap();
        assert_eq!(state.subscriber_count(), 1);
        drop(stream);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pull_stream_emits_snapshots_only_on_change() {
        let (registry, state) = registered("p1");
        let policy = StreamPolicy::Pull {
            interval: Duration::from_millis(100),
        };
        let mut stream = open_stream(&registry, "p1", Some(0), policy).unwrap();

        state.mutate(|p| {
            p.layout_mut().set_title("tick");
        });
        let event = stream.next().await.unwrap();
        assert!(event.is_snapshot());
        assert_eq!(event.to_version, 1);

        // Several ticks pass with no mutation: nothing is emitted.
        let idle = tokio::time::timeout(Duration::from_millis(350), stream.next()).await;
        assert!(idle.is_err());

        state.mutate(|p| p.add_trace(Trace::new()));
        let event = stream.next().await.unwrap();
        assert_eq!((event.since_version, event.to_version), (1, 2));
    }
}
