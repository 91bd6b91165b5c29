//! ## Status Reporting
//!
//! Long-lived tasks report fatal conditions back to the main runtime loop
//! through a status channel. Each message is tagged with its origin so the
//! loop can decide whether the process should come down.

use crate::error::PoolError;

/// The kind of event being reported by a task.
#[derive(Debug)]
pub enum State {
    /// The TCP listener for an endpoint died.
    ListenerShutdown(PoolError),
    /// The job broadcaster lost its upstream stream.
    BroadcasterShutdown(PoolError),
    /// The share recorder stopped unexpectedly.
    RecorderShutdown(PoolError),
    /// Component is healthy; informational only.
    Healthy(String),
}

#[derive(Debug)]
pub struct Status {
    pub state: State,
}

/// A status channel handle tagged with the component that holds it.
#[derive(Debug, Clone)]
pub enum StatusSender {
    Listener(async_channel::Sender<Status>),
    Broadcaster(async_channel::Sender<Status>),
    Recorder(async_channel::Sender<Status>),
}

impl StatusSender {
    pub async fn send(&self, state: State) {
        let inner = match self {
            Self::Listener(tx) | Self::Broadcaster(tx) | Self::Recorder(tx) => tx,
        };
        // A closed status channel means the main loop is already gone.
        let _ = inner.send(Status { state }).await;
    }
}

/// True when the reported state should bring the whole front-end down.
pub fn is_fatal(state: &State) -> bool {
    !matches!(state, State::Healthy(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fatal_states_are_classified() {
        assert!(is_fatal(&State::ListenerShutdown(PoolError::Shutdown)));
        assert!(!is_fatal(&State::Healthy("ok".into())));

        let (tx, rx) = async_channel::unbounded();
        StatusSender::Recorder(tx)
            .send(State::Healthy("recorder idle".into()))
            .await;
        let status = rx.recv().await.unwrap();
        assert!(matches!(status.state, State::Healthy(_)));
    }
}
