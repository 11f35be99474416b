use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::{LiveEvent, LiveEventDispatcher};
use crate::services::{
    connection::{ConnectionEvent, ConnectionManager},
    normalizer,
    worker::WorkerHandle,
};

/// Spawns the worker that normalizes raw messages and dispatches live events. Events
/// are processed one at a time, so inline handlers observe them in arrival order.
pub fn spawn_pipeline(
    connection: &ConnectionManager,
    dispatcher: Arc<LiveEventDispatcher>,
) -> WorkerHandle {
    let mut events = connection.subscribe();
    WorkerHandle::spawn("live_events", move |mut shutdown| async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Ok(ConnectionEvent::Message(raw)) => {
                        let notification = normalizer::normalize(&raw);
                        dispatcher
                            .dispatch(LiveEvent::NotificationReceived { notification })
                            .await;
                    }
                    Ok(ConnectionEvent::Reconnected) => {
                        dispatcher.dispatch(LiveEvent::Reconnected).await;
                    }
                    Ok(ConnectionEvent::StateChanged(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification pipeline fell behind, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("Notification pipeline stopped");
    })
}
