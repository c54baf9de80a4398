//! Ordered, non-blocking hand-off from event handlers to the publish sink.

use super::{PublishSink, Publication};
use crate::error::{BridgeError, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum QueueItem {
    Publish(Publication),
    Flush(oneshot::Sender<()>),
}

/// FIFO of pending publications drained by a single worker task.
///
/// Pushing never waits on the network, so subscription tasks are never held up
/// by the broker. The single worker keeps publications in push order.
#[derive(Clone)]
pub struct PublishQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl PublishQueue {
    /// Start the worker. It stops once every queue handle is dropped and the
    /// backlog is published.
    pub fn spawn(sink: Arc<dyn PublishSink>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(sink, rx));
        (Self { tx }, worker)
    }

    pub fn push(&self, publication: Publication) -> Result<()> {
        self.tx
            .send(QueueItem::Publish(publication))
            .map_err(|_| BridgeError::PublishQueueClosed)
    }

    /// Wait until everything pushed before this call has been handed to the sink.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(QueueItem::Flush(done_tx))
            .map_err(|_| BridgeError::PublishQueueClosed)?;
        done_rx.await.map_err(|_| BridgeError::PublishQueueClosed)
    }
}

async fn run_worker(sink: Arc<dyn PublishSink>, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Publish(publication) => {
                debug!(
                    "[MQTT] Publishing {}/{}: {}",
                    publication.device_id, publication.subtopic, publication.payload
                );
                if let Err(e) = sink
                    .publish(
                        &publication.device_id,
                        &publication.subtopic,
                        &publication.payload,
                        publication.retain,
                    )
                    .await
                {
                    warn!(
                        "[MQTT] Failed to publish {}/{}: {}",
                        publication.device_id, publication.subtopic, e
                    );
                }
            }
            QueueItem::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    info!("[MQTT] Publish queue closed");
}
