use std::sync::Arc;

use consumption_client::domain::PowerReading;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

pub type ReadingSender = mpsc::Sender<Envelope<PowerReading>>;

/// Readings enqueued by the batch endpoint.
///
/// The receiver can be taken once; a second `stream()` call yields a single
/// source error.
#[derive(Clone)]
pub struct ChannelSource {
    receiver: Arc<Mutex<Option<mpsc::Receiver<Envelope<PowerReading>>>>>,
}

impl ChannelSource {
    pub fn new(channel_capacity: usize) -> (ReadingSender, Self) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let source = Self {
            receiver: Arc::new(Mutex::new(Some(rx))),
        };
        (tx, source)
    }
}

#[async_trait::async_trait]
impl Source<PowerReading> for ChannelSource {
    async fn stream(&self) -> EnvelopeStream<PowerReading> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "channel source already consumed; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}
