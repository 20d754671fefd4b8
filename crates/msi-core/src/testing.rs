// Fake widget for unit tests: the far end of an in-memory channel pair that
// records every event it receives and answers acks as told.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use msi_api::AckResult;
use msi_api::channel::{Channel, MessageChannel, Responder, handler};
use serde_json::Value;
use tokio::sync::mpsc;

pub(crate) struct Widget {
    pub channel: Arc<MessageChannel>,
    tx: mpsc::UnboundedSender<(String, Value)>,
    rx: mpsc::UnboundedReceiver<(String, Value)>,
}

impl Widget {
    /// Host side of the channel, plus the fake widget on the other end.
    pub fn pair() -> (Arc<MessageChannel>, Self) {
        let (host, widget) = MessageChannel::pair();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            host,
            Self {
                channel: widget,
                tx,
                rx,
            },
        )
    }

    /// Record `event` and answer every ack with `outcome`.
    pub fn answer(&self, event: &'static str, outcome: AckResult) {
        let tx = self.tx.clone();
        self.channel.on(
            event,
            handler(move |payload, responder| {
                let _ = tx.send((event.to_owned(), payload));
                if let Some(r) = responder {
                    r.respond(outcome.clone());
                }
            }),
        );
    }

    /// Record `event` and answer with `Ok(null)`.
    pub fn ack(&self, event: &'static str) {
        self.answer(event, Ok(Value::Null));
    }

    /// Record `event` and keep its responders unanswered.
    pub fn park(&self, event: &'static str) -> Arc<Mutex<Vec<Responder>>> {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&parked);
        let tx = self.tx.clone();
        self.channel.on(
            event,
            handler(move |payload, responder| {
                if let Some(r) = responder {
                    slot.lock().unwrap().push(r);
                }
                let _ = tx.send((event.to_owned(), payload));
            }),
        );
        parked
    }

    /// Next recorded event.
    pub async fn next(&mut self) -> (String, Value) {
        tokio::time::timeout(Duration::from_secs(60), self.rx.recv())
            .await
            .expect("widget saw no event")
            .unwrap()
    }

    /// Everything recorded so far, after letting in-flight frames land.
    pub async fn drain(&mut self) -> Vec<(String, Value)> {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let mut seen = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            seen.push(item);
        }
        seen
    }

    /// Names of everything recorded so far.
    pub async fn drain_names(&mut self) -> Vec<String> {
        self.drain().await.into_iter().map(|(name, _)| name).collect()
    }
}
