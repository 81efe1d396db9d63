//! MQTT transport implementation on top of `rumqttc`

use crate::transport::traits::{Delivery, InboundMessage, QoS, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Publish};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            // The broker grants at most QoS 1 on the jobs filter
            rumqttc::QoS::AtLeastOnce | rumqttc::QoS::ExactlyOnce => QoS::AtLeastOnce,
        }
    }
}

impl From<Publish> for InboundMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos.into(),
            pkid: publish.pkid,
        }
    }
}

type AckSender = oneshot::Sender<Result<(), TransportError>>;

#[derive(Debug, Default)]
struct AckState {
    /// Publishes handed to the client, in request order, not yet on the wire
    awaiting_send: VecDeque<(QoS, AckSender)>,
    /// QoS 1 publishes on the wire, by packet id, awaiting PUBACK
    in_flight: HashMap<u16, AckSender>,
}

/// Correlates publish requests with the broker's PUBACKs.
///
/// The client assigns packet ids inside its event loop, so a request is only
/// matched to its id when the event loop reports the outgoing packet. The
/// client sends requests in the order they were queued, which keeps the FIFO
/// in step as long as every queued request goes through [`AckTracker::expect`].
#[derive(Debug, Default)]
pub struct AckTracker {
    state: Mutex<AckState>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a publish that is about to be queued on the client
    pub fn expect(&self, qos: QoS) -> Delivery {
        let (tx, rx) = oneshot::channel();
        self.lock().awaiting_send.push_back((qos, tx));
        Delivery::pending(rx)
    }

    /// Drop the most recent registration after the client refused the request
    pub fn forget_last(&self) {
        self.lock().awaiting_send.pop_back();
    }

    /// The event loop wrote a publish with packet id `pkid`
    pub fn sent(&self, pkid: u16) {
        let mut state = self.lock();

        // Nobody waits on these any more; their ids are free for reuse
        state.in_flight.retain(|_, tx| !tx.is_closed());

        // Replays after a reconnect keep their packet id
        if state.in_flight.contains_key(&pkid) {
            debug!(pkid, "replayed publish");
            return;
        }

        match state.awaiting_send.pop_front() {
            Some((QoS::AtMostOnce, tx)) => {
                let _ = tx.send(Ok(()));
            }
            Some((QoS::AtLeastOnce, tx)) => {
                state.in_flight.insert(pkid, tx);
            }
            None => debug!(pkid, "untracked publish"),
        }
    }

    /// The broker acknowledged packet id `pkid`
    pub fn acknowledged(&self, pkid: u16) {
        if let Some(tx) = self.lock().in_flight.remove(&pkid) {
            let _ = tx.send(Ok(()));
        }
    }

    /// Number of publishes still waiting for the wire or for a PUBACK
    pub fn outstanding(&self) -> usize {
        let state = self.lock();
        state.awaiting_send.len() + state.in_flight.len()
    }
}

/// Outbound handle on the broker connection
pub struct MqttTransport {
    client: AsyncClient,
    tracker: Arc<AckTracker>,
    /// Serialises registration + enqueue so the tracker FIFO matches the client's
    publish_order: tokio::sync::Mutex<()>,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, tracker: Arc<AckTracker>) -> Self {
        Self {
            client,
            tracker,
            publish_order: tokio::sync::Mutex::new(()),
        }
    }

    /// Ask the event loop to send DISCONNECT and stop
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<Delivery, TransportError> {
        let _order = self.publish_order.lock().await;

        let delivery = self.tracker.expect(qos);
        if let Err(e) = self
            .client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
        {
            self.tracker.forget_last();
            return Err(TransportError::Publish(e.to_string()));
        }

        Ok(delivery)
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError> {
        if message.qos == QoS::AtMostOnce {
            return Ok(());
        }

        let mut publish = Publish::new(message.topic.as_str(), message.qos.into(), Vec::new());
        publish.pkid = message.pkid;

        self.client
            .ack(&publish)
            .await
            .map_err(|e| TransportError::Ack(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_ack_resolves_matching_delivery() {
        let tracker = AckTracker::new();
        let first = tracker.expect(QoS::AtLeastOnce);
        let second = tracker.expect(QoS::AtLeastOnce);

        tracker.sent(7);
        tracker.sent(8);
        assert_eq!(tracker.outstanding(), 2);

        tracker.acknowledged(8);
        assert_eq!(second.wait(WAIT).await, Ok(()));
        assert_eq!(first.wait(WAIT).await, Err(TransportError::Timeout(WAIT)));
        assert_eq!(tracker.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_qos0_resolves_when_sent() {
        let tracker = AckTracker::new();
        let delivery = tracker.expect(QoS::AtMostOnce);
        tracker.sent(0);
        assert_eq!(delivery.wait(WAIT).await, Ok(()));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_replayed_publish_keeps_queue_in_step() {
        let tracker = AckTracker::new();
        let first = tracker.expect(QoS::AtLeastOnce);
        tracker.sent(1);

        let second = tracker.expect(QoS::AtLeastOnce);
        // reconnect replays packet 1 before the new request goes out
        tracker.sent(1);
        tracker.sent(2);

        tracker.acknowledged(1);
        tracker.acknowledged(2);
        assert_eq!(first.wait(WAIT).await, Ok(()));
        assert_eq!(second.wait(WAIT).await, Ok(()));
    }

    #[tokio::test]
    async fn test_pkid_reused_after_lost_ack() {
        let tracker = AckTracker::new();
        let lost = tracker.expect(QoS::AtLeastOnce);
        tracker.sent(1);
        assert_eq!(lost.wait(WAIT).await, Err(TransportError::Timeout(WAIT)));

        let fresh = tracker.expect(QoS::AtLeastOnce);
        tracker.sent(1);
        tracker.acknowledged(1);

        assert_eq!(fresh.wait(WAIT).await, Ok(()));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_forget_last_drops_refused_request() {
        let tracker = AckTracker::new();
        let kept = tracker.expect(QoS::AtLeastOnce);
        let refused = tracker.expect(QoS::AtLeastOnce);
        tracker.forget_last();

        tracker.sent(3);
        tracker.acknowledged(3);
        assert_eq!(kept.wait(WAIT).await, Ok(()));
        assert_eq!(refused.wait(WAIT).await, Err(TransportError::Abandoned));
    }

    #[test]
    fn test_unknown_ack_is_ignored() {
        let tracker = AckTracker::new();
        tracker.sent(4);
        tracker.acknowledged(99);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_inbound_message_from_publish() {
        let mut publish = Publish::new("$aws/things/t/jobs/notify", rumqttc::QoS::AtLeastOnce, "{}");
        publish.pkid = 12;

        let message = InboundMessage::from(publish);
        assert_eq!(message.topic, "$aws/things/t/jobs/notify");
        assert_eq!(&message.payload[..], b"{}");
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert_eq!(message.pkid, 12);
    }
}
