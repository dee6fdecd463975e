use std::collections::{HashMap, VecDeque};

use tokio::sync::{broadcast, RwLock};
use wf_types::ServerEventEnvelope;

struct PlanChannel {
    tx: broadcast::Sender<ServerEventEnvelope>,
    backlog: VecDeque<ServerEventEnvelope>,
}

/// C7/C8 live half: one broadcast channel per `plan_id`, with a bounded
/// backlog ring buffer so a subscriber joining mid-run gets recent history
/// before switching to live push. Adapted from the teacher's `StreamHub`
/// (`broadcast::Sender` plus health state), narrowed from one global channel
/// to one channel per plan.
pub struct FanoutHub {
    channels: RwLock<HashMap<String, PlanChannel>>,
    backlog_len: usize,
    /// Broadcast channel capacity. A subscriber that falls this far behind
    /// is disconnected rather than allowed to skip ahead (spec.md §6.2
    /// "high-water-mark slow-subscriber disconnect").
    high_water_mark: usize,
}

impl FanoutHub {
    pub fn new(backlog_len: usize, high_water_mark: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            backlog_len: backlog_len.max(1),
            high_water_mark: high_water_mark.max(1),
        }
    }

    async fn channel_for(&self, plan_id: &str) -> broadcast::Sender<ServerEventEnvelope> {
        if let Some(channel) = self.channels.read().await.get(plan_id) {
            return channel.tx.clone();
        }
        let mut channels = self.channels.write().await;
        let channel = channels.entry(plan_id.to_string()).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(self.high_water_mark);
            PlanChannel {
                tx,
                backlog: VecDeque::with_capacity(self.backlog_len),
            }
        });
        channel.tx.clone()
    }

    /// Publishes an event: appends it to the plan's backlog and fans it out
    /// to any live subscribers. A send with no subscribers is not an error.
    pub async fn publish(&self, plan_id: &str, event: ServerEventEnvelope) {
        let tx = self.channel_for(plan_id).await;
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(plan_id) {
            if channel.backlog.len() >= self.backlog_len {
                channel.backlog.pop_front();
            }
            channel.backlog.push_back(event.clone());
        }
        drop(channels);
        let _ = tx.send(event);
    }

    /// Returns the replay backlog plus a live receiver. Callers should drain
    /// the backlog before awaiting the receiver to avoid gaps or duplicates
    /// at the seam (the receiver is created before the backlog snapshot is
    /// read, so at worst an event is delivered twice, never dropped).
    pub async fn subscribe(
        &self,
        plan_id: &str,
    ) -> (Vec<ServerEventEnvelope>, broadcast::Receiver<ServerEventEnvelope>) {
        let tx = self.channel_for(plan_id).await;
        let rx = tx.subscribe();
        let backlog = self
            .channels
            .read()
            .await
            .get(plan_id)
            .map(|c| c.backlog.iter().cloned().collect())
            .unwrap_or_default();
        (backlog, rx)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub async fn remove_plan(&self, plan_id: &str) {
        self.channels.write().await.remove(plan_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_types::ServerEventData;

    #[tokio::test]
    async fn late_subscriber_receives_backlog_then_live_events() {
        let hub = FanoutHub::new(10, 10);
        hub.publish("p1", ServerEventEnvelope::new(ServerEventData::Pong))
            .await;

        let (backlog, mut rx) = hub.subscribe("p1").await;
        assert_eq!(backlog.len(), 1);

        hub.publish(
            "p1",
            ServerEventEnvelope::new(ServerEventData::AgentStreamStart {
                agent_name: "invoice".into(),
            }),
        )
        .await;
        let live = rx.recv().await.unwrap();
        assert_eq!(live.kind, "agent_stream_start");
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let hub = FanoutHub::new(2, 10);
        for _ in 0..5 {
            hub.publish("p1", ServerEventEnvelope::new(ServerEventData::Pong)).await;
        }
        let (backlog, _rx) = hub.subscribe("p1").await;
        assert_eq!(backlog.len(), 2);
    }

    #[tokio::test]
    async fn plans_have_isolated_channels() {
        let hub = FanoutHub::new(10, 10);
        hub.publish("p1", ServerEventEnvelope::new(ServerEventData::Pong)).await;
        let (backlog_p2, _rx) = hub.subscribe("p2").await;
        assert!(backlog_p2.is_empty());
    }
}
