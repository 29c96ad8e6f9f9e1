// Cross-boundary schedule notifications

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    Finalized {
        schedule_id: Uuid,
        level: Option<i32>,
        group_no: i32,
    },
}

/// Delivery of schedule events to whoever consumes them
///
/// Failures are logged by the caller and never undo the transition that
/// produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ScheduleEvent) -> Result<()>;
}

/// Default publisher: writes each event to the log
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    #[tracing::instrument(skip(self))]
    async fn publish(&self, event: ScheduleEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        tracing::info!(event = %payload, "Schedule event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalized_event_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ScheduleEvent::Finalized {
            schedule_id: id,
            level: Some(5),
            group_no: 2,
        })
        .unwrap();
        assert_eq!(json["type"], "finalized");
        assert_eq!(json["schedule_id"], id.to_string());
        assert_eq!(json["group_no"], 2);
    }

    #[tokio::test]
    async fn test_tracing_publisher_accepts_events() {
        let result = TracingPublisher
            .publish(ScheduleEvent::Finalized {
                schedule_id: Uuid::new_v4(),
                level: None,
                group_no: 1,
            })
            .await;
        assert!(result.is_ok());
    }
}
