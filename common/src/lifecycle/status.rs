// Status transitions: share, approve, finalize, archive

use super::{commit_change, lock_owned, ScheduleService, TransitionOutcome};
use crate::errors::ScheduleError;
use crate::events::ScheduleEvent;
use crate::history::Attribution;
use crate::models::{Caller, Schedule, ScheduleStatus};
use crate::telemetry;
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl ScheduleService {
    #[instrument(skip(self, note), fields(user_id = %caller.user_id))]
    pub async fn share(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ScheduleError> {
        self.transition(
            caller,
            schedule_id,
            note,
            &[ScheduleStatus::Draft, ScheduleStatus::Generated],
            ScheduleStatus::Shared,
            "Schedule shared",
        )
        .await
        .map(|(outcome, _)| outcome)
    }

    #[instrument(skip(self, note), fields(user_id = %caller.user_id))]
    pub async fn approve(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ScheduleError> {
        self.transition(
            caller,
            schedule_id,
            note,
            &[ScheduleStatus::Shared],
            ScheduleStatus::Approved,
            "Schedule approved",
        )
        .await
        .map(|(outcome, _)| outcome)
    }

    /// approved → finalized; a no-op when already finalized
    ///
    /// Publishes a `Finalized` event after the commit. Publishing failures are
    /// logged and do not undo the transition.
    #[instrument(skip(self, note), fields(user_id = %caller.user_id))]
    pub async fn finalize(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ScheduleError> {
        let (outcome, schedule) = self
            .transition(
                caller,
                schedule_id,
                note,
                &[ScheduleStatus::Approved],
                ScheduleStatus::Finalized,
                "Schedule finalized",
            )
            .await?;

        if outcome.version.is_some() {
            telemetry::record_schedule_finalized(schedule.level);
            let event = ScheduleEvent::Finalized {
                schedule_id: schedule.id,
                level: schedule.level,
                group_no: schedule.group_no,
            };
            if let Err(e) = self.events.publish(event).await {
                warn!(schedule_id = %schedule.id, error = %e, "Failed to publish finalized event");
            }
        }
        Ok(outcome)
    }

    /// Any non-finalized state → archived; a no-op when already archived
    #[instrument(skip(self, note), fields(user_id = %caller.user_id))]
    pub async fn archive(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ScheduleError> {
        self.transition(
            caller,
            schedule_id,
            note,
            &[
                ScheduleStatus::Draft,
                ScheduleStatus::Generated,
                ScheduleStatus::Shared,
                ScheduleStatus::Approved,
            ],
            ScheduleStatus::Archived,
            "Schedule archived",
        )
        .await
        .map(|(outcome, _)| outcome)
    }

    async fn transition(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        note: Option<String>,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
        summary: &str,
    ) -> Result<(TransitionOutcome, Schedule), ScheduleError> {
        let mut tx = self.store.begin().await?;
        let mut schedule = lock_owned(tx.as_mut(), caller, schedule_id).await?;

        if schedule.status == to {
            tx.commit().await?;
            let outcome = TransitionOutcome {
                schedule_id,
                status: to,
                version: None,
            };
            return Ok((outcome, schedule));
        }

        if !from.contains(&schedule.status) {
            let expected = from
                .iter()
                .map(|s| format!("'{}'", s))
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(ScheduleError::State(format!(
                "Cannot move schedule to '{}': status is '{}', expected {}",
                to, schedule.status, expected
            )));
        }

        let previous = schedule.status;
        schedule.status = to;
        let attribution = Attribution::actor(&caller.user_id).with_note(note);
        let entry = commit_change(tx.as_mut(), &mut schedule, summary, &attribution).await?;
        tx.commit().await?;

        info!(
            schedule_id = %schedule_id,
            from = %previous,
            to = %to,
            version = entry.version,
            "Schedule status changed"
        );
        let outcome = TransitionOutcome {
            schedule_id,
            status: to,
            version: Some(entry.version),
        };
        Ok((outcome, schedule))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{caller, service};
    use crate::db::InMemoryStore;
    use crate::models::{HistoryFilter, ScheduleStatus};

    #[tokio::test]
    async fn test_full_path_to_finalized() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(uuid::Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        service.share(&caller, id, None).await.unwrap();
        service
            .approve(&caller, id, Some("Reviewed by committee".to_string()))
            .await
            .unwrap();
        let finalized = service.finalize(&caller, id, None).await.unwrap();
        assert_eq!(finalized.status, ScheduleStatus::Finalized);
        assert_eq!(finalized.version, Some(4));
    }

    #[tokio::test]
    async fn test_finalize_requires_approved_and_echoes_status() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(uuid::Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let err = service.finalize(&caller, id, None).await.unwrap_err();
        assert_eq!(err.code(), "state_error");
        assert!(err.to_string().contains("'draft'"));
    }

    #[tokio::test]
    async fn test_second_finalize_is_a_no_op() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(uuid::Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;
        service.share(&caller, id, None).await.unwrap();
        service.approve(&caller, id, None).await.unwrap();
        service.finalize(&caller, id, None).await.unwrap();

        let again = service.finalize(&caller, id, None).await.unwrap();
        assert_eq!(again.version, None);

        let page = service
            .list_history(
                &caller,
                HistoryFilter {
                    schedule_id: Some(id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 4);
    }

    #[tokio::test]
    async fn test_archive_rules() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(uuid::Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let archived = service.archive(&caller, id, None).await.unwrap();
        assert_eq!(archived.status, ScheduleStatus::Archived);
        assert!(service.archive(&caller, id, None).await.unwrap().version.is_none());
        assert!(service.list_schedules(&caller).await.unwrap().is_empty());

        let err = service.share(&caller, id, None).await.unwrap_err();
        assert_eq!(err.code(), "state_error");
    }

    #[tokio::test]
    async fn test_finalized_schedule_cannot_be_archived() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(uuid::Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;
        service.share(&caller, id, None).await.unwrap();
        service.approve(&caller, id, None).await.unwrap();
        service.finalize(&caller, id, None).await.unwrap();

        let err = service.archive(&caller, id, None).await.unwrap_err();
        assert_eq!(err.code(), "state_error");
    }
}
