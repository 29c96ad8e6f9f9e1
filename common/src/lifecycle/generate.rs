// Proposal-driven placement of pending sections
//
// Three phases. The context is read under the schedule lock, which is then
// released for the reasoning call. Each returned proposal is validated and
// committed in its own transaction against the then-current schedule, so one
// bad proposal never blocks the others.

use super::{
    commit_change, course_map, ensure_editable, lock_owned, GenerateOutcome, ScheduleService,
    SkippedPlacement,
};
use crate::errors::{ReasoningError, ScheduleError};
use crate::history::Attribution;
use crate::models::{Caller, Course, CourseKind, ScheduleStatus, Slot};
use crate::reasoning::{build_brief, OccupiedSlot, PendingSection, RawPlacement};
use crate::telemetry;
use crate::timetable::pattern::{required_pattern, Progress};
use crate::timetable::validator::{PlacementContext, Rejection, SectionTarget};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

enum ProposalOutcome {
    Placed,
    Skipped(String),
}

impl ScheduleService {
    /// Ask the reasoning service for placements of every pending section and
    /// commit the ones that survive validation
    ///
    /// Reasoning failures degrade to zero placements with a message. The
    /// schedule ends up `generated` either way.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn generate(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
    ) -> Result<GenerateOutcome, ScheduleError> {
        let (level, group_no, occupied, pending) = {
            let mut tx = self.store.begin().await?;
            let schedule = lock_owned(tx.as_mut(), caller, schedule_id).await?;
            ensure_editable(&schedule)?;

            let slots = tx.list_slots(schedule.id).await?;
            let sections = tx.list_sections(schedule.id).await?;
            let course_ids: Vec<Uuid> = slots
                .iter()
                .map(|s| s.course_id)
                .chain(sections.iter().map(|s| s.course_id))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let courses = course_map(tx.list_courses(&course_ids).await?);
            tx.commit().await?;

            let occupied: Vec<OccupiedSlot> = slots
                .iter()
                .map(|slot| OccupiedSlot {
                    slot_id: slot.id,
                    course_code: courses
                        .get(&slot.course_id)
                        .map_or_else(|| slot.course_id.to_string(), |c| c.code.clone()),
                    day: slot.day,
                    start: slot.start,
                    end: slot.end,
                })
                .collect();
            // Only internal sections that can still complete a pattern option
            let pending: Vec<PendingSection> = sections
                .iter()
                .filter_map(|section| {
                    let course = courses
                        .get(&section.course_id)
                        .filter(|c| c.kind() == CourseKind::Internal)?;
                    let pattern = required_pattern(course, &self.catalog);
                    let target = SectionTarget::new(section, course.kind(), &pattern, &slots);
                    if !matches!(target.progress(), Progress::Open { .. }) {
                        return None;
                    }
                    let placed = target.placed;
                    Some(PendingSection {
                        section_id: section.id,
                        course_code: course.code.clone(),
                        course_name: course.name.clone(),
                        section_number: section.section_number,
                        kind: course.kind(),
                        requirement: pattern.describe(),
                        pattern,
                        placed,
                    })
                })
                .collect();
            (schedule.level, schedule.group_no, occupied, pending)
        };

        let (proposals, mut message) = if pending.is_empty() {
            (Vec::new(), Some("No sections awaiting placement".to_string()))
        } else {
            let brief = build_brief(level, group_no, &occupied, &pending);
            match self.request_proposals(&brief, &occupied, &pending).await {
                Ok(proposals) => (proposals, None),
                Err(e) => {
                    warn!(schedule_id = %schedule_id, error = %e, "Reasoning service failed, placing nothing");
                    telemetry::record_reasoning_failure(e.kind());
                    (Vec::new(), Some(ScheduleError::from(e).to_string()))
                }
            }
        };

        let mut placed = 0;
        let mut skipped = Vec::new();
        for raw in &proposals {
            match self.apply_proposal(caller, schedule_id, raw).await? {
                ProposalOutcome::Placed => placed += 1,
                ProposalOutcome::Skipped(reason) => {
                    telemetry::record_placement_skipped(&reason);
                    skipped.push(SkippedPlacement {
                        section_id: raw.section_id.clone(),
                        day: raw.day.clone(),
                        start: raw.start.clone(),
                        end: raw.end.clone(),
                        reason,
                    });
                }
            }
        }

        let mut tx = self.store.begin().await?;
        let mut schedule = lock_owned(tx.as_mut(), caller, schedule_id).await?;
        if schedule.status.is_editable() {
            schedule.status = ScheduleStatus::Generated;
            let summary = format!(
                "Generated schedule: {} placed, {} skipped",
                placed,
                skipped.len()
            );
            commit_change(
                tx.as_mut(),
                &mut schedule,
                &summary,
                &Attribution::actor(&caller.user_id),
            )
            .await?;
            tx.commit().await?;
        } else {
            message.get_or_insert_with(|| format!("Schedule became {} during generation", schedule.status));
        }

        info!(
            schedule_id = %schedule_id,
            proposed = proposals.len(),
            placed = placed,
            skipped = skipped.len(),
            "Generation finished"
        );
        Ok(GenerateOutcome {
            schedule_id,
            placed,
            skipped,
            message,
            status: schedule.status,
        })
    }

    async fn request_proposals(
        &self,
        brief: &str,
        occupied: &[OccupiedSlot],
        pending: &[PendingSection],
    ) -> Result<Vec<RawPlacement>, ReasoningError> {
        tokio::time::timeout(
            self.reasoning_timeout,
            self.reasoning.propose(brief, occupied, pending),
        )
        .await
        .unwrap_or_else(|_| Err(ReasoningError::Timeout(self.reasoning_timeout.as_secs())))
    }

    /// Validate one proposal against the current schedule and commit it
    ///
    /// Request-local failures become a skip reason; only persistence failures
    /// abort the run.
    async fn apply_proposal(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        raw: &RawPlacement,
    ) -> Result<ProposalOutcome, ScheduleError> {
        match self.place_proposal(caller, schedule_id, raw).await {
            Ok(()) => Ok(ProposalOutcome::Placed),
            Err(ScheduleError::Internal(detail)) => Err(ScheduleError::Internal(detail)),
            Err(e) => Ok(ProposalOutcome::Skipped(e.to_string())),
        }
    }

    async fn place_proposal(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
        raw: &RawPlacement,
    ) -> Result<(), ScheduleError> {
        let section_id = raw
            .section_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok());

        let mut tx = self.store.begin().await?;
        let mut schedule = lock_owned(tx.as_mut(), caller, schedule_id).await?;
        ensure_editable(&schedule)?;

        let section = match section_id {
            Some(id) => tx.find_section(id).await?,
            None => None,
        };
        let course: Option<Course> = match &section {
            Some(section) => tx.list_courses(&[section.course_id]).await?.into_iter().next(),
            None => None,
        };
        // Hand-entered external sections are never generated
        let course = course.filter(|c| c.kind() == CourseKind::Internal);
        let pattern = course.as_ref().map(|c| required_pattern(c, &self.catalog));

        let slots = tx.list_slots(schedule.id).await?;
        let rules = Self::compiled_rules(tx.as_mut()).await?;
        let ctx = PlacementContext {
            schedule_id: schedule.id,
            level: schedule.level,
            rules: &rules,
            slots: &slots,
        };
        let target = match (&section, &course, &pattern) {
            (Some(section), Some(course), Some(pattern)) => {
                Some(SectionTarget::new(section, course.kind(), pattern, &slots))
            }
            _ => None,
        };
        let placement = ctx.validate_section_placement(
            target.as_ref(),
            raw.day.as_deref().unwrap_or_default(),
            raw.start.as_deref().unwrap_or_default(),
            raw.end.as_deref().unwrap_or_default(),
        )?;
        let (Some(section), Some(course)) = (section, course) else {
            return Err(Rejection::SectionUnavailable.into());
        };

        let slot = Slot {
            id: Uuid::new_v4(),
            schedule_id: schedule.id,
            course_id: course.id,
            section_id: Some(section.id),
            day: placement.day,
            start: placement.range.start,
            end: placement.range.end,
        };
        tx.insert_slot(&slot).await?;

        let summary = format!(
            "Placed {} section {} on {} {}",
            course.code, section.section_number, placement.day, placement.range
        );
        commit_change(
            tx.as_mut(),
            &mut schedule,
            &summary,
            &Attribution::actor(&caller.user_id),
        )
        .await?;
        tx.commit().await?;

        telemetry::record_slot_committed("generated");
        Ok(())
    }
}
