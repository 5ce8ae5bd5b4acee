use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::day::{CalendarDay, DayNormalizer};
use crate::error::{ReconcileError, StoreError};
use crate::link::{apply_link, ApplyMode, LinkOutcome};
use crate::model::{CollectionId, RecordId, Schema, SourceRecord};
use crate::resolve::{resolve_target, Resolution};
use crate::select::select_candidates;
use crate::store::RemoteStore;

pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Link to the first matching target and warn.
    Link,
    /// Leave the source unlinked until the duplicate days are cleaned up.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub source: CollectionId,
    pub target: CollectionId,
    pub schema: Schema,
    pub window: Duration,
    pub normalizer: DayNormalizer,
    pub on_ambiguous: AmbiguityPolicy,
    pub dry_run: bool,
}

impl ReconcileConfig {
    #[must_use]
    pub fn new(source: CollectionId, target: CollectionId) -> Self {
        Self {
            source,
            target,
            schema: Schema::default(),
            window: Duration::hours(DEFAULT_WINDOW_HOURS),
            normalizer: DayNormalizer::utc(),
            on_ambiguous: AmbiguityPolicy::Link,
            dry_run: false,
        }
    }

    fn apply_mode(&self) -> ApplyMode {
        if self.dry_run {
            ApplyMode::DryRun
        } else {
            ApplyMode::Write
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Linked,
    WouldLink,
    SkippedMissingDate,
    SkippedNoTarget,
    SkippedAlreadyLinked,
    SkippedAmbiguousTarget,
    SkippedError,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::WouldLink => "would-link",
            Self::SkippedMissingDate => "skipped-missing-date",
            Self::SkippedNoTarget => "skipped-no-target",
            Self::SkippedAlreadyLinked => "skipped-already-linked",
            Self::SkippedAmbiguousTarget => "skipped-ambiguous-target",
            Self::SkippedError => "skipped-error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ItemReport {
    pub source_id: RecordId,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<CalendarDay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemReport {
    fn new(source_id: &RecordId, outcome: Outcome) -> Self {
        Self { source_id: source_id.clone(), outcome, day: None, target_id: None, detail: None }
    }

    fn with_day(mut self, day: CalendarDay) -> Self {
        self.day = Some(day);
        self
    }

    fn with_target(mut self, target_id: &RecordId) -> Self {
        self.target_id = Some(target_id.clone());
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct OutcomeCounts {
    pub linked: usize,
    pub would_link: usize,
    pub skipped_missing_date: usize,
    pub skipped_no_target: usize,
    pub skipped_already_linked: usize,
    pub skipped_ambiguous_target: usize,
    pub skipped_error: usize,
    /// Days that resolved to more than one target, whatever the policy did with them.
    pub ambiguous_targets: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Linked => &mut self.linked,
            Outcome::WouldLink => &mut self.would_link,
            Outcome::SkippedMissingDate => &mut self.skipped_missing_date,
            Outcome::SkippedNoTarget => &mut self.skipped_no_target,
            Outcome::SkippedAlreadyLinked => &mut self.skipped_already_linked,
            Outcome::SkippedAmbiguousTarget => &mut self.skipped_ambiguous_target,
            Outcome::SkippedError => &mut self.skipped_error,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    pub dry_run: bool,
    pub candidates: usize,
    pub counts: OutcomeCounts,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    fn new(config: &ReconcileConfig, now: OffsetDateTime, candidates: usize) -> Self {
        Self {
            started_at: now,
            window_start: now - config.window,
            dry_run: config.dry_run,
            candidates,
            counts: OutcomeCounts::default(),
            items: Vec::with_capacity(candidates),
        }
    }

    fn push(&mut self, item: ItemReport) {
        self.counts.record(item.outcome);
        self.items.push(item);
    }

    #[must_use]
    pub fn outcome_for(&self, source_id: &RecordId) -> Option<Outcome> {
        self.items.iter().find(|item| &item.source_id == source_id).map(|item| item.outcome)
    }
}

/// Run one reconciliation pass: select candidates, then link each one in turn.
///
/// Per-item store failures become [`Outcome::SkippedError`]. Links written before a
/// fatal error are kept.
///
/// # Errors
/// Returns [`ReconcileError::Selection`] when candidates cannot be listed, and
/// [`ReconcileError::Aborted`] when a store error marked fatal occurs mid-run.
pub fn reconcile<S>(
    store: &S,
    config: &ReconcileConfig,
    now: OffsetDateTime,
) -> Result<RunReport, ReconcileError>
where
    S: RemoteStore + ?Sized,
{
    tracing::info!(
        source = %config.source,
        target = %config.target,
        window_start = %(now - config.window),
        dry_run = config.dry_run,
        "selecting unlinked source records"
    );
    let candidates =
        select_candidates(store, &config.source, &config.schema, config.window, now)
            .map_err(ReconcileError::Selection)?;

    let mut report = RunReport::new(config, now, candidates.len());
    if candidates.is_empty() {
        tracing::info!("no unlinked source records in window");
        return Ok(report);
    }

    for candidate in &candidates {
        let item = match reconcile_one(store, config, candidate, &mut report.counts) {
            Ok(item) => item,
            Err(error) if error.is_fatal() => {
                tracing::error!(source_id = %candidate.id, error = %error, "aborting run");
                return Err(ReconcileError::Aborted { source_id: candidate.id.clone(), error });
            }
            Err(error) => ItemReport::new(&candidate.id, Outcome::SkippedError)
                .with_detail(error.to_string()),
        };
        log_item(&item);
        report.push(item);
    }

    let counts = &report.counts;
    tracing::info!(
        candidates = report.candidates,
        linked = counts.linked,
        would_link = counts.would_link,
        already_linked = counts.skipped_already_linked,
        missing_date = counts.skipped_missing_date,
        no_target = counts.skipped_no_target,
        ambiguous = counts.ambiguous_targets,
        errors = counts.skipped_error,
        "reconciliation finished"
    );
    Ok(report)
}

fn reconcile_one<S>(
    store: &S,
    config: &ReconcileConfig,
    candidate: &SourceRecord,
    counts: &mut OutcomeCounts,
) -> Result<ItemReport, StoreError>
where
    S: RemoteStore + ?Sized,
{
    if candidate.linked {
        return Ok(ItemReport::new(&candidate.id, Outcome::SkippedAlreadyLinked)
            .with_detail("source already references a target"));
    }

    let Some(raw_date) = candidate.accounting_date.as_deref() else {
        return Ok(ItemReport::new(&candidate.id, Outcome::SkippedMissingDate));
    };

    let day = match config.normalizer.normalize(raw_date) {
        Ok(day) => day,
        Err(err) => {
            return Ok(
                ItemReport::new(&candidate.id, Outcome::SkippedError).with_detail(err.to_string())
            )
        }
    };

    let target =
        match resolve_target(store, &config.target, &config.schema, &config.normalizer, day)? {
            Resolution::NotFound => {
                return Ok(ItemReport::new(&candidate.id, Outcome::SkippedNoTarget).with_day(day))
            }
            Resolution::Unique(target) => target,
            Resolution::Ambiguous { chosen, candidates } => {
                counts.ambiguous_targets += 1;
                tracing::warn!(
                    source_id = %candidate.id,
                    %day,
                    candidates,
                    chosen = %chosen.id,
                    "more than one target record for day"
                );
                if config.on_ambiguous == AmbiguityPolicy::Skip {
                    return Ok(ItemReport::new(&candidate.id, Outcome::SkippedAmbiguousTarget)
                        .with_day(day)
                        .with_detail(format!("{candidates} target records share this day")));
                }
                chosen
            }
        };

    let outcome = match apply_link(
        store,
        &config.schema,
        &target.id,
        &candidate.id,
        config.apply_mode(),
    )? {
        LinkOutcome::Linked => Outcome::Linked,
        LinkOutcome::AlreadyLinked => Outcome::SkippedAlreadyLinked,
        LinkOutcome::WouldLink => Outcome::WouldLink,
    };
    Ok(ItemReport::new(&candidate.id, outcome).with_day(day).with_target(&target.id))
}

fn log_item(item: &ItemReport) {
    let source_id = &item.source_id;
    let outcome = item.outcome.as_str();
    let day = item.day.map(|day| day.to_string()).unwrap_or_default();
    let target_id = item.target_id.as_ref().map(ToString::to_string).unwrap_or_default();
    let detail = item.detail.as_deref().unwrap_or_default();

    match item.outcome {
        Outcome::Linked | Outcome::WouldLink | Outcome::SkippedAlreadyLinked => {
            tracing::info!(%source_id, outcome, %day, %target_id, detail, "source processed");
        }
        Outcome::SkippedMissingDate | Outcome::SkippedNoTarget | Outcome::SkippedAmbiguousTarget => {
            tracing::warn!(%source_id, outcome, %day, detail, "source skipped");
        }
        Outcome::SkippedError => {
            tracing::error!(%source_id, outcome, %day, detail, "source failed");
        }
    }
}
