//! `MedicationTracker`: the service facade.
//!
//! Owns the database handle, clock, identity provider and config. Session
//! operations resolve the owner at call time; a missing owner fails with a
//! retryable ownership error before anything is written. Reminder triggers
//! and other background work arrive as [`TrackerCommand`] messages and take
//! the same path whichever thread sends them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adherence::{self, DayAdherenceSummary, DayDetail, MonthGrid};
use crate::alarms::{self, Reminder, ReminderSink, SlotTrigger};
use crate::catalog::{self, DeleteOutcome};
use crate::clock::Clock;
use crate::config::{TrackerConfig, MAX_EXPAND_DAYS};
use crate::db::Database;
use crate::error::AdherenceError;
use crate::expansion::{self, ExpansionReport, TodayView};
use crate::identity::{resolve_owner, IdentityProvider};
use crate::ledger::{self, DayStats, MarkOutcome, ReconcileOutcome};
use crate::models::enums::{DayStatus, MedicationStatus, SlotKey};
use crate::models::*;
use crate::slots;
use crate::sync::{self, SyncOutcome, SyncRecord, INTAKE_STREAM};

pub struct MedicationTracker {
    db: Database,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityProvider>,
    config: TrackerConfig,
}

impl MedicationTracker {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityProvider>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            db,
            clock,
            identity,
            config,
        }
    }

    /// Open a file-backed ledger at `path`.
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityProvider>,
        config: TrackerConfig,
    ) -> Result<Self, AdherenceError> {
        Ok(Self::new(Database::open(path)?, clock, identity, config))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn owner(&self) -> Result<OwnerId, AdherenceError> {
        resolve_owner(self.identity.as_ref())
    }

    // ═══════════════════════════════════════════
    // Catalog
    // ═══════════════════════════════════════════

    pub fn create_medication(&self, input: &MedicationInput) -> Result<MedicationDefinition, AdherenceError> {
        catalog::create_medication(&*self.db.connect()?, input, self.clock.now())
    }

    pub fn save_medication(&self, input: &MedicationInput) -> Result<MedicationDefinition, AdherenceError> {
        catalog::save_medication(&*self.db.connect()?, input, self.clock.now())
    }

    pub fn update_medication(
        &self,
        id: &Uuid,
        input: &MedicationInput,
    ) -> Result<MedicationDefinition, AdherenceError> {
        catalog::update_medication(&*self.db.connect()?, id, input, self.clock.now())
    }

    pub fn list_medications(
        &self,
        status: Option<MedicationStatus>,
    ) -> Result<Vec<MedicationDefinition>, AdherenceError> {
        let owner = self.owner()?;
        catalog::list_medications(&*self.db.connect()?, &owner, status)
    }

    pub fn search_medications(&self, fragment: &str) -> Result<Vec<MedicationDefinition>, AdherenceError> {
        let owner = self.owner()?;
        catalog::search_medications(&*self.db.connect()?, &owner, fragment)
    }

    pub fn set_medication_status(&self, name: &str, status: MedicationStatus) -> Result<bool, AdherenceError> {
        let owner = self.owner()?;
        catalog::set_status(&*self.db.connect()?, &owner, name, status, self.clock.now())
    }

    pub fn deactivate_medication(&self, name: &str) -> Result<bool, AdherenceError> {
        let owner = self.owner()?;
        catalog::deactivate(&*self.db.connect()?, &owner, name, self.clock.now())
    }

    pub fn delete_medication(&self, name: &str) -> Result<DeleteOutcome, AdherenceError> {
        let owner = self.owner()?;
        catalog::delete_with_history(&*self.db.connect()?, &owner, name)
    }

    // ═══════════════════════════════════════════
    // Slot times
    // ═══════════════════════════════════════════

    pub fn set_slot_time(&self, key: SlotKey, hour: u32, minute: u32) -> Result<SlotTime, AdherenceError> {
        let owner = self.owner()?;
        slots::set_slot_time(&*self.db.connect()?, &owner, key, hour, minute, self.clock.now())
    }

    pub fn set_slot_text(&self, key: SlotKey, text: &str) -> Result<Option<SlotTime>, AdherenceError> {
        let owner = self.owner()?;
        slots::set_slot_text(&*self.db.connect()?, &owner, key, text, self.clock.now())
    }

    pub fn apply_slot_settings(&self, settings: &[SlotSetting]) -> Result<SlotSchedule, AdherenceError> {
        let owner = self.owner()?;
        slots::apply_slot_settings(&*self.db.connect()?, &owner, settings, self.clock.now())
    }

    pub fn slot_schedule(&self) -> Result<SlotSchedule, AdherenceError> {
        let owner = self.owner()?;
        slots::load_schedule(&*self.db.connect()?, &owner)
    }

    // ═══════════════════════════════════════════
    // Ledger
    // ═══════════════════════════════════════════

    /// Check-in. `actual_at` defaults to now. Failures surface to the caller.
    pub fn mark_taken(
        &self,
        medication_name: &str,
        planned_at: DateTime<Utc>,
        actual_at: Option<DateTime<Utc>>,
        dosage: Option<&str>,
    ) -> Result<MarkOutcome, AdherenceError> {
        let owner = self.owner()?;
        let now = self.clock.now();
        ledger::mark_taken(
            &*self.db.connect()?,
            &owner,
            medication_name,
            planned_at,
            actual_at.unwrap_or(now),
            dosage,
            now,
        )
    }

    pub fn mark_untaken(&self, medication_name: &str, planned_at: DateTime<Utc>) -> Result<bool, AdherenceError> {
        let owner = self.owner()?;
        ledger::mark_untaken(&*self.db.connect()?, &owner, medication_name, planned_at, self.clock.now())
    }

    pub fn find_for_day(&self, day: NaiveDate) -> Result<Vec<IntakeInstance>, AdherenceError> {
        let owner = self.owner()?;
        ledger::find_for_day(&*self.db.connect()?, self.clock.as_ref(), &owner, day)
    }

    pub fn find_for_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntakeInstance>, AdherenceError> {
        let owner = self.owner()?;
        ledger::find_for_range(&*self.db.connect()?, &owner, start, end)
    }

    pub fn find_recent(&self, days: u32) -> Result<Vec<IntakeInstance>, AdherenceError> {
        let owner = self.owner()?;
        ledger::find_recent(&*self.db.connect()?, self.clock.as_ref(), &owner, days)
    }

    pub fn day_stats(&self, day: NaiveDate) -> Result<DayStats, AdherenceError> {
        let records = self.find_for_day(day)?;
        Ok(DayStats::from_records(&records, self.config.on_time_window()))
    }

    /// Retention cleanup using the configured number of days.
    pub fn purge_expired(&self) -> Result<usize, AdherenceError> {
        let owner = self.owner()?;
        ledger::purge_older_than(&*self.db.connect()?, self.clock.as_ref(), &owner, self.config.retention_days)
    }

    pub fn reconcile_ownership(&self) -> Result<ReconcileOutcome, AdherenceError> {
        let owner = self.owner()?;
        ledger::reconcile_ownership(&*self.db.connect()?, &owner, self.clock.now())
    }

    // ═══════════════════════════════════════════
    // Expansion
    // ═══════════════════════════════════════════

    pub fn expand_day(&self, day: NaiveDate) -> Result<ExpansionReport, AdherenceError> {
        let owner = self.owner()?;
        expansion::expand_day(&*self.db.connect()?, self.clock.as_ref(), &owner, day)
    }

    pub fn expand_today(&self) -> Result<ExpansionReport, AdherenceError> {
        self.expand_day(self.clock.today())
    }

    pub fn expand_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &AtomicBool,
    ) -> Result<Vec<ExpansionReport>, AdherenceError> {
        let owner = self.owner()?;
        expansion::expand_range(&*self.db.connect()?, self.clock.as_ref(), &owner, start, end, cancel)
    }

    /// Expand today, then list today's doses.
    pub fn today_view(&self) -> Result<TodayView, AdherenceError> {
        let owner = self.owner()?;
        let conn = self.db.connect()?;
        expansion::expand_day(&conn, self.clock.as_ref(), &owner, self.clock.today())?;
        expansion::today_view(&conn, self.clock.as_ref(), &owner, self.config.on_time_window())
    }

    /// [`Self::today_view`] for presentation: failures become an empty day.
    pub fn today_view_or_empty(&self) -> TodayView {
        self.today_view().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Today view unavailable, showing empty day");
            TodayView {
                date: self.clock.today(),
                doses: Vec::new(),
                stats: DayStats::from_records(&[], self.config.on_time_window()),
            }
        })
    }

    // ═══════════════════════════════════════════
    // Adherence
    // ═══════════════════════════════════════════

    pub fn summarize_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<DayAdherenceSummary>, AdherenceError> {
        let owner = self.owner()?;
        adherence::summarize_range(
            &*self.db.connect()?,
            self.clock.as_ref(),
            &owner,
            start,
            end,
            self.config.empty_day_policy,
            cancel,
        )
    }

    pub fn status_map(&self, start: NaiveDate, end: NaiveDate) -> Result<BTreeMap<NaiveDate, DayStatus>, AdherenceError> {
        let owner = self.owner()?;
        adherence::status_map(
            &*self.db.connect()?,
            self.clock.as_ref(),
            &owner,
            start,
            end,
            self.config.empty_day_policy,
        )
    }

    pub fn status_map_or_empty(&self, start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, DayStatus> {
        self.status_map(start, end).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Adherence unavailable, showing no status");
            BTreeMap::new()
        })
    }

    pub fn day_detail(&self, day: NaiveDate) -> Result<DayDetail, AdherenceError> {
        let owner = self.owner()?;
        adherence::day_detail(
            &*self.db.connect()?,
            self.clock.as_ref(),
            &owner,
            day,
            self.config.empty_day_policy,
            self.config.on_time_window(),
        )
    }

    pub fn month_grid(&self, year: i32, month: u32) -> Result<MonthGrid, AdherenceError> {
        let owner = self.owner()?;
        adherence::month_grid(
            &*self.db.connect()?,
            self.clock.as_ref(),
            &owner,
            year,
            month,
            self.config.empty_day_policy,
        )
    }

    /// [`Self::month_grid`] for presentation: failures become an empty grid.
    pub fn calendar_or_empty(&self, year: i32, month: u32) -> MonthGrid {
        self.month_grid(year, month).unwrap_or_else(|e| {
            tracing::warn!(error = %e, year, month, "Calendar unavailable, showing empty grid");
            MonthGrid {
                year,
                month,
                cells: Vec::new(),
            }
        })
    }

    // ═══════════════════════════════════════════
    // Reminders
    // ═══════════════════════════════════════════

    pub fn slots_for_today(&self) -> Result<Vec<SlotTrigger>, AdherenceError> {
        let owner = self.owner()?;
        alarms::slots_for_today(&*self.db.connect()?, self.clock.as_ref(), &owner)
    }

    pub fn reminders(&self) -> Result<Vec<Reminder>, AdherenceError> {
        let triggers = self.slots_for_today()?;
        alarms::coalesce(self.clock.as_ref(), &triggers)
    }

    /// Recompute reminders and hand them to `sink`.
    pub fn refresh_reminders(&self, sink: &dyn ReminderSink) -> Result<usize, AdherenceError> {
        let owner = self.owner()?;
        let reminders = self.reminders()?;
        sink.replace_all(&owner, &reminders)?;
        tracing::info!(owner = %owner, count = reminders.len(), "Reminders refreshed");
        Ok(reminders.len())
    }

    // ═══════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════

    /// Merge owner-tagged records. Owners come from the records, not the
    /// session.
    pub fn import_records(&self, records: &[SyncRecord]) -> Result<SyncOutcome, AdherenceError> {
        sync::import_records(&*self.db.connect()?, records, self.clock.now())
    }

    pub fn import_json(&self, json: &str) -> Result<SyncOutcome, AdherenceError> {
        let records = sync::parse_records(json)?;
        self.import_records(&records)
    }

    /// The session owner's records in the configured upload window.
    pub fn export_window(&self) -> Result<Vec<SyncRecord>, AdherenceError> {
        let owner = self.owner()?;
        sync::export_window(
            &*self.db.connect()?,
            self.clock.as_ref(),
            &owner,
            self.config.sync_window_days,
        )
    }

    pub fn export_json(&self) -> Result<String, AdherenceError> {
        sync::render_records(&self.export_window()?)
    }

    pub fn last_synced(&self) -> Result<Option<DateTime<Utc>>, AdherenceError> {
        let owner = self.owner()?;
        sync::last_synced(&*self.db.connect()?, &owner, INTAKE_STREAM)
    }

    pub fn mark_synced(&self) -> Result<DateTime<Utc>, AdherenceError> {
        let owner = self.owner()?;
        let now = self.clock.now();
        sync::mark_synced(&*self.db.connect()?, &owner, INTAKE_STREAM, now)?;
        Ok(now)
    }

    // ═══════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════

    /// Handle one command. `cancel` stops multi-day work between days.
    pub fn dispatch(&self, command: TrackerCommand, cancel: &AtomicBool) -> Result<CommandReply, AdherenceError> {
        tracing::debug!(command = command.name(), "Dispatching tracker command");
        match command {
            TrackerCommand::ExpandToday => self.expand_today().map(CommandReply::Expanded),
            TrackerCommand::ExpandDays { start, days } => {
                if days > MAX_EXPAND_DAYS {
                    return Err(AdherenceError::Validation(format!(
                        "cannot expand {days} days at once (max {MAX_EXPAND_DAYS})"
                    )));
                }
                let end = start
                    .checked_add_days(Days::new(days.into()))
                    .ok_or_else(|| AdherenceError::Validation(format!("{start} + {days} days is out of range")))?;
                self.expand_range(start, end, cancel).map(CommandReply::ExpandedRange)
            }
            TrackerCommand::ReminderFired { slot_key } => {
                tracing::info!(slot = ?slot_key, "Reminder fired");
                self.expand_today()?;
                self.reminders().map(CommandReply::Reminders)
            }
            TrackerCommand::MarkTaken {
                medication_name,
                planned_at,
                actual_at,
                dosage,
            } => self
                .mark_taken(&medication_name, planned_at, actual_at, dosage.as_deref())
                .map(CommandReply::Marked),
            TrackerCommand::MarkUntaken {
                medication_name,
                planned_at,
            } => self
                .mark_untaken(&medication_name, planned_at)
                .map(CommandReply::Unmarked),
            TrackerCommand::ImportSync { records } => self.import_records(&records).map(CommandReply::Imported),
            TrackerCommand::ReconcileOwnership => self.reconcile_ownership().map(CommandReply::Reconciled),
            TrackerCommand::PurgeExpired => self.purge_expired().map(CommandReply::Purged),
        }
    }
}

/// Work requested of the tracker from outside the call stack: reminder
/// triggers, startup tasks, sync deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerCommand {
    ExpandToday,
    ExpandDays {
        start: NaiveDate,
        days: u32,
    },
    ReminderFired {
        slot_key: Option<SlotKey>,
    },
    MarkTaken {
        medication_name: String,
        planned_at: DateTime<Utc>,
        actual_at: Option<DateTime<Utc>>,
        dosage: Option<String>,
    },
    MarkUntaken {
        medication_name: String,
        planned_at: DateTime<Utc>,
    },
    ImportSync {
        records: Vec<SyncRecord>,
    },
    ReconcileOwnership,
    PurgeExpired,
}

impl TrackerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExpandToday => "expand_today",
            Self::ExpandDays { .. } => "expand_days",
            Self::ReminderFired { .. } => "reminder_fired",
            Self::MarkTaken { .. } => "mark_taken",
            Self::MarkUntaken { .. } => "mark_untaken",
            Self::ImportSync { .. } => "import_sync",
            Self::ReconcileOwnership => "reconcile_ownership",
            Self::PurgeExpired => "purge_expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CommandReply {
    Expanded(ExpansionReport),
    ExpandedRange(Vec<ExpansionReport>),
    Reminders(Vec<Reminder>),
    Marked(MarkOutcome),
    Unmarked(bool),
    Imported(SyncOutcome),
    Reconciled(ReconcileOutcome),
    Purged(usize),
}

// ═══════════════════════════════════════════
// Worker thread
// ═══════════════════════════════════════════

type ReplySender = mpsc::Sender<Result<CommandReply, AdherenceError>>;

/// Background thread that executes [`TrackerCommand`]s in arrival order.
///
/// Dropping the handle cancels in-flight multi-day work, stops the loop and
/// joins the thread.
pub struct TrackerWorker {
    sender: Option<mpsc::Sender<(TrackerCommand, Option<ReplySender>)>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TrackerWorker {
    pub fn spawn(tracker: Arc<MedicationTracker>) -> Self {
        let (sender, receiver) = mpsc::channel::<(TrackerCommand, Option<ReplySender>)>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = std::thread::spawn(move || {
            tracing::info!("Tracker worker started");
            while let Ok((command, reply)) = receiver.recv() {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                let name = command.name();
                let result = tracker.dispatch(command, &flag);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!(command = name, error = %e, "Tracker command failed");
                        }
                    }
                }
            }
            tracing::info!("Tracker worker shutting down");
        });

        Self {
            sender: Some(sender),
            shutdown,
            handle: Some(handle),
        }
    }

    /// Queue a command without waiting for its result.
    pub fn send(&self, command: TrackerCommand) -> Result<(), AdherenceError> {
        self.sender
            .as_ref()
            .ok_or(AdherenceError::WorkerUnavailable)?
            .send((command, None))
            .map_err(|_| AdherenceError::WorkerUnavailable)
    }

    /// Queue a command and block until it has been handled.
    pub fn request(&self, command: TrackerCommand) -> Result<CommandReply, AdherenceError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender
            .as_ref()
            .ok_or(AdherenceError::WorkerUnavailable)?
            .send((command, Some(reply_tx)))
            .map_err(|_| AdherenceError::WorkerUnavailable)?;
        reply_rx.recv().map_err(|_| AdherenceError::WorkerUnavailable)?
    }

    /// Cancel in-flight work and stop accepting new commands.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.sender.take();
    }
}

impl Drop for TrackerWorker {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
