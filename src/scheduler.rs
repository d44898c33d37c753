//! Scheduler for recurring sync passes.
//!
//! A cron expression from config drives the scheduled trigger. The loop
//! polls every 30 seconds; a pass whose due time was missed by more than
//! the grace period (laptop asleep, process stopped) is skipped rather
//! than run late, since the next occurrence will cover the same unread
//! window anyway.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::ai::DraftGenerator;
use crate::config::AppConfig;
use crate::db::CrmDb;
use crate::gmail::MailboxApi;
use crate::services::sync::{PassOptions, SyncCoordinator};

/// Grace period for missed passes (30 minutes).
const MISSED_PASS_GRACE_SECS: i64 = 1800;

/// Poll interval for the scheduler loop (30 seconds).
const POLL_INTERVAL_SECS: u64 = 30;

pub fn parse_schedule(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(expr).map_err(|e| format!("Invalid sync schedule '{expr}': {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DueDecision {
    NotYet,
    Run,
    SkipMissed,
}

/// Decide whether a pass is due, given when we last acted.
fn due_decision(
    schedule: &Schedule,
    last_acted: DateTime<Utc>,
    now: DateTime<Utc>,
    grace_secs: i64,
) -> DueDecision {
    let Some(due) = schedule.after(&last_acted).next() else {
        return DueDecision::NotYet;
    };
    if now < due {
        return DueDecision::NotYet;
    }
    if (now - due).num_seconds() > grace_secs {
        DueDecision::SkipMissed
    } else {
        DueDecision::Run
    }
}

pub struct Scheduler<'a> {
    db: &'a CrmDb,
    mailbox: &'a dyn MailboxApi,
    generator: &'a dyn DraftGenerator,
    config: &'a AppConfig,
    schedule: Schedule,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        db: &'a CrmDb,
        mailbox: &'a dyn MailboxApi,
        generator: &'a dyn DraftGenerator,
        config: &'a AppConfig,
    ) -> Result<Self, String> {
        let schedule = parse_schedule(&config.sync.schedule)?;
        Ok(Self {
            db,
            mailbox,
            generator,
            config,
            schedule,
        })
    }

    /// Run the scheduler loop indefinitely.
    ///
    /// The scheduled trigger's summary is only logged; nobody is waiting
    /// on it.
    pub async fn run(&self) {
        log::info!(
            "Scheduler started (schedule '{}')",
            self.config.sync.schedule
        );
        let mut last_acted = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            let now = Utc::now();

            match due_decision(&self.schedule, last_acted, now, MISSED_PASS_GRACE_SECS) {
                DueDecision::NotYet => continue,
                DueDecision::SkipMissed => {
                    log::info!("Skipping scheduled pass missed beyond the grace period");
                    last_acted = now;
                }
                DueDecision::Run => {
                    last_acted = now;
                    let coordinator =
                        SyncCoordinator::new(self.db, self.mailbox, self.generator, self.config);
                    match coordinator.run_pass(&PassOptions::scheduled()).await {
                        Ok(summary) if summary.no_accounts() => {
                            log::info!("Scheduled pass: no mailbox accounts connected");
                        }
                        Ok(summary) => {
                            log::info!(
                                "Scheduled pass: {} processed, {} skipped",
                                summary.processed,
                                summary.skipped
                            );
                        }
                        Err(e) => {
                            log::error!("Scheduled pass failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn every_ten_minutes() -> Schedule {
        parse_schedule("0 */10 * * * *").unwrap()
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, h, m, s).unwrap()
    }

    #[test]
    fn test_not_yet_before_next_occurrence() {
        let schedule = every_ten_minutes();
        let decision = due_decision(&schedule, utc(9, 0, 1), utc(9, 5, 0), 1800);
        assert_eq!(decision, DueDecision::NotYet);
    }

    #[test]
    fn test_run_when_due() {
        let schedule = every_ten_minutes();
        let decision = due_decision(&schedule, utc(9, 0, 1), utc(9, 10, 5), 1800);
        assert_eq!(decision, DueDecision::Run);
    }

    #[test]
    fn test_skip_when_missed_beyond_grace() {
        let schedule = every_ten_minutes();
        // Due at 9:10, woken at 9:55 with a 30-minute grace
        let decision = due_decision(&schedule, utc(9, 0, 1), utc(9, 55, 0), 1800);
        assert_eq!(decision, DueDecision::SkipMissed);
    }

    #[test]
    fn test_run_when_missed_within_grace() {
        let schedule = every_ten_minutes();
        // Due at 9:10, woken at 9:25 with a 30-minute grace
        let decision = due_decision(&schedule, utc(9, 0, 1), utc(9, 25, 0), 1800);
        assert_eq!(decision, DueDecision::Run);
    }

    #[test]
    fn test_invalid_schedule_is_rejected() {
        assert!(parse_schedule("every ten minutes").is_err());
        assert!(parse_schedule("0 */10 * * * *").is_ok());
    }
}
