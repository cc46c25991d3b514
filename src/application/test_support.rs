//! Fixtures shared by the service unit tests.

use super::context::{LedgerContext, SharedClock};
use crate::domain::ports::{LedgerEvent, LedgerObserver};
use crate::infrastructure::in_memory::InMemoryStore;
use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;
use std::sync::{Arc, Mutex};

pub(crate) fn fixture_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

struct FixtureClock {
    utc_now: DateTime<Utc>,
}

impl Clock for FixtureClock {
    fn local(&self) -> DateTime<Local> {
        self.utc_now.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.utc_now
    }
}

pub(crate) fn fixture_clock() -> SharedClock {
    Arc::new(FixtureClock {
        utc_now: fixture_timestamp(),
    })
}

/// Keeps a one-line summary of every event it receives.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    lines: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("observer lock")
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl LedgerObserver for RecordingObserver {
    fn record(&self, event: LedgerEvent<'_>) {
        let line = match event {
            LedgerEvent::EntryRecorded(entry) => format!(
                "entry {} {} {} {}->{}",
                entry.entry_type.as_str(),
                entry.user_id,
                entry.kind,
                entry.balance_before,
                entry.balance_after
            ),
            LedgerEvent::CodeRedeemed { code, user_id, .. } => {
                format!("redeemed {code} {user_id}")
            }
            LedgerEvent::PaymentSettled {
                payment_request_id,
                status,
                total,
            } => format!("payment {payment_request_id} {status} {total}"),
            LedgerEvent::Rejected { operation, error } => {
                format!("rejected {operation} {}", error.kind())
            }
        };
        self.lines.lock().expect("observer lock").push(line);
    }
}

pub(crate) fn context_with(observer: Arc<RecordingObserver>) -> LedgerContext {
    LedgerContext::new(
        Arc::new(InMemoryStore::in_memory()),
        fixture_clock(),
        observer,
    )
}

pub(crate) fn recording_context() -> (LedgerContext, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    (context_with(observer.clone()), observer)
}
