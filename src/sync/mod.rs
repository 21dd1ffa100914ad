use serde::Serialize;
use tracing::{error, info, warn};

use crate::connectors::{MailSource, SheetSink};
use crate::message::ParsedRecord;
use crate::state::{ProcessedIds, StateStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub listed: usize,
    pub processed: usize,
    pub skipped_duplicates: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Where a single message ended up in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Recorded,
    SkippedDuplicate,
    FetchFailed,
    ParseFailed,
    AppendFailed,
}

/// Copies unread messages into the sheet, one at a time.
///
/// The processed-ID set is loaded once in [`SyncDriver::new`] and saved after
/// every successful append. A failure inside one message is logged and never
/// stops the run.
pub struct SyncDriver<M, S> {
    mail: M,
    sheet: S,
    store: StateStore,
    processed: ProcessedIds,
    max_results: usize,
}

impl<M: MailSource, S: SheetSink> SyncDriver<M, S> {
    pub fn new(mail: M, sheet: S, store: StateStore, max_results: usize) -> Self {
        let processed = store.load();
        info!(count = processed.len(), "loaded processed message state");
        Self {
            mail,
            sheet,
            store,
            processed,
            max_results,
        }
    }

    pub fn processed_ids(&self) -> &ProcessedIds {
        &self.processed
    }

    pub fn mail(&self) -> &M {
        &self.mail
    }

    pub fn sheet(&self) -> &S {
        &self.sheet
    }

    pub async fn run(&mut self) -> SyncReport {
        let mut report = SyncReport::default();

        let messages = match self.mail.list_unread(self.max_results).await {
            Ok(messages) => messages,
            Err(err) => {
                let detail = format!("{err:#}");
                error!(source = self.mail.name(), error = %detail, "failed to list unread messages");
                report.errors.push(format!("list unread: {detail}"));
                return report;
            }
        };

        report.listed = messages.len();
        if messages.is_empty() {
            info!("no unread messages found");
            return report;
        }

        for summary in &messages {
            match self.process_message(&summary.id, &mut report).await {
                MessageOutcome::Recorded => report.processed += 1,
                MessageOutcome::SkippedDuplicate => report.skipped_duplicates += 1,
                MessageOutcome::FetchFailed
                | MessageOutcome::ParseFailed
                | MessageOutcome::AppendFailed => report.failed += 1,
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped_duplicates,
            failed = report.failed,
            "sync finished: {} new messages processed",
            report.processed
        );
        report
    }

    async fn process_message(&mut self, id: &str, report: &mut SyncReport) -> MessageOutcome {
        if self.processed.contains(id) {
            info!(message_id = id, "skipping already processed message");
            self.mark_read(id).await;
            return MessageOutcome::SkippedDuplicate;
        }

        let message = match self.mail.get_message(id).await {
            Ok(message) => message,
            Err(err) => {
                let detail = format!("{err:#}");
                error!(message_id = id, error = %detail, "failed to fetch message");
                report.errors.push(format!("fetch id={id}: {detail}"));
                return MessageOutcome::FetchFailed;
            }
        };

        let record = match ParsedRecord::from_message(&message) {
            Ok(record) => record,
            Err(err) => {
                error!(message_id = id, error = %err, "failed to parse message");
                report.errors.push(format!("parse id={id}: {err}"));
                return MessageOutcome::ParseFailed;
            }
        };

        if let Err(err) = self.sheet.append_row(&record.row()).await {
            let detail = format!("{err:#}");
            error!(
                message_id = id,
                sink = self.sheet.name(),
                error = %detail,
                "failed to append row; message left unread"
            );
            report.errors.push(format!("append id={id}: {detail}"));
            return MessageOutcome::AppendFailed;
        }

        self.mark_read(id).await;
        self.processed.insert(id);
        if let Err(err) = self.store.save(&self.processed) {
            error!(
                message_id = id,
                path = %self.store.path().display(),
                error = %err,
                "failed to persist processed message state"
            );
            report.errors.push(format!("save state id={id}: {err}"));
        }

        MessageOutcome::Recorded
    }

    async fn mark_read(&self, id: &str) {
        match self.mail.mark_read(id).await {
            Ok(()) => info!(message_id = id, "marked message read"),
            Err(err) => warn!(
                message_id = id,
                error = %format!("{err:#}"),
                "failed to mark message read"
            ),
        }
    }
}
