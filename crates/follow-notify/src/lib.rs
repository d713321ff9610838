mod smtp;
mod templates;

pub use smtp::{SmtpConfig, SmtpMailer, SmtpTls};
pub use templates::DigestTemplate;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use report_core::{Analyst, Mailer, PipelineError, Report, ReportStore, User};

/// What one notification pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NotifySummary {
    pub notified: usize,
    pub failed: usize,
}

/// Fans newly ingested reports out to the users following their analysts.
///
/// Each user gets exactly one digest listing every followed analyst that
/// published today, not one mail per report. Delivery is best-effort: a
/// failure for one user is logged and the rest still go out.
pub struct FollowerNotifier {
    store: Arc<dyn ReportStore>,
    mailer: Arc<dyn Mailer>,
}

impl FollowerNotifier {
    pub fn new(store: Arc<dyn ReportStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    pub async fn notify_followers(
        &self,
        new_reports: &[Report],
    ) -> Result<NotifySummary, PipelineError> {
        let mut analyst_ids: Vec<i64> =
            new_reports.iter().filter_map(|r| r.analyst_id).collect();
        analyst_ids.sort_unstable();
        analyst_ids.dedup();
        if analyst_ids.is_empty() {
            return Ok(NotifySummary::default());
        }

        let follows = self.store.follows_by_analysts(&analyst_ids).await?;
        let mut by_user: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for follow in follows {
            by_user
                .entry(follow.user_id)
                .or_default()
                .insert(follow.analyst_id);
        }
        if by_user.is_empty() {
            return Ok(NotifySummary::default());
        }

        let mut analysts: HashMap<i64, Analyst> = HashMap::new();
        for id in &analyst_ids {
            if let Some(analyst) = self.store.get_analyst(*id).await? {
                analysts.insert(*id, analyst);
            }
        }

        let mut summary = NotifySummary::default();
        for (user_id, followed) in by_user {
            let user = match self.store.find_user(user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(user_id, "Follow row references missing user, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(user_id, "User lookup failed: {e}");
                    summary.failed += 1;
                    continue;
                }
            };

            let digest: Vec<Analyst> = followed
                .iter()
                .filter_map(|id| analysts.get(id).cloned())
                .collect();
            if digest.is_empty() {
                continue;
            }

            match self.mailer.send_new_report_digest(&user, &digest).await {
                Ok(()) => summary.notified += 1,
                Err(e) => {
                    tracing::warn!(user_id, "Digest delivery failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Notified {} users ({} failures) about {} analysts",
            summary.notified,
            summary.failed,
            analyst_ids.len()
        );
        Ok(summary)
    }
}

/// Mailer used when SMTP is not configured: logs the digest instead of
/// sending it, so local runs still show what would have gone out.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_new_report_digest(
        &self,
        user: &User,
        analysts: &[Analyst],
    ) -> Result<(), PipelineError> {
        let names: Vec<&str> = analysts.iter().map(|a| a.name.as_str()).collect();
        tracing::info!(
            "SMTP not configured; would mail {} about new reports from {}",
            user.email,
            names.join(", ")
        );
        Ok(())
    }
}
