use std::{future::Future, sync::LazyLock, time::Duration};

use chrono::NaiveDate;
use regex::Regex;
use teloxide::{types::UserId, RequestError};
use tokio::time::sleep;

use crate::{
    database::{Database, DisplayName},
    error::BotError,
    reputation::{ScanReport, Scanner},
    settings::{MAX_URLS_PER_MESSAGE, PAUSE_BETWEEN_URLS},
    usage::{Quota, UsageMeter},
};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z0-9$-_@.&+!*\\(),]|%[0-9a-fA-F]{2})+")
        .expect("Regex will always be valid")
});

/// All `http://` and `https://` URLs in the text, in order of appearance.
/// Bare domains like `example.com` don't count.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<&str> {
    URL_PATTERN.find_iter(text).map(|m| m.as_str()).collect()
}

/// Where a message to check came from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// Private chat with this user. Checks are metered and logged.
    Private { user: UserId, name: DisplayName },
    /// Group chat. Checks are free and not logged.
    Group,
}

/// Something the workflow wants to say in the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The message had no links.
    Hint,
    /// The user is out of checks for today.
    QuotaExhausted(Quota),
    Verdict(ScanReport),
}

/// The chat the message came from.
pub trait Responder {
    fn typing(&self) -> impl Future<Output = Result<(), RequestError>> + Send;
    fn reply(&self, reply: &Reply) -> impl Future<Output = Result<(), RequestError>> + Send;
}

/// How handling a message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoUrls,
    QuotaExhausted,
    /// This many URLs were checked.
    Checked(usize),
}

pub struct Workflow<'a, S> {
    pub database: &'a Database,
    pub scanner: &'a S,
    pub meter: UsageMeter,
    pub pause_between_urls: Duration,
}

impl<'a, S: Scanner + Sync> Workflow<'a, S> {
    #[must_use]
    pub fn new(database: &'a Database, scanner: &'a S, meter: UsageMeter) -> Self {
        Workflow {
            database,
            scanner,
            meter,
            pause_between_urls: PAUSE_BETWEEN_URLS,
        }
    }

    /// Check links in `text` and reply with a verdict for each of the first
    /// [`MAX_URLS_PER_MESSAGE`] of them.
    ///
    /// In private chats the sender is registered if needed, and the check is
    /// refused if they're out of quota. Each finished check is logged and
    /// counted only after its verdict is in.
    pub async fn check_message<R: Responder + Sync>(
        &self,
        origin: &Origin,
        text: &str,
        responder: &R,
        today: NaiveDate,
    ) -> Result<Outcome, BotError> {
        let urls = extract_urls(text);
        if urls.is_empty() {
            responder.reply(&Reply::Hint).await?;
            return Ok(Outcome::NoUrls);
        }

        let metered_user = match origin {
            Origin::Private { user, name } => {
                self.database.create_user(*user, name, None).await?;

                let quota = self.meter.check_quota(self.database, *user, today).await?;
                if quota.is_exhausted() {
                    log::debug!("User {user} is out of checks ({quota:?})");
                    responder.reply(&Reply::QuotaExhausted(quota)).await?;
                    return Ok(Outcome::QuotaExhausted);
                }
                Some(*user)
            }
            Origin::Group => None,
        };

        if urls.len() > MAX_URLS_PER_MESSAGE {
            log::debug!(
                "Got {} URLs, only checking the first {MAX_URLS_PER_MESSAGE}",
                urls.len()
            );
        }

        let mut checked = 0;
        for url in urls.into_iter().take(MAX_URLS_PER_MESSAGE) {
            responder.typing().await?;

            let report = self.scanner.scan(url).await;

            if let Some(user) = metered_user {
                self.database
                    .record_check(
                        user,
                        &report.url,
                        &report.verdict.to_string(),
                        report.is_malicious(),
                    )
                    .await?;
                self.meter.consume(self.database, user, today).await?;
            }

            responder.reply(&Reply::Verdict(report)).await?;
            checked += 1;

            sleep(self.pause_between_urls).await;
        }

        Ok(Outcome::Checked(checked))
    }
}
