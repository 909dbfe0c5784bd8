use chrono::{Local, NaiveDate};
use teloxide::types::UserId;

use crate::{
    database::{self, Database},
    settings::{DAILY_FREE_CHECKS, REFERRAL_BONUS_PER_FRIEND},
};

/// Where a user stands with today's checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub used: i64,
    pub remaining: i64,
    /// How many checks this user gets per day.
    pub limit: i64,
}

impl Quota {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Quota policy over the counters in the [`Database`].
#[derive(Debug, Clone, Copy)]
pub struct UsageMeter {
    pub daily_free_checks: i64,
    /// Extra daily checks per invited friend.
    pub referral_bonus: i64,
}

impl Default for UsageMeter {
    fn default() -> Self {
        UsageMeter {
            daily_free_checks: DAILY_FREE_CHECKS,
            referral_bonus: REFERRAL_BONUS_PER_FRIEND,
        }
    }
}

/// The current calendar date in the bot's timezone. Daily quotas roll over
/// at its midnight.
#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl UsageMeter {
    /// Daily limit for a user with this many invited friends.
    #[must_use]
    pub fn daily_limit(&self, referral_count: i64) -> i64 {
        self.daily_free_checks + self.referral_bonus * referral_count.max(0)
    }

    /// Read today's usage, resetting the counter if it's from an earlier day.
    pub async fn check_quota(
        &self,
        database: &Database,
        user: UserId,
        today: NaiveDate,
    ) -> Result<Quota, database::Error> {
        let limit = if self.referral_bonus == 0 {
            self.daily_free_checks
        } else {
            let referral_count = database
                .get_user(user)
                .await?
                .map_or(0, |record| record.referral_count);
            self.daily_limit(referral_count)
        };

        let (used, remaining) = database.reset_if_stale(user, today, limit).await?;

        Ok(Quota {
            used,
            remaining,
            limit,
        })
    }

    /// Count one finished check against the user.
    pub async fn consume(
        &self,
        database: &Database,
        user: UserId,
        today: NaiveDate,
    ) -> Result<(), database::Error> {
        database.increment_usage(user, today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DisplayName;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn remaining_is_limit_minus_used() {
        let db = Database::new_in_memory().await.unwrap();
        let meter = UsageMeter::default();
        let user = UserId(10);
        db.create_user(user, &DisplayName::default(), None)
            .await
            .unwrap();

        for used in 0..=DAILY_FREE_CHECKS + 2 {
            let quota = meter.check_quota(&db, user, day(1)).await.unwrap();
            assert_eq!(quota.used, used);
            assert_eq!(quota.remaining, (DAILY_FREE_CHECKS - used).max(0));
            assert_eq!(quota.is_exhausted(), used >= DAILY_FREE_CHECKS);
            meter.consume(&db, user, day(1)).await.unwrap();
        }

        let quota = meter.check_quota(&db, user, day(2)).await.unwrap();
        assert_eq!(quota.used, 0);
        assert_eq!(quota.remaining, DAILY_FREE_CHECKS);
    }

    #[tokio::test]
    async fn referrals_dont_raise_the_default_limit() {
        let db = Database::new_in_memory().await.unwrap();
        let meter = UsageMeter::default();
        let alice = UserId(1);
        db.create_user(alice, &DisplayName::default(), None)
            .await
            .unwrap();
        db.create_user(UserId(2), &DisplayName::default(), Some(alice))
            .await
            .unwrap();

        let quota = meter.check_quota(&db, alice, day(1)).await.unwrap();
        assert_eq!(quota.limit, DAILY_FREE_CHECKS);
    }

    #[tokio::test]
    async fn referral_bonus_when_enabled() {
        let db = Database::new_in_memory().await.unwrap();
        let meter = UsageMeter {
            daily_free_checks: 5,
            referral_bonus: 5,
        };
        let alice = UserId(1);
        db.create_user(alice, &DisplayName::default(), None)
            .await
            .unwrap();
        for friend in 2..4 {
            db.create_user(UserId(friend), &DisplayName::default(), Some(alice))
                .await
                .unwrap();
        }

        let quota = meter.check_quota(&db, alice, day(1)).await.unwrap();
        assert_eq!(quota.limit, 15);
        assert_eq!(quota.remaining, 15);
        // Unknown users have no friends.
        let quota = meter.check_quota(&db, UserId(99), day(1)).await.unwrap();
        assert_eq!(quota.limit, 5);
    }
}
