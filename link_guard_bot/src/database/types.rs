use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use teloxide::types::{User, UserId};

/// Name fields of a user, as Telegram reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayName {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&User> for DisplayName {
    fn from(user: &User) -> Self {
        DisplayName {
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
            last_name: user.last_name.clone(),
        }
    }
}

/// A row of the `users` table.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: DisplayName,
    /// Checks done on [`Self::last_check_date`]. Stale if that's not today.
    pub daily_checks: i64,
    pub last_check_date: Option<NaiveDate>,
    pub total_checks: i64,
    pub referral_code: String,
    pub referred_by: Option<UserId>,
    pub referral_count: i64,
    pub joined_date: DateTime<Utc>,
}

impl UserRecord {
    pub(super) fn from_sqlite_row(row: SqliteRow) -> UserRecord {
        UserRecord {
            user_id: UserId(row.get::<i64, _>(0) as u64),
            name: DisplayName {
                username: row.get(1),
                first_name: row.get(2),
                last_name: row.get(3),
            },
            daily_checks: row.get(4),
            last_check_date: row.get(5),
            total_checks: row.get(6),
            referral_code: row.get(7),
            referred_by: row.get::<Option<i64>, _>(8).map(|id| UserId(id as u64)),
            referral_count: row.get(9),
            joined_date: row.get(10),
        }
    }
}

/// A row of the `url_checks` table.
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub id: i64,
    pub user_id: UserId,
    pub url: String,
    pub result: String,
    pub is_malicious: bool,
    pub checked_at: DateTime<Utc>,
}

impl CheckRecord {
    pub(super) fn from_sqlite_row(row: SqliteRow) -> CheckRecord {
        CheckRecord {
            id: row.get(0),
            user_id: UserId(row.get::<i64, _>(1) as u64),
            url: row.get(2),
            result: row.get(3),
            is_malicious: row.get(4),
            checked_at: row.get(5),
        }
    }
}

/// Referral code of a user. Unique because user IDs are.
#[must_use]
pub fn referral_code_for(user: UserId) -> String {
    format!("ref_{}", user.0)
}

/// Inverse of [`referral_code_for`].
#[must_use]
pub fn parse_referral_code(code: &str) -> Option<UserId> {
    code.strip_prefix("ref_")?.parse().ok().map(UserId)
}
