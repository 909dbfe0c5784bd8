mod types;
pub use types::*;

use std::str::FromStr;

use chrono::{NaiveDate, Utc};
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};
use teloxide::types::UserId;

type Pool = sqlx::Pool<Sqlite>;

pub struct Database {
    pool: Pool,
}

impl Database {
    /// Open the database at `database_url`, creating the file and the tables
    /// if they don't exist yet.
    pub async fn new(database_url: &str) -> Result<Database, Error> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            Sqlite::create_database(database_url).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect_with(
                SqliteConnectOptions::from_str(database_url)?
                    .pragma("cache_size", "-32768")
                    .busy_timeout(std::time::Duration::from_secs(600)),
            )
            .await?;

        Self::from_pool(pool).await
    }

    /// Fresh database that lives as long as this object does.
    pub async fn new_in_memory() -> Result<Database, Error> {
        // Every connection to ":memory:" is its own database, so there must
        // only ever be one, and it must never be closed.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: Pool) -> Result<Database, Error> {
        // Do some init. Create the tables...

        // USERS:
        // user_id (key, i64 because sqlite doesn't support u64)
        // username, first_name, last_name (strings, may be NULL)
        // daily_checks (checks done on last_check_date)
        // last_check_date (date as YYYY-MM-DD, may be NULL if never checked)
        // total_checks (all checks ever)
        // referral_code (unique string, "ref_<user_id>")
        // referred_by (user_id of whoever invited this user, may be NULL)
        // referral_count (how many users this user invited)
        // joined_date (date+time in UTC)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY NOT NULL,
                username TEXT NULL,
                first_name TEXT NULL,
                last_name TEXT NULL,
                daily_checks INTEGER NOT NULL DEFAULT 0,
                last_check_date TEXT NULL,
                total_checks INTEGER NOT NULL DEFAULT 0,
                referral_code TEXT NOT NULL UNIQUE,
                referred_by INTEGER NULL,
                referral_count INTEGER NOT NULL DEFAULT 0,
                joined_date TEXT NOT NULL
            ) STRICT;",
        ))
        .await?;

        // URL_CHECKS:
        // id (key, autoincrement)
        // user_id (who requested the check)
        // url (the checked URL)
        // result (human readable result)
        // is_malicious (0 for no, 1 for yes)
        // checked_at (date+time in UTC)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS url_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                url TEXT NOT NULL,
                result TEXT NOT NULL,
                is_malicious INTEGER NOT NULL,
                checked_at TEXT NOT NULL
            ) STRICT;",
        ))
        .await?;

        pool.execute(sqlx::query(
            "CREATE INDEX IF NOT EXISTS url_checks_user_id ON url_checks(user_id);",
        ))
        .await?;

        Ok(Database { pool })
    }

    pub async fn get_user(&self, user: UserId) -> Result<Option<UserRecord>, Error> {
        sqlx::query(
            "SELECT
                user_id,
                username,
                first_name,
                last_name,
                daily_checks,
                last_check_date,
                total_checks,
                referral_code,
                referred_by,
                referral_count,
                joined_date
            FROM users WHERE user_id=?;",
        )
        .bind(user.0 as i64)
        .map(UserRecord::from_sqlite_row)
        .fetch_optional(&self.pool)
        .await
    }

    /// Create a user, unless one with this ID already exists.
    ///
    /// If the user is new and `referred_by` is an existing user other than
    /// this one, that user's referral count goes up by one. Otherwise the
    /// referrer is dropped.
    ///
    /// Returns `true` if the user was created.
    pub async fn create_user(
        &self,
        user: UserId,
        name: &DisplayName,
        referred_by: Option<UserId>,
    ) -> Result<bool, Error> {
        // Every statement here writes. A transaction that reads first can't
        // take the write lock later without failing on a busy database.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO users (
                user_id,
                username,
                first_name,
                last_name,
                referral_code,
                joined_date
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING;",
        )
        .bind(user.0 as i64)
        .bind(name.username.as_deref())
        .bind(name.first_name.as_deref())
        .bind(name.last_name.as_deref())
        .bind(referral_code_for(user))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let referrer = match referred_by {
            Some(referrer) if inserted && referrer != user => {
                // Nothing gets updated if the referrer doesn't exist.
                let credited = sqlx::query(
                    "UPDATE users SET referral_count=referral_count+1 WHERE user_id=?;",
                )
                .bind(referrer.0 as i64)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                    == 1;

                if credited {
                    sqlx::query("UPDATE users SET referred_by=? WHERE user_id=?;")
                        .bind(referrer.0 as i64)
                        .bind(user.0 as i64)
                        .execute(&mut *tx)
                        .await?;
                }
                credited.then_some(referrer)
            }
            _ => None,
        };

        tx.commit().await?;

        if inserted {
            log::debug!("Created user {user} (referred by {referrer:?})");
        }

        Ok(inserted)
    }

    /// Append an entry to the check history.
    pub async fn record_check(
        &self,
        user: UserId,
        url: &str,
        result_text: &str,
        is_malicious: bool,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO url_checks (user_id, url, result, is_malicious, checked_at)
            VALUES (?, ?, ?, ?, ?);",
        )
        .bind(user.0 as i64)
        .bind(url)
        .bind(result_text)
        .bind(is_malicious)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one check towards both today's and the all-time counter.
    ///
    /// Expects [`Self::reset_if_stale`] to have been called for `today` first,
    /// otherwise yesterday's daily count carries over.
    pub async fn increment_usage(&self, user: UserId, today: NaiveDate) -> Result<(), Error> {
        sqlx::query(
            "UPDATE users SET
                daily_checks=daily_checks+1,
                total_checks=total_checks+1,
                last_check_date=?
            WHERE user_id=?;",
        )
        .bind(today)
        .bind(user.0 as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Zero the daily counter if it was last touched before `today`.
    ///
    /// Returns checks used today and checks remaining out of `daily_limit`.
    /// Unknown users get a full quota, and nothing is written for them.
    pub async fn reset_if_stale(
        &self,
        user: UserId,
        today: NaiveDate,
        daily_limit: i64,
    ) -> Result<(i64, i64), Error> {
        let Some((daily_checks, last_check_date)) =
            sqlx::query("SELECT daily_checks, last_check_date FROM users WHERE user_id=?;")
                .bind(user.0 as i64)
                .map(|row: SqliteRow| (row.get::<i64, _>(0), row.get::<Option<NaiveDate>, _>(1)))
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok((0, daily_limit));
        };

        if last_check_date == Some(today) {
            return Ok((daily_checks, (daily_limit - daily_checks).max(0)));
        }

        // Only reset if nobody else has stamped today in the meantime.
        sqlx::query(
            "UPDATE users SET daily_checks=0, last_check_date=?
            WHERE user_id=? AND (last_check_date IS NULL OR last_check_date!=?);",
        )
        .bind(today)
        .bind(user.0 as i64)
        .bind(today)
        .execute(&self.pool)
        .await?;

        Ok((0, daily_limit))
    }

    /// Latest `limit` checks of this user, newest first.
    pub async fn checks_for_user(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<CheckRecord>, Error> {
        sqlx::query(
            "SELECT id, user_id, url, result, is_malicious, checked_at
            FROM url_checks WHERE user_id=?
            ORDER BY id DESC LIMIT ?;",
        )
        .bind(user.0 as i64)
        .bind(limit)
        .map(CheckRecord::from_sqlite_row)
        .fetch_all(&self.pool)
        .await
    }

    #[cfg(test)]
    pub async fn count_checks(&self, user: UserId) -> Result<i64, Error> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM url_checks WHERE user_id=?;")
            .bind(user.0 as i64)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        Ok(count)
    }
}
