use teloxide::RequestError;

/// Things that can go wrong while handling an update.
///
/// Either of these ends the handling of that one update. Teloxide's default
/// error handler logs it, and the bot carries on with the next update.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] RequestError),
    #[error("Database died: {0}")]
    Database(#[from] crate::database::Error),
}
