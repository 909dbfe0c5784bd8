use std::sync::Arc;

use bot_commons::{
    command::{parse_command, MaybeCommand, ParsedCommand},
    useful_methods::BotStuff,
};
use chrono::NaiveDate;
use teloxide::{
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::*,
    sugar::request::RequestLinkPreviewExt,
    types::{BotCommand, Me, ParseMode, UserId},
    ApiError, RequestError,
};

use crate::{
    database::{self, parse_referral_code, Database, DisplayName},
    error::BotError,
    presenter::{self, Screen},
    reputation::VirusTotal,
    settings::RECENT_CHECKS_SHOWN,
    usage::{self, UsageMeter},
    workflow::{Origin, Reply, Responder, Workflow},
};

pub mod menu;
pub use menu::handle_callback_query;

#[must_use]
pub fn generate_bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Show the main menu"),
        BotCommand::new("stats", "Your checks and referrals"),
        BotCommand::new("referral", "Your referral link"),
        BotCommand::new("help", "How to check a link"),
    ]
}

/// Send a [`Screen`] as a new message.
pub(crate) async fn send_screen(
    bot: &Bot,
    chat_id: ChatId,
    screen: Screen,
) -> Result<Message, RequestError> {
    // Previews would make Telegram itself visit the links we're warning about.
    let request = bot
        .send_message(chat_id, screen.text)
        .parse_mode(ParseMode::Html)
        .disable_link_preview(true);

    match screen.keyboard {
        Some(keyboard) => request.reply_markup(keyboard).await,
        None => request.await,
    }
}

/// Edit an existing message into a [`Screen`].
pub(crate) async fn edit_screen(
    bot: &Bot,
    message: &Message,
    screen: Screen,
) -> Result<(), RequestError> {
    let request = bot
        .edit_message_text(message.chat.id, message.id, screen.text)
        .parse_mode(ParseMode::Html)
        .disable_link_preview(true);

    let edit_result = match screen.keyboard {
        Some(keyboard) => request.reply_markup(keyboard).await,
        None => request.await,
    };

    match edit_result {
        // Button pressed twice, the message already says that.
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// [`Responder`] that talks to a Telegram chat.
struct ChatResponder<'a> {
    bot: &'a Bot,
    chat_id: ChatId,
    meter: UsageMeter,
}

impl Responder for ChatResponder<'_> {
    async fn typing(&self) -> Result<(), RequestError> {
        self.bot.typing(self.chat_id).await
    }

    async fn reply(&self, reply: &Reply) -> Result<(), RequestError> {
        let screen = match reply {
            Reply::Hint => presenter::hint(),
            Reply::QuotaExhausted(quota) => presenter::quota_exhausted(&self.meter, quota),
            Reply::Verdict(report) => presenter::verdict(report),
        };
        send_screen(self.bot, self.chat_id, screen).await?;
        Ok(())
    }
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    database: Arc<Database>,
    scanner: Arc<VirusTotal>,
    meter: UsageMeter,
) -> Result<(), BotError> {
    // Bot ignores messages made by itself.
    if message.from.as_ref().map(|from| from.id) == Some(me.id) {
        return Ok(());
    }

    let Some(text) = message.text() else {
        return Ok(());
    };

    match parse_command(text, me.username()) {
        MaybeCommand::ForOtherBot => return Ok(()),
        MaybeCommand::ForUs(command) => {
            if handle_command(&bot, &me, &message, &database, meter, command).await? {
                return Ok(());
            }
            // Unknown commands are just text that might have links in it.
        }
        MaybeCommand::NotACommand => {}
    }

    let origin = if message.chat.is_private() {
        let Some(user) = &message.from else {
            // Shouldn't happen, but eh.
            log::warn!("Private message without a sender in {}", message.chat.id);
            return Ok(());
        };
        Origin::Private {
            user: user.id,
            name: DisplayName::from(user),
        }
    } else {
        Origin::Group
    };

    let responder = ChatResponder {
        bot: &bot,
        chat_id: message.chat.id,
        meter,
    };

    let outcome = Workflow::new(&database, scanner.as_ref(), meter)
        .check_message(&origin, text, &responder, usage::today())
        .await?;

    log::debug!("Message in chat {}: {:?}", message.chat.id, outcome);

    Ok(())
}

/// Screens about the user's own account. These need `/start` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccountScreen {
    Stats,
    Referral,
}

/// Render an [`AccountScreen`] for `user`, or [`None`] if they never sent
/// `/start`.
pub(crate) async fn account_screen(
    database: &Database,
    meter: &UsageMeter,
    user: UserId,
    bot_username: &str,
    which: AccountScreen,
    today: NaiveDate,
) -> Result<Option<Screen>, database::Error> {
    let Some(record) = database.get_user(user).await? else {
        return Ok(None);
    };

    let screen = match which {
        AccountScreen::Stats => {
            let quota = meter.check_quota(database, user, today).await?;
            let recent = database.checks_for_user(user, RECENT_CHECKS_SHOWN).await?;
            presenter::stats(&record, &quota, &recent)
        }
        AccountScreen::Referral => presenter::referral(&record, bot_username, meter),
    };

    Ok(Some(screen))
}

/// Who referred `user`, going by the `/start ref_<id>` deep link.
/// Referring yourself doesn't count.
fn start_referrer(command: &ParsedCommand<'_>, user: UserId) -> Option<UserId> {
    command
        .args()
        .next()
        .and_then(parse_referral_code)
        .filter(|referrer| *referrer != user)
}

/// Returns `true` if a command was recognized and responded to.
async fn handle_command(
    bot: &Bot,
    me: &Me,
    message: &Message,
    database: &Database,
    meter: UsageMeter,
    command: ParsedCommand<'_>,
) -> Result<bool, BotError> {
    let screen = if command.is("start") {
        let Some(user) = &message.from else {
            return Ok(false);
        };

        let referred_by = start_referrer(&command, user.id);

        if database
            .create_user(user.id, &DisplayName::from(user), referred_by)
            .await?
        {
            log::info!("New user {} (referred by {:?})", user.id, referred_by);
        }

        presenter::welcome(&user.first_name, me.username(), &meter)
    } else if command.is("help") {
        presenter::hint()
    } else if command.is("stats") || command.is("referral") {
        let Some(user) = &message.from else {
            return Ok(false);
        };

        let which = if command.is("stats") {
            AccountScreen::Stats
        } else {
            AccountScreen::Referral
        };

        let screen = account_screen(
            database,
            &meter,
            user.id,
            me.username(),
            which,
            usage::today(),
        )
        .await?;

        let Some(screen) = screen else {
            bot.send_message(message.chat.id, presenter::NOT_REGISTERED)
                .await?;
            return Ok(true);
        };
        screen
    } else {
        return Ok(false);
    };

    send_screen(bot, message.chat.id, screen).await?;
    Ok(true)
}
