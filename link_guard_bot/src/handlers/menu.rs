use std::sync::Arc;

use teloxide::{
    payloads::AnswerCallbackQuerySetters,
    prelude::*,
    types::{CallbackQuery, Me},
};

use crate::{
    database::Database,
    error::BotError,
    presenter::{self, Menu},
    usage::{self, UsageMeter},
};

use super::{account_screen, edit_screen, send_screen, AccountScreen};

/// Handle presses of the [`Menu`] buttons by editing the message that has
/// them into the requested screen.
pub async fn handle_callback_query(
    bot: Bot,
    me: Me,
    query: CallbackQuery,
    database: Arc<Database>,
    meter: UsageMeter,
) -> Result<(), BotError> {
    macro_rules! goodbye {
        ($text:expr) => {
            bot.answer_callback_query(query.id.clone())
                .text($text)
                .await?;
            return Ok(());
        };
        () => {
            bot.answer_callback_query(query.id.clone()).await?;
            return Ok(());
        };
    }

    let Some(menu) = query.data.as_deref().and_then(Menu::from_callback_data) else {
        log::debug!("Unknown callback data: {:?}", query.data);
        goodbye!();
    };

    let user = &query.from;

    let which = match menu {
        Menu::MainMenu => None,
        Menu::Stats => Some(AccountScreen::Stats),
        Menu::Referral => Some(AccountScreen::Referral),
    };

    let screen = match which {
        None => presenter::main_menu(&user.first_name, me.username()),
        Some(which) => {
            let screen = account_screen(
                &database,
                &meter,
                user.id,
                me.username(),
                which,
                usage::today(),
            )
            .await?;

            let Some(screen) = screen else {
                goodbye!(presenter::NOT_REGISTERED);
            };
            screen
        }
    };

    match &query.message {
        Some(message) => match message.regular_message() {
            Some(message) => edit_screen(&bot, message, screen).await?,
            // Too old to edit. Send it anew instead.
            None => {
                send_screen(&bot, message.chat().id, screen).await?;
            }
        },
        None => {
            // Pressed on an inline message, which this bot never sends.
            log::warn!("Callback query without a message from {}", user.id);
        }
    }

    goodbye!();
}
