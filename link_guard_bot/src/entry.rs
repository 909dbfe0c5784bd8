use std::sync::Arc;
use teloxide::{dptree::deps, payloads::DeleteWebhookSetters, prelude::*};

use crate::{
    database::Database,
    handlers::{generate_bot_commands, handle_callback_query, handle_message},
    reputation::{PollPolicy, VirusTotal},
    settings::Settings,
    usage::UsageMeter,
};

/// # Panics
///
/// Panics if there's no bot token, or if the bot fails to start.
pub async fn entry() {
    log::info!("Starting up...");
    let settings = Settings::from_env().expect("Could not load settings!");
    log::debug!("{settings:?}");

    let bot = Bot::new(settings.bot_token.clone());

    // Whatever piled up while we were down is stale by now.
    bot.delete_webhook()
        .drop_pending_updates(true)
        .await
        .expect("Failed to drop pending updates!");

    bot.set_my_commands(generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    let database = Arc::new(
        Database::new(&settings.database_url)
            .await
            .expect("Failed to create database!"),
    );

    if settings.virustotal_api_key.is_none() {
        log::warn!("No VIRUSTOTAL_API_KEY set. Every link will be reported as unverified.");
    }
    let scanner = Arc::new(
        VirusTotal::new(
            settings.virustotal_api_key.clone(),
            settings.virustotal_api_url.clone(),
            PollPolicy::default(),
        )
        .expect("Failed to create the HTTP client!"),
    );

    let meter = UsageMeter::default();

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![database, scanner, meter])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
