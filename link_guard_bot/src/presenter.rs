use std::fmt::Write;

use html_escape::encode_text;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

use crate::{
    database::{CheckRecord, UserRecord},
    reputation::{ScanReport, Verdict},
    usage::{Quota, UsageMeter},
};

/// Answer to menu buttons pressed by someone who never sent `/start`.
pub const NOT_REGISTERED: &str = "Please send /start first.";

/// A message to send or to edit an existing message into.
/// Text is HTML.
#[derive(Debug, Clone)]
pub struct Screen {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl Screen {
    fn text_only(text: impl Into<String>) -> Screen {
        Screen {
            text: text.into(),
            keyboard: None,
        }
    }
}

/// Inline buttons that switch between screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    Referral,
    Stats,
    MainMenu,
}

impl Menu {
    #[must_use]
    pub fn callback_data(self) -> &'static str {
        match self {
            Menu::Referral => "referral",
            Menu::Stats => "stats",
            Menu::MainMenu => "main_menu",
        }
    }

    #[must_use]
    pub fn from_callback_data(data: &str) -> Option<Menu> {
        [Menu::Referral, Menu::Stats, Menu::MainMenu]
            .into_iter()
            .find(|menu| menu.callback_data() == data)
    }

    fn button(self, label: &str) -> InlineKeyboardButton {
        InlineKeyboardButton::callback(label.to_string(), self.callback_data().to_string())
    }
}

fn t_me(bot_username: &str) -> Url {
    let mut url = Url::parse("https://t.me/").expect("URL will always be valid");
    url.set_path(bot_username);
    url
}

/// Deep link that starts the bot with this referral code.
#[must_use]
pub fn referral_link(bot_username: &str, referral_code: &str) -> Url {
    let mut url = t_me(bot_username);
    url.query_pairs_mut().append_pair("start", referral_code);
    url
}

/// Link that offers to add the bot to a group.
#[must_use]
pub fn add_to_group_link(bot_username: &str) -> Url {
    let mut url = t_me(bot_username);
    url.query_pairs_mut().append_pair("startgroup", "true");
    url
}

fn share_link(link: &Url) -> Url {
    let mut url = Url::parse("https://t.me/share/url").expect("URL will always be valid");
    url.query_pairs_mut()
        .append_pair("url", link.as_str())
        .append_pair("text", "Check links for viruses for free!");
    url
}

fn main_keyboard(bot_username: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![Menu::Referral.button("👥 Referral program")],
        vec![Menu::Stats.button("📊 My statistics")],
        vec![InlineKeyboardButton::url(
            "➕ Add to group".to_string(),
            add_to_group_link(bot_username),
        )],
    ])
}

/// Reply to `/start`.
#[must_use]
pub fn welcome(first_name: &str, bot_username: &str, meter: &UsageMeter) -> Screen {
    let mut text = format!(
        "🛡️ Welcome, {}!\n\n\
        I can check any link for viruses and phishing.\n\n\
        📊 You have {} free checks per day.\n",
        encode_text(first_name),
        meter.daily_free_checks,
    );
    if meter.referral_bonus > 0 {
        let _ = writeln!(
            text,
            "👥 Invite friends to get {} more checks per day for each!",
            meter.referral_bonus
        );
    } else {
        text.push_str("👥 Invite friends to keep them safe too!\n");
    }
    text.push_str("\nJust send me a link, or add me to a group.");

    Screen {
        text,
        keyboard: Some(main_keyboard(bot_username)),
    }
}

#[must_use]
pub fn main_menu(first_name: &str, bot_username: &str) -> Screen {
    Screen {
        text: format!(
            "🛡️ Main menu, {}!\n\n\
            I can check any link for viruses.\n\n\
            Just send me a link.",
            encode_text(first_name)
        ),
        keyboard: Some(main_keyboard(bot_username)),
    }
}

/// Reply to messages with no links in them.
#[must_use]
pub fn hint() -> Screen {
    Screen::text_only("🔍 Send me a link to check.\nFor example: https://example.com")
}

#[must_use]
pub fn quota_exhausted(meter: &UsageMeter, quota: &Quota) -> Screen {
    let mut text = format!(
        "⚠️ You have used all {} free checks for today.\n",
        quota.limit
    );
    if meter.referral_bonus > 0 {
        text.push_str("Invite a friend to get more!");
    } else {
        text.push_str("Come back tomorrow, or invite a friend to keep them safe too!");
    }

    Screen {
        text,
        keyboard: Some(InlineKeyboardMarkup::new(vec![vec![
            Menu::Referral.button("👥 Invite a friend"),
        ]])),
    }
}

/// Result of checking one link.
#[must_use]
pub fn verdict(report: &ScanReport) -> Screen {
    let url = encode_text(&report.url);
    let text = match report.verdict {
        Verdict::Malicious { .. } => format!(
            "🚨 <b>WARNING! THREAT DETECTED!</b>\n\n\
            Link: {url}\n\
            Status: ⚠️ {}\n\n\
            ❌ <b>Do not open this link!</b>",
            report.verdict
        ),
        Verdict::Clean => format!(
            "✅ <b>Link is safe</b>\n\n\
            Link: {url}\n\
            Status: {}",
            report.verdict
        ),
        Verdict::Unknown => format!(
            "❔ <b>Could not verify this link</b>\n\n\
            Link: {url}\n\
            Status: {}\n\n\
            The scan didn't finish in time or the service is unavailable. \
            This does <b>not</b> mean the link is safe.",
            report.verdict
        ),
    };

    Screen::text_only(text)
}

#[must_use]
pub fn referral(user: &UserRecord, bot_username: &str, meter: &UsageMeter) -> Screen {
    let link = referral_link(bot_username, &user.referral_code);

    let mut text = String::from("👥 <b>Referral program</b>\n\n");
    if meter.referral_bonus > 0 {
        let _ = write!(
            text,
            "Invite friends and get bonuses:\n• +{} checks per day for each friend\n\n",
            meter.referral_bonus
        );
    } else {
        text.push_str("Invite friends so they can check links too.\n\n");
    }
    let _ = write!(
        text,
        "📊 You have invited: <b>{} friends</b>\n\n\
        🔗 Your referral link:\n{}\n\n\
        <i>Just send this link to your friends!</i>",
        user.referral_count,
        encode_text(link.as_str()),
    );

    Screen {
        text,
        keyboard: Some(InlineKeyboardMarkup::new(vec![
            vec![InlineKeyboardButton::url(
                "🔗 Share link".to_string(),
                share_link(&link),
            )],
            vec![Menu::MainMenu.button("◀️ Back")],
        ])),
    }
}

/// Account overview, with the latest few entries of the check history.
#[must_use]
pub fn stats(user: &UserRecord, quota: &Quota, recent: &[CheckRecord]) -> Screen {
    let mut text = format!(
        "📊 <b>Your statistics</b>\n\n\
        ✅ Total checks: <b>{}</b>\n\
        📅 Used today: <b>{}/{}</b>\n\
        💎 Left today: <b>{}</b>\n\
        👥 Friends invited: <b>{}</b>\n\
        📅 With the bot since: {}",
        user.total_checks,
        quota.used,
        quota.limit,
        quota.remaining,
        user.referral_count,
        user.joined_date.format("%Y-%m-%d"),
    );

    if !recent.is_empty() {
        text.push_str("\n\n🕘 <b>Recent checks:</b>");
        for check in recent {
            let mark = if check.is_malicious { "🚨" } else { "•" };
            let _ = write!(
                text,
                "\n{mark} {} <i>({})</i>",
                encode_text(&check.url),
                check.checked_at.format("%Y-%m-%d %H:%M"),
            );
        }
    }

    Screen {
        text,
        keyboard: Some(InlineKeyboardMarkup::new(vec![
            vec![Menu::Referral.button("👥 Referral program")],
            vec![Menu::MainMenu.button("◀️ Back")],
        ])),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use teloxide::types::{InlineKeyboardButtonKind, UserId};

    use super::*;
    use crate::database::DisplayName;

    fn user() -> UserRecord {
        UserRecord {
            user_id: UserId(42),
            name: DisplayName::default(),
            daily_checks: 2,
            last_check_date: None,
            total_checks: 17,
            referral_code: "ref_42".to_string(),
            referred_by: None,
            referral_count: 3,
            joined_date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn callback_datas(screen: &Screen) -> Vec<String> {
        screen
            .keyboard
            .iter()
            .flat_map(|k| k.inline_keyboard.iter().flatten())
            .filter_map(|button| match &button.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn menu_callback_data() {
        for menu in [Menu::Referral, Menu::Stats, Menu::MainMenu] {
            assert_eq!(Menu::from_callback_data(menu.callback_data()), Some(menu));
        }
        assert_eq!(Menu::from_callback_data("URL_SPAM"), None);
    }

    #[test]
    fn links() {
        assert_eq!(
            referral_link("Guard_Bot", "ref_42").as_str(),
            "https://t.me/Guard_Bot?start=ref_42"
        );
        assert_eq!(
            add_to_group_link("Guard_Bot").as_str(),
            "https://t.me/Guard_Bot?startgroup=true"
        );
    }

    #[test]
    fn names_are_escaped() {
        let screen = welcome("<b>Bobby</b>", "Guard_Bot", &UsageMeter::default());
        assert!(screen.text.contains("&lt;b&gt;Bobby&lt;/b&gt;"));
        assert!(!screen.text.contains("<b>Bobby"));
        assert_eq!(callback_datas(&screen), ["referral", "stats"]);
    }

    #[test]
    fn bonus_is_only_advertised_when_real() {
        let parity = UsageMeter::default();
        assert!(!welcome("A", "B", &parity).text.contains("more checks"));
        assert!(!referral(&user(), "B", &parity).text.contains("checks per day"));

        let bonus = UsageMeter {
            daily_free_checks: 5,
            referral_bonus: 5,
        };
        assert!(welcome("A", "B", &bonus).text.contains("5 more checks per day"));
        assert!(referral(&user(), "B", &bonus).text.contains("+5 checks per day"));
    }

    #[test]
    fn verdict_screens() {
        let malicious = verdict(&ScanReport {
            url: "http://evil.test/?a=1&b=<2>".to_string(),
            verdict: Verdict::Malicious { engines: 4 },
        });
        assert!(malicious.text.contains("THREAT DETECTED"));
        assert!(malicious.text.contains("http://evil.test/?a=1&amp;b=&lt;2&gt;"));

        let clean = verdict(&ScanReport {
            url: "https://ok.test".to_string(),
            verdict: Verdict::Clean,
        });
        assert!(clean.text.contains("Link is safe"));

        let unknown = verdict(&ScanReport {
            url: "https://ok.test".to_string(),
            verdict: Verdict::Unknown,
        });
        assert!(unknown.text.contains("Could not verify"));
        assert!(!unknown.text.contains("Link is safe"));
    }

    #[test]
    fn stats_screen() {
        let quota = Quota {
            used: 2,
            remaining: 3,
            limit: 5,
        };
        let screen = stats(&user(), &quota, &[]);
        assert!(screen.text.contains("Total checks: <b>17</b>"));
        assert!(screen.text.contains("Used today: <b>2/5</b>"));
        assert!(screen.text.contains("Left today: <b>3</b>"));
        assert!(screen.text.contains("Friends invited: <b>3</b>"));
        assert!(screen.text.contains("2024-01-02"));
        assert!(!screen.text.contains("Recent checks"));
        assert_eq!(callback_datas(&screen), ["referral", "main_menu"]);
    }

    #[test]
    fn stats_screen_lists_recent_checks() {
        let quota = Quota {
            used: 2,
            remaining: 3,
            limit: 5,
        };
        let check = |id, url: &str, is_malicious| CheckRecord {
            id,
            user_id: UserId(42),
            url: url.to_string(),
            result: String::new(),
            is_malicious,
            checked_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        };
        let recent = [
            check(2, "https://evil.test/?a=1&b=<2>", true),
            check(1, "https://ok.test", false),
        ];

        let text = stats(&user(), &quota, &recent).text;
        assert!(text.contains("Recent checks"));
        assert!(text.contains("🚨 https://evil.test/?a=1&amp;b=&lt;2&gt; <i>(2024-03-01 12:30)</i>"));
        assert!(text.contains("• https://ok.test"));
        let evil = text.find("evil.test").unwrap();
        let ok = text.find("ok.test").unwrap();
        assert!(evil < ok);
    }

    #[test]
    fn quota_exhausted_offers_referral() {
        let quota = Quota {
            used: 5,
            remaining: 0,
            limit: 5,
        };
        let screen = quota_exhausted(&UsageMeter::default(), &quota);
        assert!(screen.text.contains("all 5 free checks"));
        assert_eq!(callback_datas(&screen), ["referral"]);
    }
}
