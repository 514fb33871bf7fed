//! crates/amibuddy_core/src/phrases.rs
//!
//! Localized sentences the lesson speaks or shows.

use crate::domain::Locale;

const ENCOURAGEMENTS_EN: [&str; 5] = [
    "Great job! You are amazing!",
    "Wonderful! I can see your effort!",
    "Awesome! You are very smart!",
    "You did it! You are a star!",
    "Wow! I am impressed by your hard work!",
];

const ENCOURAGEMENTS_JA: [&str; 5] = [
    "よくがんばりました！あなたはすごいです！",
    "すばらしい！あなたのどりょくがみえます！",
    "さいこうです！あなたはとてもかしこいです！",
    "がんばりましたね！あなたはスターです！",
    "すごい！あなたのがんばりにかんどうしました！",
];

/// Messages spoken when a lesson is finished.
pub fn encouragements(locale: Locale) -> &'static [&'static str] {
    match locale {
        Locale::English => &ENCOURAGEMENTS_EN,
        Locale::Japanese => &ENCOURAGEMENTS_JA,
    }
}

/// Stands in for the child's question when transcription fails.
pub fn placeholder_question(locale: Locale) -> &'static str {
    match locale {
        Locale::English => "How do I solve this problem?",
        Locale::Japanese => "この問題はどうやって解きますか？",
    }
}

/// Used when the conversation model returns an empty answer.
pub fn reply_fallback(locale: Locale) -> &'static str {
    match locale {
        Locale::English => "Sorry, I didn't quite understand.",
        Locale::Japanese => "ごめんね、わかりませんでした。",
    }
}

/// Prefixes `text` with the user's name so the buddy talks to them directly.
pub fn personalize(display_name: Option<&str>, text: &str, locale: Locale) -> String {
    match display_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => match locale {
            Locale::English => format!("{}, {}", name, text),
            Locale::Japanese => format!("{}さん、{}", name, text),
        },
        None => text.to_string(),
    }
}

pub fn upgrade_prompt(locale: Locale, free_limit: u32) -> String {
    match locale {
        Locale::English => format!(
            "You have used your {} free homeworks. Upgrade to Premium for unlimited access!",
            free_limit
        ),
        Locale::Japanese => format!(
            "むりょうの しゅくだい {}かいを つかいきりました。プレミアムで むせいげんに つかえます！",
            free_limit
        ),
    }
}

/// Which user-facing banner to show for a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureNotice {
    Analysis,
    Recording,
    VoiceProcessing,
    Review,
    Playback,
    Save,
    Configuration,
    NotNow,
}

pub fn failure_message(notice: FailureNotice, locale: Locale) -> &'static str {
    match (notice, locale) {
        (FailureNotice::Analysis, Locale::English) => "We couldn't analyze the homework.",
        (FailureNotice::Analysis, Locale::Japanese) => "宿題の分析ができませんでした",
        (FailureNotice::Recording, Locale::English) => "We couldn't record your voice.",
        (FailureNotice::Recording, Locale::Japanese) => "音声を録音できませんでした",
        (FailureNotice::VoiceProcessing, Locale::English) => {
            "We couldn't process your question."
        }
        (FailureNotice::VoiceProcessing, Locale::Japanese) => "音声の処理ができませんでした",
        (FailureNotice::Review, Locale::English) => "We couldn't review the homework.",
        (FailureNotice::Review, Locale::Japanese) => "宿題のレビューができませんでした",
        (FailureNotice::Playback, Locale::English) => "Voice playback failed.",
        (FailureNotice::Playback, Locale::Japanese) => "音声の再生に失敗しました",
        (FailureNotice::Save, Locale::English) => "Failed to save.",
        (FailureNotice::Save, Locale::Japanese) => "ほぞんに しっぱいしました",
        (FailureNotice::Configuration, Locale::English) => {
            "This feature is not set up yet."
        }
        (FailureNotice::Configuration, Locale::Japanese) => {
            "この きのうは まだ つかえません"
        }
        (FailureNotice::NotNow, Locale::English) => "Please wait a moment and try again.",
        (FailureNotice::NotNow, Locale::Japanese) => "すこし まってから もういちど ためしてね",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personalize_prefixes_name_per_locale() {
        assert_eq!(
            personalize(Some("Mia"), "Let's start!", Locale::English),
            "Mia, Let's start!"
        );
        assert_eq!(
            personalize(Some("ミア"), "はじめよう！", Locale::Japanese),
            "ミアさん、はじめよう！"
        );
    }

    #[test]
    fn personalize_ignores_missing_or_blank_names() {
        assert_eq!(personalize(None, "Hi", Locale::English), "Hi");
        assert_eq!(personalize(Some("   "), "Hi", Locale::English), "Hi");
    }

    #[test]
    fn every_locale_has_encouragements() {
        for locale in [Locale::English, Locale::Japanese] {
            assert_eq!(encouragements(locale).len(), 5);
        }
    }
}
