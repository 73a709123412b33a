//! User-facing texts and keyboards.

use super::messaging::Markup;
use crate::config::MAX_FILE_SIZE;
use crate::media::{CompressionError, ExtractionError, Platform};
use crate::storage::UserStats;
use std::fmt::Write;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Callback constants
// ─────────────────────────────────────────────────────────────────────────────

/// Callback data accepting the compression offer
pub const COMPRESS_CALLBACK_YES: &str = "compress:yes";
/// Callback data declining the compression offer
pub const COMPRESS_CALLBACK_NO: &str = "compress:no";

// ─────────────────────────────────────────────────────────────────────────────
// Texts
// ─────────────────────────────────────────────────────────────────────────────

/// `/start` greeting
pub const WELCOME: &str = "Привет! Я бот для скачивания видео.\n\n\
Отправь мне ссылку на видео с:\n\
• YouTube (включая Shorts)\n\
• TikTok\n\
• Instagram\n\n\
Я скачаю видео в лучшем качестве и отправлю тебе!\n\n\
Команды:\n\
/stats — твоя статистика скачиваний\n\
/help — помощь";

/// `/help` text
pub const HELP: &str = "Просто отправь мне ссылку на видео с YouTube, TikTok или Instagram, \
и я скачаю его для тебя в лучшем качестве.\n\n\
Поддерживаемые платформы:\n\
• YouTube — обычные видео и Shorts\n\
• TikTok — видео\n\
• Instagram — Reels и посты с видео\n\n\
Если видео больше 50 МБ, я предложу сжать его.";

/// No link in the message
pub const NO_LINK: &str = "Отправь мне ссылку на видео с YouTube, TikTok или Instagram.";
/// Link to an unsupported site
pub const UNSUPPORTED_PLATFORM: &str = "Поддерживаются только ссылки с YouTube, TikTok и Instagram.";
/// Delivery finished
pub const DONE: &str = "Готово!";
/// Delivery of a compressed copy finished
pub const DONE_COMPRESSED: &str = "Готово! Видео сжато и отправлено.";
/// Upload failed
pub const SEND_FAILED: &str = "Не удалось отправить видео.";
/// Compression started
pub const COMPRESSING: &str = "Сжимаю видео, подожди...";
/// Compression failed
pub const COMPRESS_FAILED: &str = "Не удалось сжать видео.";
/// Compressed copy still above the limit
pub const STILL_TOO_LARGE: &str =
    "Даже после сжатия файл слишком большой для отправки в Telegram (>50 МБ).";
/// Offer declined
pub const DECLINED: &str = "Хорошо, скачивание отменено.";
/// Decision arrived after the offer was superseded or already resolved
pub const REQUEST_EXPIRED: &str = "Этот запрос уже неактуален. Отправь ссылку ещё раз.";
/// Statistics could not be read
pub const STATS_UNAVAILABLE: &str = "Статистика сейчас недоступна, попробуй позже.";

/// Initial status message of a pipeline run
#[must_use]
pub fn downloading_from(platform: Platform) -> String {
    format!("Скачиваю видео с {platform}...")
}

/// Offer to compress an oversized file
#[must_use]
pub fn too_large_offer(size: u64) -> String {
    format!(
        "Видео слишком большое ({} МБ), лимит Telegram — {} МБ.\n\n\
         Хочешь, чтобы я попробовал сжать видео? (да/нет)",
        size / (1024 * 1024),
        MAX_FILE_SIZE / (1024 * 1024)
    )
}

/// Terminal message for a failed extraction
#[must_use]
pub fn extraction_failed(error: &ExtractionError) -> String {
    let reason = match error {
        ExtractionError::Unavailable => "Видео недоступно или удалено.",
        ExtractionError::Private => "Приватное видео, доступ ограничен.",
        ExtractionError::LoginRequired => "Для скачивания нужна авторизация.",
        ExtractionError::GeoRestricted => "Видео недоступно в этом регионе.",
        ExtractionError::Unknown(_) => "Видео не нашлось 😔",
    };
    format!("Ошибка: {reason}")
}

/// Terminal message for a failed compression
#[must_use]
pub fn compression_failed(error: &CompressionError) -> &'static str {
    match error {
        CompressionError::Timeout(_) => "Сжатие заняло слишком много времени, попробуй другое видео.",
        _ => COMPRESS_FAILED,
    }
}

/// `/stats` reply
#[must_use]
pub fn stats(stats: &UserStats) -> String {
    let mut out = format!(
        "Твоя статистика:\n\n\
         Всего запросов: {}\n\
         Успешных: {}\n\
         Ошибок: {}",
        stats.total, stats.success, stats.errors
    );
    if !stats.by_platform.is_empty() {
        out.push_str("\n\nПо платформам:");
        for (tag, count) in &stats.by_platform {
            let name = Platform::ALL
                .iter()
                .find(|p| p.tag() == tag.as_str())
                .map_or(tag.as_str(), |p| p.display_name());
            let _ = write!(out, "\n• {name}: {count}");
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Inline keyboard for the compress / cancel offer
#[must_use]
pub fn compress_choice_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Сжать", COMPRESS_CALLBACK_YES),
        InlineKeyboardButton::callback("Отмена", COMPRESS_CALLBACK_NO),
    ]])
}

/// Keyboard for a [`Markup`] choice
#[must_use]
pub fn keyboard(markup: Markup) -> Option<InlineKeyboardMarkup> {
    match markup {
        Markup::None => None,
        Markup::CompressChoice => Some(compress_choice_keyboard()),
    }
}
