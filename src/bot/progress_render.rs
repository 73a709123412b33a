//! Progress text: bar, sizes, speed and ETA.

use crate::media::{Platform, ProgressSnapshot, ProgressStatus};

const BAR_WIDTH: usize = 10;

/// Render the status text for the current progress snapshot.
#[must_use]
pub fn render_progress_text(snapshot: Option<&ProgressSnapshot>, platform: Platform) -> String {
    let Some(snap) = snapshot else {
        return format!("Ищу видео на {platform}...");
    };

    if snap.status == ProgressStatus::Processing {
        return "Почти готово, обрабатываю...".to_string();
    }

    let mut lines = vec![format!(
        "Скачиваю видео\n{} {:.0}%",
        progress_bar(snap.percent),
        snap.percent
    )];
    if snap.total > 0 {
        lines.push(format!(
            "{} / {}",
            format_size(snap.downloaded),
            format_size(snap.total)
        ));
    }
    lines.push(format!(
        "{} · ~{}",
        format_speed(snap.speed),
        format_eta(snap.eta)
    ));

    lines.join("\n")
}

/// Ten-cell bar of `█` and `░`
#[must_use]
pub fn progress_bar(percent: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_WIDTH as f64) as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

/// Human-readable byte count: `Б`, `КБ` or `МБ`
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} Б")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} КБ", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} МБ", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Human-readable transfer speed, `...` when unknown
#[must_use]
pub fn format_speed(speed: f64) -> String {
    if speed <= 0.0 || !speed.is_finite() {
        "...".to_string()
    } else if speed < 1024.0 {
        format!("{speed:.0} Б/с")
    } else if speed < 1024.0 * 1024.0 {
        format!("{:.0} КБ/с", speed / 1024.0)
    } else {
        format!("{:.1} МБ/с", speed / (1024.0 * 1024.0))
    }
}

/// Remaining time as `Nс` or `Nм Nс`, `...` when unknown
#[must_use]
pub fn format_eta(eta: u64) -> String {
    match eta {
        0 => "...".to_string(),
        s if s < 60 => format!("{s}с"),
        s => format!("{}м {}с", s / 60, s % 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_searching_without_snapshot() {
        assert_eq!(
            render_progress_text(None, Platform::TikTok),
            "Ищу видео на TikTok..."
        );
    }

    #[test]
    fn renders_processing() {
        let snap = ProgressSnapshot::processing();
        assert_eq!(
            render_progress_text(Some(&snap), Platform::YouTube),
            "Почти готово, обрабатываю..."
        );
    }

    #[test]
    fn renders_download_with_total() {
        let snap = ProgressSnapshot::downloading(
            5 * 1024 * 1024,
            Some(10 * 1024 * 1024),
            Some(2.0 * 1024.0 * 1024.0),
            Some(75),
        );
        let text = render_progress_text(Some(&snap), Platform::YouTube);
        assert_eq!(
            text,
            "Скачиваю видео\n█████░░░░░ 50%\n5.0 МБ / 10.0 МБ\n2.0 МБ/с · ~1м 15с"
        );
    }

    #[test]
    fn omits_sizes_when_total_unknown() {
        let snap = ProgressSnapshot::downloading(100, None, None, None);
        let text = render_progress_text(Some(&snap), Platform::Instagram);
        assert_eq!(text, "Скачиваю видео\n░░░░░░░░░░ 0%\n... · ~...");
    }

    #[test]
    fn formats_units() {
        assert_eq!(format_size(512), "512 Б");
        assert_eq!(format_size(1536), "1.5 КБ");
        assert_eq!(format_speed(500.0), "500 Б/с");
        assert_eq!(format_speed(2048.0), "2 КБ/с");
        assert_eq!(format_eta(59), "59с");
        assert_eq!(format_eta(60), "1м 0с");
        assert_eq!(progress_bar(150.0), "██████████");
        assert_eq!(progress_bar(-3.0), "░░░░░░░░░░");
    }
}
