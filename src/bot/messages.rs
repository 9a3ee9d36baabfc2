//! Everything the bot says, and parsing of what users send it

use super::transport::Choice;
use crate::download::{Delivery, DownloadError};
use crate::extraction::{ExtractionError, ExtractionFailureKind, Variant};
use crate::humanize::ByteSize;
use crate::pipeline::{Offer, PipelineError};
use crate::session::SessionError;
use crate::staging::PurgeStats;

const MAX_DETAIL_CHARS: usize = 200;
const PICK_PREFIX: &str = "pick";

pub const HELP: &str = "👋 Send me a video link and I'll list the available qualities.\n\
Pick one and I'll reply with a download link.\n\n\
/clear removes the files I prepared for you.";

pub const PROCESSING: &str = "🔍 Processing link…";
pub const UNKNOWN_CHOICE: &str = "Unknown choice";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Url(String),
    Ignored,
}

/// Classify inbound text. Anything that is neither a known command nor
/// starts with `http` is ignored.
pub fn parse_text(text: &str) -> Inbound {
    let text = text.trim();

    if let Some(command) = text.strip_prefix('/') {
        let word = command.split_whitespace().next().unwrap_or("");
        // "/start@reelbox_bot" in group chats
        let word = word.split('@').next().unwrap_or(word);
        return match word.to_ascii_lowercase().as_str() {
            "start" => Inbound::Command(Command::Start),
            "help" => Inbound::Command(Command::Help),
            "clear" => Inbound::Command(Command::Clear),
            _ => Inbound::Ignored,
        };
    }

    if text.starts_with("http") {
        let url = text.split_whitespace().next().unwrap_or(text);
        return Inbound::Url(url.to_string());
    }

    Inbound::Ignored
}

/// Callback payload binding a button to the shortlist it was rendered from
pub fn pick_data(generation: u64, index: usize) -> String {
    format!("{PICK_PREFIX}:{generation}:{index}")
}

pub fn parse_pick(data: &str) -> Option<(u64, usize)> {
    let mut parts = data.split(':');
    if parts.next()? != PICK_PREFIX {
        return None;
    }
    let generation = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((generation, index))
}

pub fn choice_label(variant: &Variant) -> String {
    match variant.height {
        Some(height) => format!("📥 {height}p ({})", variant.extension),
        None => format!("📥 {} ({})", variant.id, variant.extension),
    }
}

pub fn choices(offer: &Offer) -> Vec<Choice> {
    offer
        .shortlist
        .iter()
        .enumerate()
        .map(|(index, variant)| Choice {
            label: choice_label(variant),
            data: pick_data(offer.generation, index),
        })
        .collect()
}

fn display_title(title: &str) -> &str {
    let title = title.trim();
    if title.is_empty() { "Untitled" } else { title }
}

pub fn offer_text(offer: &Offer) -> String {
    format!("🎬 {}\n\nChoose a quality:", display_title(&offer.title))
}

pub fn no_formats(offer: &Offer) -> String {
    format!(
        "🎬 {}\n\n❌ No downloadable video quality was found for this link.",
        display_title(&offer.title)
    )
}

pub fn downloading(height: Option<u32>) -> String {
    match height {
        Some(h) => format!("⬇️ Downloading {h}p…"),
        None => "⬇️ Downloading…".to_string(),
    }
}

pub fn delivered(delivery: &Delivery) -> String {
    format!(
        "✅ {}\nSize: {}\n\n{}",
        display_title(&delivery.title),
        ByteSize(delivery.file.size),
        delivery.link
    )
}

pub fn cleared(stats: PurgeStats) -> String {
    match stats.files_removed {
        0 => "🧹 Nothing to clear.".to_string(),
        1 => format!("🧹 Removed 1 file ({}).", ByteSize(stats.bytes_freed)),
        n => format!("🧹 Removed {n} files ({}).", ByteSize(stats.bytes_freed)),
    }
}

/// One fixed sentence per failure kind, plus a scrubbed detail line where useful
pub fn failure(error: &PipelineError) -> String {
    let (headline, detail): (&str, Option<&str>) = match error {
        PipelineError::Extraction(ExtractionError::Failed { kind, attempts }) => {
            let detail = attempts.last().map(|a| a.detail.as_str());
            let headline = match kind {
                ExtractionFailureKind::MalformedInput => "❌ That doesn't look like a valid link.",
                ExtractionFailureKind::UnsupportedSource => {
                    "❌ This site or video isn't supported."
                }
                ExtractionFailureKind::BackendUnavailable => {
                    "⚠️ The downloader is unavailable right now. Please try again later."
                }
                ExtractionFailureKind::AccessRestricted => {
                    "🔒 The site asked for verification. The bot's credentials need refreshing, please try again later."
                }
                ExtractionFailureKind::NoViableFormat => {
                    "❌ Couldn't find a downloadable video at that link."
                }
            };
            (headline, detail)
        }
        PipelineError::Extraction(ExtractionError::Cancelled)
        | PipelineError::Download(DownloadError::Cancelled)
        | PipelineError::ShuttingDown => (
            "⚠️ The bot is restarting. Please try again in a moment.",
            None,
        ),
        PipelineError::Selection(SessionError::StaleSelection | SessionError::NotFound(_))
        | PipelineError::Download(DownloadError::StaleSelection) => (
            "⌛ That choice has expired. Send the link again.",
            None,
        ),
        PipelineError::Download(DownloadError::Failed { cause, .. }) => {
            ("❌ Download failed.", Some(cause.detail.as_str()))
        }
        PipelineError::Download(DownloadError::Staging(_)) => (
            "⚠️ Storage is unavailable right now. Please try again later.",
            None,
        ),
        PipelineError::TimedOut(_) => ("⌛ That took too long and was stopped. Please try again.", None),
    };

    match detail.map(scrub).filter(|d| !d.is_empty()) {
        Some(detail) => format!("{headline}\nDetails: {detail}"),
        None => headline.to_string(),
    }
}

/// Strip filesystem paths and credential-looking tokens, then bound the length.
pub fn scrub(detail: &str) -> String {
    let cleaned: Vec<&str> = detail
        .split_whitespace()
        .map(|word| {
            if looks_like_path(word) {
                "<path>"
            } else if looks_like_secret(word) {
                "<redacted>"
            } else {
                word
            }
        })
        .collect();
    truncate(&cleaned.join(" "), MAX_DETAIL_CHARS)
}

/// Any separator-bearing word that is not a URL, relative paths included
fn looks_like_path(word: &str) -> bool {
    let word = word.trim_matches(|c: char| matches!(c, '\'' | '"' | '(' | ')' | ',' | ':' | ';'));
    if word.contains("://") {
        return false;
    }
    (word.contains('/') && word.len() > 1) || word.contains('\\')
}

fn looks_like_secret(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    const MARKERS: &[&str] = &["token=", "key=", "password=", "secret=", "sig=", "cookie"];
    if MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }

    // Bot tokens: "<digits>:<long base64url>"
    match word.split_once(':') {
        Some((id, rest)) => {
            id.len() >= 6
                && id.chars().all(|c| c.is_ascii_digit())
                && rest.len() >= 30
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
