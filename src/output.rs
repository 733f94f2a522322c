use crate::captions::select_track;
use crate::{CaptionCatalog, Transcript};

/// The stored content exactly as inserted, optionally followed by the summary
pub fn render_text(transcript: &Transcript, with_summary: bool) -> String {
    match (&transcript.summary, with_summary) {
        (Some(summary), true) => format!("{}\n\n--- Summary ---\n{summary}", transcript.content),
        _ => transcript.content.clone(),
    }
}

pub fn render_json(transcript: &Transcript) -> serde_json::Result<String> {
    serde_json::to_string_pretty(transcript)
}

/// Caption tracks in provider order; `*` marks the one picked when no language is requested
pub fn render_tracks(catalog: &CaptionCatalog) -> String {
    let default = select_track(&catalog.tracks).map(|t| t.language_code.as_str());
    let mut lines = Vec::with_capacity(catalog.tracks.len() + 1);
    if let Some(title) = &catalog.title {
        lines.push(title.clone());
    }
    for track in &catalog.tracks {
        let marker = if Some(track.language_code.as_str()) == default { '*' } else { ' ' };
        lines.push(format!("{marker} {:<8} {}", track.language_code, track.language_name));
    }
    lines.join("\n")
}

/// One line per row, for history and community listings
pub fn render_listing(transcripts: &[Transcript]) -> String {
    transcripts
        .iter()
        .map(|t| {
            let title = t.video_title.as_deref().unwrap_or("(untitled)");
            let summarized = if t.summary.is_some() { " [summary]" } else { "" };
            format!(
                "{}  {}  {}  {}  {title}{summarized}",
                t.id,
                t.created_at.format("%Y-%m-%d %H:%M"),
                t.video_id,
                t.language_code
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// File name for saving a transcript: the title reduced to safe characters, or the video ID
pub fn download_file_name(transcript: &Transcript) -> String {
    let stem = transcript
        .video_title
        .as_deref()
        .map(|title| {
            title
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect::<String>()
                .split('_')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("_")
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| transcript.video_id.to_string());
    format!("{stem}.txt")
}
