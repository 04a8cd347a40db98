//! Terminal rendering for plans, acknowledgements and tapped URLs

use colored::{ColoredString, Colorize};
use ntagkit_ntag424::{Ack, SdmLayout};

/// Kind of a one-line message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Something completed
    Done,
    /// Something the operator should look at
    Warn,
    /// Neutral remark
    Note,
}

/// Underlined section heading, preceded by a blank line
pub fn heading(title: &str) -> String {
    format!("\n{}", title.bold().underline())
}

/// One message line in the given tone
pub fn line(tone: Tone, message: &str) -> String {
    match tone {
        Tone::Done => format!("{} {}", "✔".green().bold(), message.green()),
        Tone::Warn => format!("{} {}", "!".yellow().bold(), message.yellow()),
        Tone::Note => format!("{} {}", "·".blue().bold(), message),
    }
}

/// Labelled values under a title, labels padded to a common column
pub fn fields(title: &str, items: &[(&str, String)]) -> String {
    let width = items.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let mut out = title.bold().underline().to_string();
    for (label, value) in items {
        let label = format!("{label:<width$}");
        out.push_str(&format!("\n  {}  {value}", label.bold()));
    }
    out
}

/// Numbered acknowledged steps followed by the closing summary
pub fn ack(ack: &Ack) -> String {
    let mut out = String::new();
    for (i, step) in ack.steps.iter().enumerate() {
        out.push_str(&format!("  {:>2}. {step}\n", i + 1));
    }
    out.push_str(&line(
        Tone::Done,
        &format!(
            "{} steps acknowledged, command counter at {}",
            ack.steps.len(),
            ack.final_counter
        ),
    ));
    if ack.session_ended {
        out.push('\n');
        out.push_str(&line(Tone::Note, "authenticated key changed, the tag closed the session"));
    }
    out
}

fn paint(name: &str, window: &str) -> ColoredString {
    match name {
        "UID" => window.cyan(),
        "read counter" => window.magenta(),
        "MAC" => window.yellow(),
        _ => window.green(),
    }
}

/// `url` with every mirror window of `layout` highlighted
///
/// Falls back to the bare URL when a window does not fit it.
pub fn mirrored_url(url: &str, layout: &SdmLayout) -> String {
    let mut windows = layout.windows();
    windows.sort_by_key(|&(_, offset, _)| offset);

    let mut out = String::with_capacity(url.len());
    let mut at = 0;
    for (name, offset, len) in windows {
        let (Some(plain), Some(window)) = (url.get(at..offset), url.get(offset..offset + len))
        else {
            return url.to_string();
        };
        out.push_str(plain);
        out.push_str(&paint(name, window).to_string());
        at = offset + len;
    }
    out.push_str(url.get(at..).unwrap_or_default());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrored_url_keeps_text() {
        colored::control::set_override(false);
        let layout = SdmLayout::plain(7, 4, 18).with_mac(4, 24);
        let url = "u?s=048D58D2142290000001F00DF00DF00DF00D";
        assert_eq!(mirrored_url(url, &layout), url);
        assert_eq!(mirrored_url("too short", &layout), "too short");
    }

    #[test]
    fn test_fields_align_labels() {
        colored::control::set_override(false);
        let out = fields("Plan", &[("File", "2".into()), ("Commands", "3".into())]);
        assert_eq!(out, "Plan\n  File      2\n  Commands  3");
    }
}
