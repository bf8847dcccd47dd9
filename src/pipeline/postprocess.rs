//! Normalisation of one batch's VLM output before it joins the document.
//!
//! Models occasionally ignore formatting instructions: they wrap the answer
//! in a ```` ```markdown ```` fence, emit `\r\n`, pad lines with spaces, or
//! leave zero-width characters from the PDF text layer. Each fix below is a
//! pure `&str -> String` pass applied in a fixed order. None of them rewrites
//! the wording, tables or links the model produced.
//!
//! The result is trimmed on both ends. Sections are separated by the
//! assembler with a `---` line, so a section must not carry its own leading
//! or trailing blank lines, nor a bare `---` line of its own.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement for a dash-only line. Still a Markdown thematic break, but
/// never mistaken for a section boundary.
pub const NEUTRAL_RULE: &str = "* * *";

/// Clean one batch's raw output.
///
/// Order matters: the outer fence is detected on the untouched text, line
/// endings are unified before any per-line rule, invisible characters go
/// before dash rules are recognised, and trimming runs last.
pub fn normalize_batch_output(raw: &str) -> String {
    let s = strip_outer_fence(raw);
    let s = unify_line_endings(&s);
    let s = trim_line_ends(&s);
    let s = strip_invisible(&s);
    let s = neutralize_dash_rules(&s);
    s.trim().to_string()
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_FENCED.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn unify_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn strip_invisible(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

/// `---`, `- - -`, `-----`: three or more dashes, optionally spaced, with at
/// most three spaces of indent.
fn is_dash_rule(line: &str) -> bool {
    let body = line.trim_start_matches(' ');
    if line.len() - body.len() > 3 {
        return false;
    }
    let body = body.trim_end();
    body.chars().filter(|&c| c == '-').count() >= 3
        && body.chars().all(|c| matches!(c, '-' | ' ' | '\t'))
}

/// Rewrite dash-only lines outside fenced code to [`NEUTRAL_RULE`].
///
/// Models like to mark page breaks with `---`, which is exactly the line the
/// assembler places between sections. Code blocks are left alone.
fn neutralize_dash_rules(input: &str) -> String {
    let mut in_fence = false;
    input
        .lines()
        .map(|line| {
            let t = line.trim_start();
            if t.starts_with("```") || t.starts_with("~~~") {
                in_fence = !in_fence;
                line
            } else if !in_fence && is_dash_rule(line) {
                NEUTRAL_RULE
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
