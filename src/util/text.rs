use std::borrow::Cow;
use std::iter::Peekable;
use std::str::Chars;

use scraper::{ElementRef, Html, Node};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Ellipsis appended by [`truncate_to_width`]
const ELLIPSIS: &str = "...";

/// Elements nested deeper than this contribute no text.
const MAX_MARKUP_DEPTH: usize = 256;

/// Turns an episode summary's raw markup into readable plain text.
///
/// The markup is parsed as an HTML fragment, so every HTML5 character
/// reference is decoded. `<script>`/`<style>` contents are dropped, `<br>`
/// and block elements become line breaks, runs of spaces/tabs and of blank
/// lines are collapsed, and the result is trimmed.
///
/// # Examples
///
/// ```
/// use feedme::util::clean_summary;
///
/// let text = clean_summary("<p>Hello &amp; <b>welcome</b></p><script>x()</script>");
/// assert_eq!(text, "Hello & welcome");
/// ```
pub fn clean_summary(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let mut text = String::with_capacity(raw.len());
    collect_text(fragment.root_element(), 0, &mut text);
    normalize_whitespace(&text)
}

fn collect_text(element: ElementRef<'_>, depth: usize, out: &mut String) {
    if depth > MAX_MARKUP_DEPTH {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                match name {
                    "script" | "style" => continue,
                    "br" => {
                        out.push('\n');
                        continue;
                    }
                    _ => {}
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, depth + 1, out);
                }
                if breaks_line(name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn breaks_line(name: &str) -> bool {
    matches!(
        name,
        "p" | "div" | "li" | "ul" | "ol" | "tr" | "blockquote" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

/// Collapses space/tab runs to one space and blank-line runs to one blank line.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let mut collapsed = String::with_capacity(line.len());
        let mut in_space = false;
        for c in line.chars() {
            if c == ' ' || c == '\t' {
                if !in_space {
                    collapsed.push(' ');
                }
                in_space = true;
            } else {
                collapsed.push(c);
                in_space = false;
            }
        }

        if collapsed.trim().is_empty() {
            pending_blank = true;
            continue;
        }

        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        pending_blank = false;
    }

    out.trim().to_string()
}

/// SEC-001: Strips terminal control characters and ANSI escape sequences.
///
/// Feed-controlled text (titles, summaries, addresses) is printed straight to
/// the terminal, so escape sequences must not survive. Only tab and newline
/// are kept; carriage return and C1 controls (including the single-character
/// CSI/OSC introducers) are removed. Borrows when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_unsafe_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    skip_csi(&mut chars);
                }
                Some(']') => {
                    chars.next();
                    skip_osc(&mut chars);
                }
                _ => {}
            },
            '\u{9b}' => skip_csi(&mut chars),
            '\u{9d}' => skip_osc(&mut chars),
            c if is_unsafe_control(c) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_unsafe_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n')
}

/// CSI: parameters until a final byte in 0x40..=0x7e
fn skip_csi(chars: &mut Peekable<Chars<'_>>) {
    for next in chars.by_ref() {
        if ('\x40'..='\x7e').contains(&next) {
            break;
        }
    }
}

/// OSC: until BEL, ST, or ESC \
fn skip_osc(chars: &mut Peekable<Chars<'_>>) {
    while let Some(next) = chars.next() {
        if next == '\x07' || next == '\u{9c}' {
            break;
        }
        if next == '\x1b' && chars.peek() == Some(&'\\') {
            chars.next();
            break;
        }
    }
}

/// Truncates `s` to at most `max_width` terminal columns, appending "..."
/// when anything was cut. Borrows when the string already fits.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if UnicodeWidthStr::width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let ellipsis_width = ELLIPSIS.len();
    if max_width <= ellipsis_width {
        return Cow::Owned(take_columns(s, max_width).to_string());
    }

    let head = take_columns(s, max_width - ellipsis_width);
    Cow::Owned(format!("{}{}", head, ELLIPSIS))
}

fn take_columns(s: &str, columns: usize) -> &str {
    let mut width = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > columns {
            return &s[..idx];
        }
        width += w;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_summary_strips_tags_and_entities() {
        assert_eq!(
            clean_summary("<p>Tom &amp; Jerry&#39;s <em>big</em> day&#x21;</p>"),
            "Tom & Jerry's big day!"
        );
    }

    #[test]
    fn test_clean_summary_removes_script_and_style() {
        let html = "Before<SCRIPT type=\"text/javascript\">alert('x')</script> middle <style>p { color: red }</style>after";
        assert_eq!(clean_summary(html), "Before middle after");
    }

    #[test]
    fn test_clean_summary_collapses_whitespace() {
        let html = "Line one\t\t  with   gaps\n\n   \n\nLine two";
        assert_eq!(clean_summary(html), "Line one with gaps\n\nLine two");
    }

    #[test]
    fn test_clean_summary_line_breaks() {
        assert_eq!(clean_summary("<p>First</p><p>Second<br/>Third</p>"), "First\nSecond\nThird");
    }

    #[test]
    fn test_clean_summary_keeps_unknown_entities_and_stray_brackets() {
        assert_eq!(clean_summary("a &bogus; b"), "a &bogus; b");
        assert_eq!(clean_summary("3 < 4"), "3 < 4");
        assert_eq!(clean_summary("AT&T"), "AT&T");
    }

    #[test]
    fn test_clean_summary_decodes_named_references() {
        assert_eq!(
            clean_summary("<p>Caf&eacute; &rarr; Fran&ccedil;ois &euro;5 &frac12;</p>"),
            "Café → François €5 ½"
        );
        assert_eq!(clean_summary("&hellip;&mdash;&#8212;&#x2014;"), "\u{2026}\u{2014}\u{2014}\u{2014}");
    }

    #[test]
    fn test_clean_summary_unclosed_script_is_dropped() {
        assert_eq!(clean_summary("Intro<script>never closed"), "Intro");
    }

    #[test]
    fn test_clean_summary_lists_and_headings_break_lines() {
        assert_eq!(
            clean_summary("<h2>Links</h2><ul><li>One</li><li>Two</li></ul>"),
            "Links\nOne\nTwo"
        );
    }

    #[test]
    fn test_clean_summary_plain_text_unchanged() {
        assert_eq!(clean_summary("  Just text.  "), "Just text.");
    }

    #[test]
    fn test_strip_control_chars() {
        assert!(matches!(strip_control_chars("clean\ttext\n"), Cow::Borrowed(_)));
        assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_control_chars("a\x1b]0;title\x07b"), "ab");
        assert_eq!(strip_control_chars("x\x00y\x7fz"), "xyz");
    }

    #[test]
    fn test_strip_carriage_return_and_c1_controls() {
        assert_eq!(strip_control_chars("fake\rreal"), "fakereal");
        assert_eq!(strip_control_chars("a\u{9b}2Jb"), "ab");
        assert_eq!(strip_control_chars("a\u{9d}0;title\u{9c}b"), "ab");
        assert_eq!(strip_control_chars("x\u{85}y\u{90}z"), "xyz");
        assert_eq!(strip_control_chars("tab\tand\nnewline"), "tab\tand\nnewline");
    }

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("Short", 10), "Short");
        assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
        assert_eq!(truncate_to_width("Test", 2), "Te");
        assert_eq!(truncate_to_width("Test", 0), "");
    }

    #[test]
    fn test_truncate_wide_chars() {
        // Each CJK character is two columns
        assert_eq!(truncate_to_width("日本語のタイトル", 7), "日本...");
    }
}
