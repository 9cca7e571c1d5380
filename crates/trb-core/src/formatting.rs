//! Formatting utilities (caption markdown → Telegram HTML).

use std::sync::OnceLock;

use regex::Regex;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

/// Escape the characters that break HTML parsing in text nodes.
fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn verbatim_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)<pre>.*?</pre>|<code>.*?</code>")
}

fn anchor_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)<a\s[^<>]*>.*?</a>")
}

/// Tags Telegram accepts in HTML parse mode. Anything else is escaped as text.
fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)</?(?:b|strong|i|em|u|ins|s|strike|del|span|tg-spoiler|tg-emoji|a|code|pre|blockquote)(?:\s[^<>]*)?>",
    )
}

/// Numeric entities plus the four named ones Telegram understands.
fn html_entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"&(?:lt|gt|amp|quot|#[0-9]+|#[xX][0-9A-Fa-f]+);")
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\[([^\]\n]+)\]\(([^)\s]+)\)")
}

/// Inline rules, applied in order. Each requires non-empty content on one line.
fn inline_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"\*\*([^*\n]+)\*\*", "<b>$1</b>"),
            (r"\*([^*\n]+)\*", "<b>$1</b>"),
            (r"__([^_\n]+)__", "<i>$1</i>"),
            (r"_([^_\n]+)_", "<i>$1</i>"),
            (r"~~([^~\n]+)~~", "<s>$1</s>"),
            (r"\|\|([^|\n]+)\|\|", "<tg-spoiler>$1</tg-spoiler>"),
        ]
        .into_iter()
        .map(|(p, r)| (Regex::new(p).expect("valid regex"), r))
        .collect()
    })
}

/// Rendered fragments parked behind `\0N\0` markers while the rest is rewritten.
#[derive(Default)]
struct Stash(Vec<String>);

impl Stash {
    fn put(&mut self, html: String) -> String {
        let idx = self.0.len();
        self.0.push(html);
        format!("\0{idx}\0")
    }

    fn park(&mut self, re: &Regex, text: &str) -> String {
        re.replace_all(text, |c: &regex::Captures| self.put(c[0].to_string()))
            .into_owned()
    }

    /// Restore newest first so fragments nested inside later ones resolve too.
    fn restore(self, mut text: String) -> String {
        for (i, html) in self.0.iter().enumerate().rev() {
            text = text.replace(&format!("\0{i}\0"), html);
        }
        text
    }
}

/// Convert caption markdown to Telegram HTML.
///
/// Covers block quotes, fenced and inline code, bold (`**x**`, `*x*`),
/// italic (`__x__`, `_x_`), strikethrough, spoiler and `[text](url)` links.
/// Supported HTML tags and entities already present in the input are left
/// alone and every other `&`, `<`, `>` is escaped, so converting converted
/// output is a no-op.
pub fn markdown_to_rich_text(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }

    let mut stash = Stash::default();

    let text = stash.park(verbatim_element_re(), input);
    let text = extract_code_blocks(&text, &mut stash);
    let text = extract_inline_codes(&text, &mut stash);
    let text = stash.park(anchor_element_re(), &text);
    let text = stash.park(html_tag_re(), &text);
    let text = stash.park(html_entity_re(), &text);

    let text = link_re()
        .replace_all(&text, |c: &regex::Captures| {
            stash.put(format!(
                r#"<a href="{}">{}</a>"#,
                escape_html(&c[2]),
                escape_text(&c[1])
            ))
        })
        .into_owned();

    // Quote markers are `>`, so quotes are rendered before escaping.
    let text = convert_blockquotes(&text, &mut stash);
    let mut text = escape_text(&text);
    for (re, rep) in inline_rules() {
        text = re.replace_all(&text, *rep).into_owned();
    }

    stash.restore(text).trim().to_string()
}

fn extract_code_blocks(input: &str, stash: &mut Stash) -> String {
    let mut out = String::new();

    let mut i = 0usize;
    while let Some(rel) = input[i..].find("```") {
        let start = i + rel;
        out.push_str(&input[i..start]);

        let mut p = start + 3;
        // Optional language identifier followed by a newline.
        let lang_end = input[p..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map(|n| p + n)
            .unwrap_or(input.len());
        if lang_end < input.len() && input.as_bytes()[lang_end] == b'\n' {
            p = lang_end + 1;
        }

        if let Some(end_rel) = input[p..].find("```") {
            let end = p + end_rel;
            let code = &input[p..end];
            out.push_str(&stash.put(format!("<pre>{}</pre>", escape_html(code))));
            i = end + 3;
            continue;
        }

        // Unclosed fence: keep the rest verbatim.
        out.push_str(&input[start..]);
        return out;
    }

    out.push_str(&input[i..]);
    out
}

fn extract_inline_codes(input: &str, stash: &mut Stash) -> String {
    let mut out = String::new();

    let mut i = 0usize;
    while let Some(rel) = input[i..].find('`') {
        let start = i + rel;
        out.push_str(&input[i..start]);

        let content_start = start + 1;
        match input[content_start..].find(['`', '\n']) {
            Some(end_rel) if input.as_bytes()[content_start + end_rel] == b'`' && end_rel > 0 => {
                let end = content_start + end_rel;
                let code = &input[content_start..end];
                out.push_str(&stash.put(format!("<code>{}</code>", escape_html(code))));
                i = end + 1;
            }
            _ => {
                out.push('`');
                i = content_start;
            }
        }
    }

    out.push_str(&input[i..]);
    out
}

fn convert_blockquotes(text: &str, stash: &mut Stash) -> String {
    let mut result: Vec<String> = Vec::new();
    let mut block_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if let Some(content) = line.strip_prefix("> ") {
            block_lines.push(content);
            continue;
        }

        if !block_lines.is_empty() {
            result.push(quote(&block_lines, stash));
            block_lines.clear();
        }
        result.push(line.to_string());
    }

    if !block_lines.is_empty() {
        result.push(quote(&block_lines, stash));
    }

    result.join("\n")
}

fn quote(lines: &[&str], stash: &mut Stash) -> String {
    let open = stash.put("<blockquote>".to_string());
    let close = stash.put("</blockquote>".to_string());
    format!("{open}{}{close}", lines.join("\n"))
}
