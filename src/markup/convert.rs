use regex::{Captures, Regex};

/// Pure markup-to-markup conversion.
pub trait MarkupConverter {
    /// Convert `markup` to the destination dialect. `page` names the wiki page
    /// whose attachments bare `attachment:` references point at. Without a
    /// page, attachment references never produce upload links: bare names
    /// become plain text and `wiki:Page:file` links to the owning page.
    fn convert(&self, markup: &str, page: Option<&str>) -> String;
}

/// Page name Trac reserves for the wiki landing page.
pub const TRAC_START_PAGE: &str = "WikiStart";
/// Name the destination wiki uses for its landing page.
pub const HOME_PAGE: &str = "home";

/// Map a Trac wiki page name to its destination name.
pub fn destination_page_name(name: &str) -> &str {
    if name == TRAC_START_PAGE {
        HOME_PAGE
    } else {
        name
    }
}

/// Public path wiki attachments are served from once migrated. Converted
/// pages cite attachments as `{MIGRATED_UPLOADS}{page}/{file}` until the wiki
/// phase resolves them to the stored link.
pub const MIGRATED_UPLOADS: &str = "/uploads/migrated/";

const TRAC_MACROS: &[&str] = &[
    "PageOutline",
    "TOC",
    "TicketQuery",
    "RecentChanges",
    "TitleIndex",
    "Timestamp",
    "LastModified",
    "Include",
];

/// Trac wiki syntax to Markdown.
pub struct TracToMarkdown {
    wiki_base: String,
    heading: Regex,
    bullet: Regex,
    numbered: Regex,
    code_span: Regex,
    bold_italic: Regex,
    bold: Regex,
    italic: Regex,
    line_break: Regex,
    image: Regex,
    macro_call: Regex,
    double_link: Regex,
    single_link: Regex,
    bare_attachment: Regex,
    bare_ticket: Regex,
    escaped_word: Regex,
}

enum CodeBlock {
    Outside,
    Opened,
    Inside,
}

impl TracToMarkdown {
    /// `wiki_base` prefixes links to other wiki pages, e.g. `/wikis/`.
    pub fn new(wiki_base: impl Into<String>) -> Self {
        let macros = TRAC_MACROS.join("|");
        Self {
            wiki_base: wiki_base.into(),
            heading: compile(r"^\s*(={1,6})\s+(.+?)\s+=+\s*(?:#\S+)?\s*$"),
            bullet: compile(r"^(\s+)[*-]\s+(.*)$"),
            numbered: compile(r"^(\s+)(?:\d+|[a-zA-Z]|[ivxIVX]+)\.\s+(.*)$"),
            code_span: compile(r"\{\{\{(.*?)\}\}\}|`([^`]*)`"),
            bold_italic: compile(r"'''''(.+?)'''''"),
            bold: compile(r"'''(.+?)'''"),
            italic: compile(r"''(.+?)''"),
            line_break: compile(r"(?i)\[\[BR\]\]"),
            image: compile(r"\[\[Image\(([^),]+)(?:,[^)]*)?\)\]\]"),
            macro_call: compile(&format!(r"\[\[(?:{macros})(?:\([^)]*\))?\]\]")),
            double_link: compile(r"\[\[([^\]|]+?)(?:\|([^\]]+))?\]\]"),
            single_link: compile(
                r"\[((?:https?|ftp|mailto|wiki|ticket|attachment|milestone|source|changeset|report):[^\s\]]+)(?:\s+([^\]]+))?\]",
            ),
            bare_attachment: compile(r"\battachment:([^\s\]\)]+)"),
            bare_ticket: compile(r"\bticket:(\d+)"),
            escaped_word: compile(r"!([A-Z][a-z]+[A-Z]\w*)"),
        }
    }

    fn convert_line(&self, line: &str, page: Option<&str>) -> String {
        if let Some(caps) = self.heading.captures(line) {
            let level = caps[1].len();
            return format!("{} {}", "#".repeat(level), self.inline(&caps[2], page));
        }
        if let Some(caps) = self.bullet.captures(line) {
            let depth = caps[1].len().saturating_sub(1) / 2;
            return format!("{}- {}", "  ".repeat(depth), self.inline(&caps[2], page));
        }
        if let Some(caps) = self.numbered.captures(line) {
            let depth = caps[1].len().saturating_sub(1) / 2;
            return format!("{}1. {}", "  ".repeat(depth), self.inline(&caps[2], page));
        }
        self.inline(line.trim_start(), page)
    }

    /// Inline conversions, applied to everything outside code spans.
    fn inline(&self, text: &str, page: Option<&str>) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.code_span.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&self.inline_plain(&text[last..whole.start()], page));
            let code = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            out.push('`');
            out.push_str(code);
            out.push('`');
            last = whole.end();
        }
        out.push_str(&self.inline_plain(&text[last..], page));
        out
    }

    fn inline_plain(&self, text: &str, page: Option<&str>) -> String {
        let text = self.image.replace_all(text, |caps: &Captures<'_>| {
            let source = caps[1].trim();
            let label = file_label(source);
            if source.starts_with("http://") || source.starts_with("https://") {
                return format!("![{label}]({source})");
            }
            match (page, self.attachment_url(source, page)) {
                (Some(_), Some(url)) => format!("![{label}]({url})"),
                (None, Some(url)) => format!("[{label}]({url})"),
                (_, None) => format!("`{label}`"),
            }
        });
        let text = self.line_break.replace_all(&text, "<br>");
        let text = self.macro_call.replace_all(&text, "");
        let text = self.double_link.replace_all(&text, |caps: &Captures<'_>| {
            let label = caps.get(2).map(|m| m.as_str().trim());
            self.link(caps[1].trim(), label, page)
        });
        let text = self.single_link.replace_all(&text, |caps: &Captures<'_>| {
            let label = caps.get(2).map(|m| m.as_str().trim());
            self.link(&caps[1], label, page)
        });
        let text = self.bold_italic.replace_all(&text, "**_${1}_**");
        let text = self.bold.replace_all(&text, "**${1}**");
        let text = self.italic.replace_all(&text, "_${1}_");
        let text = self.bare_attachment.replace_all(&text, |caps: &Captures<'_>| {
            self.link(&format!("attachment:{}", &caps[1]), None, page)
        });
        let text = self.bare_ticket.replace_all(&text, "#$1");
        self.escaped_word.replace_all(&text, "$1").into_owned()
    }

    fn link(&self, target: &str, label: Option<&str>, page: Option<&str>) -> String {
        let (scheme, rest) = target.split_once(':').unwrap_or(("", target));
        match scheme {
            "http" | "https" | "ftp" | "mailto" => match label {
                Some(label) => format!("[{label}]({target})"),
                None => format!("<{target}>"),
            },
            "ticket" => match label {
                Some(label) => format!("{label} (#{rest})"),
                None => format!("#{rest}"),
            },
            "milestone" => format!("%\"{}\"", label.unwrap_or(rest)),
            "attachment" => {
                let url = self.attachment_url(rest, page);
                let label = label.unwrap_or(file_label(rest));
                match url {
                    Some(url) => format!("[{label}]({url})"),
                    None => format!("`{label}`"),
                }
            }
            "source" | "changeset" | "report" => label.unwrap_or(rest).to_string(),
            "wiki" => self.wiki_link(rest, label),
            _ => self.wiki_link(target, label),
        }
    }

    fn wiki_link(&self, name: &str, label: Option<&str>) -> String {
        let (name, anchor) = match name.split_once('#') {
            Some((name, anchor)) => (name, Some(anchor)),
            None => (name, None),
        };
        let target = destination_page_name(name);
        let label = label.unwrap_or(name);
        match anchor {
            Some(anchor) => format!("[{label}]({}{target}#{anchor})", self.wiki_base),
            None => format!("[{label}]({}{target})", self.wiki_base),
        }
    }

    /// `wiki:Page:file` and `ticket:N:file` name their owner; bare names belong to `page`.
    fn attachment_url(&self, reference: &str, page: Option<&str>) -> Option<String> {
        if let Some(rest) = reference.strip_prefix("wiki:")
            && let Some((owner, file)) = rest.rsplit_once(':')
        {
            return Some(match page {
                Some(_) => format!("{MIGRATED_UPLOADS}{owner}/{file}"),
                None => format!("{}{}", self.wiki_base, destination_page_name(owner)),
            });
        }
        if reference.contains(':') {
            return None;
        }
        page.map(|page| format!("{MIGRATED_UPLOADS}{page}/{reference}"))
    }
}

impl MarkupConverter for TracToMarkdown {
    fn convert(&self, markup: &str, page: Option<&str>) -> String {
        let markup = markup.replace("\r\n", "\n");
        let mut lines = Vec::new();
        let mut code = CodeBlock::Outside;
        let mut in_table = false;

        for line in markup.lines() {
            match code {
                CodeBlock::Opened => {
                    if let Some(lang) = line.strip_prefix("#!") {
                        lines.push(format!("```{}", lang.split_whitespace().next().unwrap_or("")));
                        code = CodeBlock::Inside;
                        continue;
                    }
                    lines.push("```".to_string());
                    code = CodeBlock::Inside;
                }
                CodeBlock::Inside => {}
                CodeBlock::Outside => {
                    if line.trim() == "{{{" {
                        code = CodeBlock::Opened;
                        in_table = false;
                        continue;
                    }
                }
            }

            if matches!(code, CodeBlock::Inside) {
                if line.trim() == "}}}" {
                    lines.push("```".to_string());
                    code = CodeBlock::Outside;
                } else {
                    lines.push(line.to_string());
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.starts_with("||") {
                let cells: Vec<String> = trimmed
                    .trim_start_matches("||")
                    .trim_end_matches("||")
                    .split("||")
                    .map(|cell| self.inline(cell.trim().trim_matches('=').trim(), page))
                    .collect();
                lines.push(format!("| {} |", cells.join(" | ")));
                if !in_table {
                    lines.push(format!("|{}", "---|".repeat(cells.len())));
                    in_table = true;
                }
                continue;
            }
            in_table = false;
            lines.push(self.convert_line(line, page));
        }

        if matches!(code, CodeBlock::Opened) {
            lines.push("```".to_string());
        }
        if !matches!(code, CodeBlock::Outside) {
            lines.push("```".to_string());
        }
        lines.join("\n")
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("markup pattern compiles")
}

fn file_label(reference: &str) -> &str {
    reference.rsplit([':', '/']).next().unwrap_or(reference)
}
