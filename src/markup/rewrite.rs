use regex::{Captures, Regex};

/// Rewrites Trac changeset citations into text the generic converter can
/// handle. Must run before [`super::convert::MarkupConverter::convert`].
pub struct ChangesetRewriter {
    quoted: Regex,
    inline: Regex,
}

impl ChangesetRewriter {
    pub fn new() -> Self {
        let quoted = Regex::new(
            r#"(?sm)In \[changeset:"([^"/]+?)(?:/[^"]+)?"\]:\n\{\{\{(\n#![^\n]+)?\n(.*?)\n\}\}\}"#,
        )
        .expect("changeset citation pattern compiles");
        let inline = Regex::new(r"\[changeset:([a-zA-Z0-9]+)\]")
            .expect("changeset reference pattern compiles");
        Self { quoted, inline }
    }

    pub fn rewrite(&self, markup: &str) -> String {
        let cited = self.quoted.replace_all(markup, |caps: &Captures<'_>| {
            format!("In changeset {}:\n> {}", &caps[1], caps[3].replace('\n', "\n> "))
        });
        self.inline.replace_all(&cited, "$1").into_owned()
    }
}

impl Default for ChangesetRewriter {
    fn default() -> Self {
        Self::new()
    }
}
