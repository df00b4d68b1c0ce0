pub mod convert;
pub mod rewrite;

use convert::MarkupConverter;
use rewrite::ChangesetRewriter;

/// Rewriter pre-pass followed by the generic converter.
pub struct Markup<'a> {
    pub rewriter: &'a ChangesetRewriter,
    pub converter: &'a dyn MarkupConverter,
}

impl Markup<'_> {
    pub fn convert(&self, markup: &str, page: Option<&str>) -> String {
        self.converter.convert(&self.rewriter.rewrite(markup), page)
    }
}
