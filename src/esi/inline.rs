//! `<esi:inline name="..." fetchable="...">`: register content in the
//! fragment cache. Emits nothing.

use crate::cache::FragmentKey;
use crate::esi::context::ParserContext;
use crate::esi::error::EsiError;
use crate::esi::scanner;

#[derive(Debug)]
pub struct InlineElement {
    name: String,
    fetchable: bool,
    pub(crate) body: String,
}

impl Default for InlineElement {
    fn default() -> Self {
        Self {
            name: String::new(),
            fetchable: true,
            body: String::new(),
        }
    }
}

impl InlineElement {
    pub fn on_tag_start(&mut self, tag: &str) -> Result<(), EsiError> {
        let mut attributes = scanner::parse_attributes(tag);
        self.name = attributes.remove("name").ok_or(EsiError::MissingAttribute {
            element: "inline",
            attribute: "name",
        })?;
        self.fetchable = attributes
            .get("fetchable")
            .map_or(true, |v| !v.eq_ignore_ascii_case("false"));
        Ok(())
    }

    /// Store the body under the resolved name. A name that does not resolve
    /// is reported to the enclosing elements and nothing is stored.
    pub fn on_tag_end(self, ctx: &mut ParserContext) -> Result<(), EsiError> {
        let renderer = ctx.renderer();
        let url = match renderer
            .variables()
            .substitute(&self.name)
            .and_then(|resolved| renderer.resolve_url(&resolved))
        {
            Ok(url) => url,
            Err(e) => return ctx.report_error(e),
        };
        tracing::debug!(name = %url, fetchable = self.fetchable, "Inline fragment registered");
        renderer
            .cache()
            .put(FragmentKey::document(url.as_str()), self.body, None, self.fetchable);
        Ok(())
    }
}
