//! `<esi:fragment name="...">`: a named region of a document.

use crate::esi::context::ParserContext;
use crate::esi::element::{Element, ElementKind};
use crate::esi::error::EsiError;
use crate::esi::scanner;

#[derive(Debug, Default)]
pub struct FragmentElement {
    name: String,
    pub(crate) body: String,
}

impl FragmentElement {
    pub fn on_tag_start(&mut self, tag: &str) -> Result<(), EsiError> {
        self.name = scanner::parse_attributes(tag)
            .remove("name")
            .ok_or(EsiError::MissingAttribute {
                element: "fragment",
                attribute: "name",
            })?;
        Ok(())
    }

    /// Captured when an extraction is looking for this name, otherwise the
    /// body flows to the parent unchanged.
    pub fn on_tag_end(self, ctx: &mut ParserContext) -> Result<(), EsiError> {
        let wanted = matches!(
            ctx.find_ancestor(ElementKind::Include),
            Some(Element::Include(include)) if include.fragment() == Some(self.name.as_str())
        );
        if wanted && ctx.capture_fragment(self.body.clone()) {
            tracing::trace!(fragment = %self.name, "Fragment extracted");
            return Ok(());
        }
        ctx.characters(&self.body);
        Ok(())
    }
}
