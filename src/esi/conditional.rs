//! `<esi:choose>`, `<esi:when test="...">` and `<esi:otherwise>`.
//!
//! The first `when` whose test is true wins; `otherwise` runs only when no
//! branch matched before it. Inactive branches are foreign, so directives in
//! them are never executed.

use crate::esi::context::ParserContext;
use crate::esi::element::{BranchElement, Element, ElementKind};
use crate::esi::error::EsiError;
use crate::esi::expression;
use crate::esi::scanner;

#[derive(Debug, Default)]
pub struct ChooseElement {
    matched: bool,
    pub(crate) output: String,
}

impl ChooseElement {
    /// The `choose` a branch belongs to.
    pub fn enclosing(ctx: &mut ParserContext, child: ElementKind) -> Result<&mut ChooseElement, EsiError> {
        match ctx.find_ancestor_mut(ElementKind::Choose) {
            Some(Element::Choose(choose)) => Ok(choose),
            _ => Err(EsiError::Structural(format!(
                "<esi:{}> outside <esi:choose>",
                child.name()
            ))),
        }
    }

    /// Claim the branch slot if nothing matched yet and `condition` holds.
    pub fn take_branch(&mut self, condition: bool) -> bool {
        if self.matched || !condition {
            return false;
        }
        self.matched = true;
        true
    }
}

#[derive(Debug, Default)]
pub struct WhenElement {
    pub(crate) branch: BranchElement,
}

impl WhenElement {
    pub fn on_tag_start(&mut self, tag: &str, ctx: &mut ParserContext) -> Result<(), EsiError> {
        let test = scanner::parse_attributes(tag)
            .remove("test")
            .ok_or(EsiError::MissingAttribute {
                element: "when",
                attribute: "test",
            })?;
        // Only evaluated while no earlier branch has matched.
        let pending = !ChooseElement::enclosing(ctx, ElementKind::When)?.matched;
        let condition = pending && expression::evaluate(&test, &ctx.renderer().variables())?;
        self.branch.active = ChooseElement::enclosing(ctx, ElementKind::When)?.take_branch(condition);
        Ok(())
    }
}
