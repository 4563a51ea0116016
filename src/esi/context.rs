//! Element stack for one parse.
//!
//! The stack is owned by a single render call. A frame is pushed when a start
//! tag is processed and popped only by the end tag of the same directive, so
//! a successful parse always ends with an empty stack.
//!
//! The root is not on the stack. It receives characters when the stack is
//! empty and, in an extraction pass, answers ancestor queries for `include`
//! with the fragment being extracted.

use crate::esi::element::{Element, ElementKind, ElementType};
use crate::esi::error::EsiError;
use crate::esi::include::IncludeElement;
use crate::esi::renderer::Renderer;
use crate::esi::scanner;

#[derive(Debug)]
struct Frame {
    element_type: ElementType,
    element: Element,
}

/// Implicit outermost element.
#[derive(Debug)]
pub enum Root {
    /// Normal render: characters are the output.
    Document { out: String },
    /// Fragment extraction: characters are dropped; the body of the wanted
    /// `<esi:fragment>` is captured.
    Extract {
        probe: Element,
        found: Option<String>,
    },
}

impl Root {
    pub fn document() -> Self {
        Root::Document { out: String::new() }
    }

    pub fn extract(name: &str) -> Self {
        Root::Extract {
            probe: Element::Include(IncludeElement::extraction(name)),
            found: None,
        }
    }

    /// Composed output of a document pass or the captured fragment.
    pub fn into_output(self) -> Option<String> {
        match self {
            Root::Document { out } => Some(out),
            Root::Extract { found, .. } => found,
        }
    }

    fn characters(&mut self, text: &str) {
        if let Root::Document { out } = self {
            out.push_str(text);
        }
    }
}

#[derive(Debug)]
pub struct ParserContext {
    renderer: Renderer,
    stack: Vec<Frame>,
    root: Root,
    /// Same-directive start tags seen inside the foreign top element.
    foreign_depth: usize,
}

impl ParserContext {
    pub fn new(renderer: Renderer, root: Root) -> Self {
        Self {
            renderer,
            stack: Vec::new(),
            root,
            foreign_depth: 0,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Run the start handler, then push. Returns whether the tag closed
    /// itself, in which case the caller ends the element right away.
    pub fn start_element(
        &mut self,
        element_type: ElementType,
        mut element: Element,
        tag: &str,
    ) -> Result<bool, EsiError> {
        element.on_tag_start(tag, self)?;
        self.stack.push(Frame { element_type, element });
        Ok(scanner::is_self_closing(tag))
    }

    /// Pop the top element and run its end handler.
    pub async fn end_element(&mut self, tag: &str) -> Result<(), EsiError> {
        let Some(frame) = self.stack.pop() else {
            return Err(EsiError::Structural(format!("unexpected {}", tag)));
        };
        self.foreign_depth = 0;
        frame.element.on_tag_end(tag, self).await
    }

    /// Write to the innermost element, or to the root.
    pub fn characters(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.stack.last_mut() {
            Some(frame) => frame.element.characters(text),
            None => self.root.characters(text),
        }
    }

    /// Innermost element of `kind`, falling back to the root probe.
    pub fn find_ancestor(&self, kind: ElementKind) -> Option<&Element> {
        self.stack
            .iter()
            .rev()
            .map(|frame| &frame.element)
            .find(|element| element.kind() == kind)
            .or_else(|| match &self.root {
                Root::Extract { probe, .. } if probe.kind() == kind => Some(probe),
                _ => None,
            })
    }

    /// Innermost stacked element of `kind`. The root is not considered.
    pub fn find_ancestor_mut(&mut self, kind: ElementKind) -> Option<&mut Element> {
        self.stack
            .iter_mut()
            .rev()
            .map(|frame| &mut frame.element)
            .find(|element| element.kind() == kind)
    }

    /// Offer `error` to open elements, innermost first. Returns the error
    /// when nobody claims it.
    pub fn report_error(&mut self, error: EsiError) -> Result<(), EsiError> {
        for frame in self.stack.iter_mut().rev() {
            if frame.element.on_error(&error) {
                tracing::warn!(
                    error = %error,
                    handler = frame.element_type.kind().name(),
                    "ESI error handled"
                );
                return Ok(());
            }
        }
        Err(error)
    }

    /// Record the body of the fragment being extracted. First match wins.
    pub fn capture_fragment(&mut self, body: String) -> bool {
        match &mut self.root {
            Root::Extract { found, .. } if found.is_none() => {
                *found = Some(body);
                true
            }
            _ => false,
        }
    }

    pub fn is_current_tag_end(&self, tag: &str) -> bool {
        self.stack
            .last()
            .is_some_and(|frame| frame.element_type.is_end_tag(tag))
    }

    fn is_current_tag_start(&self, tag: &str) -> bool {
        self.stack
            .last()
            .is_some_and(|frame| frame.element_type.is_start_tag(tag))
    }

    /// Whether the top element leaves nested directives unprocessed.
    pub fn is_foreign(&self) -> bool {
        self.stack.last().is_some_and(|frame| frame.element.is_foreign())
    }

    /// Handle a directive tag inside a foreign element. Returns `true` when
    /// the tag closes the element, which the caller must then end.
    pub fn foreign_tag(&mut self, tag: &str) -> bool {
        if self.is_current_tag_end(tag) {
            if self.foreign_depth == 0 {
                return true;
            }
            self.foreign_depth -= 1;
        } else if self.is_current_tag_start(tag) && !scanner::is_self_closing(tag) {
            self.foreign_depth += 1;
        }
        self.characters(tag);
        false
    }

    /// Finish the parse. Fails if directives are still open.
    pub fn finish(self) -> Result<Root, EsiError> {
        match self.stack.last() {
            Some(frame) => Err(EsiError::Structural(format!(
                "unclosed <esi:{}>",
                frame.element_type.kind().name()
            ))),
            None => Ok(self.root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::element::{lookup, TagMatch};
    use crate::esi::renderer::testing::renderer;

    fn element_type(tag: &str) -> ElementType {
        match lookup(tag) {
            Some(TagMatch::Start(ty)) | Some(TagMatch::End(ty)) => ty,
            None => panic!("not a directive: {}", tag),
        }
    }

    fn start(ctx: &mut ParserContext, tag: &str) -> bool {
        let ty = element_type(tag);
        ctx.start_element(ty, Element::new(ty.kind()), tag).unwrap()
    }

    #[tokio::test]
    async fn test_stack_balance() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        assert_eq!(ctx.depth(), 0);
        start(&mut ctx, "<esi:vars>");
        start(&mut ctx, "<esi:fragment name='a'>");
        assert_eq!(ctx.depth(), 2);
        assert!(ctx.is_current_tag_end("</esi:fragment>"));
        assert!(!ctx.is_current_tag_end("</esi:vars>"));

        ctx.characters("text");
        ctx.end_element("</esi:fragment>").await.unwrap();
        ctx.end_element("</esi:vars>").await.unwrap();
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.finish().unwrap().into_output().as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_end_on_empty_stack_is_structural() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        assert!(matches!(
            ctx.end_element("</esi:vars>").await,
            Err(EsiError::Structural(_))
        ));
    }

    #[test]
    fn test_unclosed_element_fails_finish() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        start(&mut ctx, "<esi:vars>");
        assert!(matches!(ctx.finish(), Err(EsiError::Structural(msg)) if msg.contains("vars")));
    }

    #[test]
    fn test_start_error_does_not_push() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        let ty = element_type("<esi:include/>");
        let err = ctx
            .start_element(ty, Element::new(ElementKind::Include), "<esi:include/>")
            .unwrap_err();
        assert!(matches!(err, EsiError::MissingAttribute { attribute: "src", .. }));
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_find_ancestor_falls_back_to_root_probe() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::extract("main"));
        start(&mut ctx, "<esi:vars>");
        match ctx.find_ancestor(ElementKind::Include) {
            Some(Element::Include(include)) => assert_eq!(include.fragment(), Some("main")),
            other => panic!("unexpected ancestor {:?}", other),
        }
        assert!(ctx.find_ancestor(ElementKind::Try).is_none());

        let ctx = ParserContext::new(renderer(&[]), Root::document());
        assert!(ctx.find_ancestor(ElementKind::Include).is_none());
    }

    #[test]
    fn test_report_error_claimed_by_innermost_attempt() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        start(&mut ctx, "<esi:try>");
        start(&mut ctx, "<esi:attempt>");
        ctx.characters("discarded");

        ctx.report_error(EsiError::UnknownProvider("x".into())).unwrap();
        assert!(ctx.is_foreign());

        let unclaimed = ParserContext::new(renderer(&[]), Root::document())
            .report_error(EsiError::UnknownProvider("y".into()));
        assert!(unclaimed.is_err());
    }

    #[test]
    fn test_foreign_nesting_is_counted() {
        let mut ctx = ParserContext::new(renderer(&[]), Root::document());
        start(&mut ctx, "<esi:remove>");
        assert!(ctx.is_foreign());
        assert!(!ctx.foreign_tag("<esi:remove>"));
        assert!(!ctx.foreign_tag("<esi:include src='x'/>"));
        assert!(!ctx.foreign_tag("</esi:remove>"));
        assert!(ctx.foreign_tag("</esi:remove>"));
    }
}
