//! Directive element types and dispatch.
//!
//! # Responsibilities
//! - Recognize start and end tags of each directive
//! - Create the element instance for a start tag
//! - Route lifecycle calls (start, end, error, characters) to the variant
//!
//! # Design Decisions
//! - Elements are a closed enum; the registry is a static table
//! - End handling is async because includes fetch on close
//! - Elements that do not process their body are "foreign": nested
//!   directives inside them are kept as text

use crate::esi::conditional::{ChooseElement, WhenElement};
use crate::esi::context::ParserContext;
use crate::esi::error::EsiError;
use crate::esi::fragment::FragmentElement;
use crate::esi::include::IncludeElement;
use crate::esi::inline::InlineElement;
use crate::esi::try_block::{AttemptElement, TryElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Include,
    Fragment,
    Inline,
    Choose,
    When,
    Otherwise,
    Try,
    Attempt,
    Except,
    Vars,
    Remove,
    Comment,
}

impl ElementKind {
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Include => "include",
            ElementKind::Fragment => "fragment",
            ElementKind::Inline => "inline",
            ElementKind::Choose => "choose",
            ElementKind::When => "when",
            ElementKind::Otherwise => "otherwise",
            ElementKind::Try => "try",
            ElementKind::Attempt => "attempt",
            ElementKind::Except => "except",
            ElementKind::Vars => "vars",
            ElementKind::Remove => "remove",
            ElementKind::Comment => "comment",
        }
    }
}

/// Start and end tag prefixes of one directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementType {
    kind: ElementKind,
    start: &'static str,
    end: &'static str,
}

impl ElementType {
    pub const fn new(kind: ElementKind, start: &'static str, end: &'static str) -> Self {
        Self { kind, start, end }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn is_start_tag(&self, tag: &str) -> bool {
        matches_prefix(tag, self.start)
    }

    pub fn is_end_tag(&self, tag: &str) -> bool {
        matches_prefix(tag, self.end)
    }
}

/// `tag` begins with `prefix` followed by a name boundary.
fn matches_prefix(tag: &str, prefix: &str) -> bool {
    tag.strip_prefix(prefix).is_some_and(|rest| {
        rest.chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '/' || c == '>')
    })
}

static ESI_ELEMENTS: [ElementType; 12] = [
    ElementType::new(ElementKind::Include, "<esi:include", "</esi:include"),
    ElementType::new(ElementKind::Fragment, "<esi:fragment", "</esi:fragment"),
    ElementType::new(ElementKind::Inline, "<esi:inline", "</esi:inline"),
    ElementType::new(ElementKind::Choose, "<esi:choose", "</esi:choose"),
    ElementType::new(ElementKind::When, "<esi:when", "</esi:when"),
    ElementType::new(ElementKind::Otherwise, "<esi:otherwise", "</esi:otherwise"),
    ElementType::new(ElementKind::Try, "<esi:try", "</esi:try"),
    ElementType::new(ElementKind::Attempt, "<esi:attempt", "</esi:attempt"),
    ElementType::new(ElementKind::Except, "<esi:except", "</esi:except"),
    ElementType::new(ElementKind::Vars, "<esi:vars", "</esi:vars"),
    ElementType::new(ElementKind::Remove, "<esi:remove", "</esi:remove"),
    ElementType::new(ElementKind::Comment, "<esi:comment", "</esi:comment"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    Start(ElementType),
    End(ElementType),
}

/// Find the directive a tag belongs to. `None` for unknown `esi:` tags.
pub fn lookup(tag: &str) -> Option<TagMatch> {
    ESI_ELEMENTS.iter().find_map(|ty| {
        if ty.is_start_tag(tag) {
            Some(TagMatch::Start(*ty))
        } else if ty.is_end_tag(tag) {
            Some(TagMatch::End(*ty))
        } else {
            None
        }
    })
}

/// Body-collecting element shared by the branch directives.
#[derive(Debug, Default)]
pub struct BranchElement {
    pub active: bool,
    pub body: String,
}

impl BranchElement {
    pub fn characters(&mut self, text: &str) {
        if self.active {
            self.body.push_str(text);
        }
    }
}

#[derive(Debug)]
pub enum Element {
    Include(IncludeElement),
    Fragment(FragmentElement),
    Inline(InlineElement),
    Choose(ChooseElement),
    When(WhenElement),
    Otherwise(BranchElement),
    Try(TryElement),
    Attempt(AttemptElement),
    Except(BranchElement),
    Vars(String),
    Remove,
    Comment,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Include => Element::Include(IncludeElement::default()),
            ElementKind::Fragment => Element::Fragment(FragmentElement::default()),
            ElementKind::Inline => Element::Inline(InlineElement::default()),
            ElementKind::Choose => Element::Choose(ChooseElement::default()),
            ElementKind::When => Element::When(WhenElement::default()),
            ElementKind::Otherwise => Element::Otherwise(BranchElement::default()),
            ElementKind::Try => Element::Try(TryElement::default()),
            ElementKind::Attempt => Element::Attempt(AttemptElement::default()),
            ElementKind::Except => Element::Except(BranchElement::default()),
            ElementKind::Vars => Element::Vars(String::new()),
            ElementKind::Remove => Element::Remove,
            ElementKind::Comment => Element::Comment,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Include(_) => ElementKind::Include,
            Element::Fragment(_) => ElementKind::Fragment,
            Element::Inline(_) => ElementKind::Inline,
            Element::Choose(_) => ElementKind::Choose,
            Element::When(_) => ElementKind::When,
            Element::Otherwise(_) => ElementKind::Otherwise,
            Element::Try(_) => ElementKind::Try,
            Element::Attempt(_) => ElementKind::Attempt,
            Element::Except(_) => ElementKind::Except,
            Element::Vars(_) => ElementKind::Vars,
            Element::Remove => ElementKind::Remove,
            Element::Comment => ElementKind::Comment,
        }
    }

    /// Called before the element is pushed.
    pub fn on_tag_start(&mut self, tag: &str, ctx: &mut ParserContext) -> Result<(), EsiError> {
        match self {
            Element::Include(include) => include.on_tag_start(tag),
            Element::Fragment(fragment) => fragment.on_tag_start(tag),
            Element::Inline(inline) => inline.on_tag_start(tag),
            Element::Choose(_) => Ok(()),
            Element::When(when) => when.on_tag_start(tag, ctx),
            Element::Otherwise(branch) => {
                let choose = ChooseElement::enclosing(ctx, ElementKind::Otherwise)?;
                branch.active = choose.take_branch(true);
                Ok(())
            }
            Element::Try(_) => Ok(()),
            Element::Attempt(_) => TryElement::enclosing(ctx, ElementKind::Attempt).map(|_| ()),
            Element::Except(branch) => {
                branch.active = TryElement::enclosing(ctx, ElementKind::Except)?.failed;
                Ok(())
            }
            Element::Vars(_) | Element::Remove | Element::Comment => Ok(()),
        }
    }

    /// Called after the element is popped, with the closing tag text.
    pub async fn on_tag_end(self, _tag: &str, ctx: &mut ParserContext) -> Result<(), EsiError> {
        match self {
            Element::Include(include) => include.on_tag_end(ctx).await,
            Element::Fragment(fragment) => fragment.on_tag_end(ctx),
            Element::Inline(inline) => inline.on_tag_end(ctx),
            Element::Choose(choose) => {
                ctx.characters(&choose.output);
                Ok(())
            }
            Element::When(when) => {
                if when.branch.active {
                    ChooseElement::enclosing(ctx, ElementKind::When)?.output.push_str(&when.branch.body);
                }
                Ok(())
            }
            Element::Otherwise(branch) => {
                if branch.active {
                    ChooseElement::enclosing(ctx, ElementKind::Otherwise)?.output.push_str(&branch.body);
                }
                Ok(())
            }
            Element::Try(try_block) => {
                ctx.characters(&try_block.into_output());
                Ok(())
            }
            Element::Attempt(attempt) => attempt.on_tag_end(ctx),
            Element::Except(branch) => {
                if branch.active {
                    TryElement::enclosing(ctx, ElementKind::Except)?.except = Some(branch.body);
                }
                Ok(())
            }
            Element::Vars(body) => match ctx.renderer().variables().substitute(&body) {
                Ok(expanded) => {
                    ctx.characters(&expanded);
                    Ok(())
                }
                Err(e) => ctx.report_error(e),
            },
            Element::Remove | Element::Comment => Ok(()),
        }
    }

    /// Offer an error reported by a nested element. `true` claims it.
    pub fn on_error(&mut self, error: &EsiError) -> bool {
        match self {
            Element::Attempt(attempt) => attempt.on_error(error),
            _ => false,
        }
    }

    pub fn characters(&mut self, text: &str) {
        match self {
            Element::Fragment(fragment) => fragment.body.push_str(text),
            Element::Inline(inline) => inline.body.push_str(text),
            Element::When(when) => when.branch.characters(text),
            Element::Otherwise(branch) | Element::Except(branch) => branch.characters(text),
            Element::Attempt(attempt) => attempt.characters(text),
            Element::Vars(body) => body.push_str(text),
            // Whitespace between branches and bodies of non-emitting elements.
            Element::Include(_)
            | Element::Choose(_)
            | Element::Try(_)
            | Element::Remove
            | Element::Comment => {}
        }
    }

    /// Whether nested directives are left unprocessed.
    pub fn is_foreign(&self) -> bool {
        match self {
            Element::Include(_) | Element::Inline(_) | Element::Remove | Element::Comment => true,
            Element::When(when) => !when.branch.active,
            Element::Otherwise(branch) | Element::Except(branch) => !branch.active,
            Element::Attempt(attempt) => attempt.failed,
            Element::Fragment(_) | Element::Choose(_) | Element::Try(_) | Element::Vars(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_start_tag() {
        let tested = ElementType::new(ElementKind::Comment, "startStarted", "endStarted");
        assert!(tested.is_start_tag("startStarted somewhere here"));

        assert!(!tested.is_start_tag("start somewhere here"));
        assert!(!tested.is_start_tag("<startStarted somewhere here"));
    }

    #[test]
    fn test_is_end_tag() {
        let tested = ElementType::new(ElementKind::Comment, "startStarted", "endStarted");
        assert!(tested.is_end_tag("endStarted somewhere here"));

        assert!(!tested.is_end_tag("end somewhere here"));
        assert!(!tested.is_end_tag("</endStarted somewhere here"));
    }

    #[test]
    fn test_tag_name_boundary() {
        let include = ESI_ELEMENTS[0];
        assert!(include.is_start_tag("<esi:include src='a'/>"));
        assert!(include.is_start_tag("<esi:include/>"));
        assert!(!include.is_start_tag("<esi:includes src='a'/>"));
        assert!(include.is_end_tag("</esi:include>"));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(
            lookup("<esi:try>").map(|m| match m {
                TagMatch::Start(ty) => ty.kind(),
                TagMatch::End(ty) => ty.kind(),
            }),
            Some(ElementKind::Try)
        );
        assert!(matches!(lookup("</esi:attempt>"), Some(TagMatch::End(ty)) if ty.kind() == ElementKind::Attempt));
        assert_eq!(lookup("<esi:unknown a='b'/>"), None);
    }

    #[test]
    fn test_foreign_elements() {
        assert!(Element::new(ElementKind::Include).is_foreign());
        assert!(Element::new(ElementKind::Remove).is_foreign());
        assert!(!Element::new(ElementKind::Fragment).is_foreign());
        // Branches start inactive until their start handler runs.
        assert!(Element::new(ElementKind::When).is_foreign());
    }
}
