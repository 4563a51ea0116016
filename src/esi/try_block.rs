//! `<esi:try>` with `<esi:attempt>` and `<esi:except>`.
//!
//! An attempt claims every error reported while it is open. Once it has
//! failed the rest of its body is skipped and the try emits the except body
//! instead.

use crate::esi::context::ParserContext;
use crate::esi::element::{Element, ElementKind};
use crate::esi::error::EsiError;

#[derive(Debug, Default)]
pub struct TryElement {
    pub(crate) failed: bool,
    attempt: Option<String>,
    pub(crate) except: Option<String>,
}

impl TryElement {
    pub fn enclosing(ctx: &mut ParserContext, child: ElementKind) -> Result<&mut TryElement, EsiError> {
        match ctx.find_ancestor_mut(ElementKind::Try) {
            Some(Element::Try(try_block)) => Ok(try_block),
            _ => Err(EsiError::Structural(format!(
                "<esi:{}> outside <esi:try>",
                child.name()
            ))),
        }
    }

    pub fn into_output(self) -> String {
        if self.failed {
            self.except.unwrap_or_default()
        } else {
            self.attempt.unwrap_or_default()
        }
    }
}

#[derive(Debug, Default)]
pub struct AttemptElement {
    pub(crate) failed: bool,
    body: String,
}

impl AttemptElement {
    pub fn characters(&mut self, text: &str) {
        if !self.failed {
            self.body.push_str(text);
        }
    }

    pub fn on_error(&mut self, error: &EsiError) -> bool {
        tracing::debug!(error = %error, "Attempt failed, except branch will be used");
        self.failed = true;
        self.body.clear();
        true
    }

    pub fn on_tag_end(self, ctx: &mut ParserContext) -> Result<(), EsiError> {
        let try_block = TryElement::enclosing(ctx, ElementKind::Attempt)?;
        if self.failed {
            try_block.failed = true;
        } else {
            try_block.attempt = Some(self.body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::esi::error::EsiError;
    use crate::esi::renderer::testing::renderer;

    #[tokio::test]
    async fn test_successful_attempt() {
        let page = "<esi:try><esi:attempt>[<esi:include src=\"/a\"/>]</esi:attempt>\
                    <esi:except>fallback</esi:except></esi:try>";
        let out = renderer(&[("http://mock.local/a", "a")]).render(page).await.unwrap();
        assert_eq!(out, "[a]");
    }

    #[tokio::test]
    async fn test_failed_attempt_uses_except() {
        let page = "x<esi:try>\n<esi:attempt>partial <esi:include src=\"/missing\"/> <esi:include src=\"/a\"/></esi:attempt>\n\
                    <esi:except>fallback <esi:include src=\"/a\"/></esi:except>\n</esi:try>y";
        let out = renderer(&[("http://mock.local/a", "a")]).render(page).await.unwrap();
        assert_eq!(out, "xfallback ay");
    }

    #[tokio::test]
    async fn test_failed_attempt_without_except_emits_nothing() {
        let page = "[<esi:try><esi:attempt><esi:include src=\"/missing\"/></esi:attempt></esi:try>]";
        assert_eq!(renderer(&[]).render(page).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_stray_end_tag_is_claimed_by_attempt() {
        let page = "<esi:try><esi:attempt>x</esi:vars></esi:attempt><esi:except>fb</esi:except></esi:try>";
        assert_eq!(renderer(&[]).render(page).await.unwrap(), "fb");
    }

    #[tokio::test]
    async fn test_vars_error_is_claimed_by_attempt() {
        let page = "<esi:try><esi:attempt><esi:vars>$(PROVIDER{nope})</esi:vars></esi:attempt>\
                    <esi:except>fb</esi:except></esi:try>";
        assert_eq!(renderer(&[]).render(page).await.unwrap(), "fb");
    }

    #[tokio::test]
    async fn test_unclaimed_errors_still_fail() {
        let err = renderer(&[]).render("a</esi:vars>b").await.unwrap_err();
        assert!(matches!(err, EsiError::Structural(_)));

        let err = renderer(&[])
            .render("<esi:vars>$(PROVIDER{nope})</esi:vars>")
            .await
            .unwrap_err();
        assert!(matches!(err, EsiError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_attempt_outside_try_is_structural() {
        let err = renderer(&[])
            .render("<esi:attempt>x</esi:attempt>")
            .await
            .unwrap_err();
        assert!(matches!(err, EsiError::Structural(_)));
    }
}
