use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::defs::ArticleSource;
use crate::defs::ImageAsset;
use crate::defs::ImageTransformer;
use crate::defs::RewrittenArticle;
use crate::defs::TextRewriter;

/// Republishes the source body as-is. Useful when no generative backend is configured.
pub struct PassthroughRewriter;

#[async_trait]
impl TextRewriter for PassthroughRewriter {
    fn rewriter_name(&self) -> String {
        "passthrough".to_owned()
    }

    async fn rewrite(&self, source: &ArticleSource) -> Result<RewrittenArticle> {
        let body = if source.body.trim().is_empty() {
            source.snippet.trim()
        } else {
            source.body.trim()
        };
        if body.is_empty() {
            bail!("nothing to republish for '{}'", source.title);
        }
        Ok(RewrittenArticle {
            title: Some(source.title.clone()),
            body_html: body.to_owned(),
            ..Default::default()
        })
    }
}

/// Leaves images untouched.
pub struct IdentityTransformer;

#[async_trait]
impl ImageTransformer for IdentityTransformer {
    fn transformer_name(&self) -> String {
        "none".to_owned()
    }

    async fn transform(&self, image: &ImageAsset) -> Result<ImageAsset> {
        Ok(image.clone())
    }
}
