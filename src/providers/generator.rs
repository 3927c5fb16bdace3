use anyhow::Result;
use async_trait::async_trait;

/// Streaming text generation backend.
///
/// The engine only builds the prompt and concatenates what `on_token`
/// receives. Implementations decide everything else.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_streaming(
        &self,
        prompt: &str,
        on_token: &mut (dyn FnMut(&str) + Send),
        max_tokens: usize,
    ) -> Result<()>;
}
