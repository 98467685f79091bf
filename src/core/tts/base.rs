//! Text-to-speech capability shared by pipeline TTS backends.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ProviderError, ProviderResult};

/// Chunk size for audio that arrives in one piece (100 ms of µ-law 8 kHz).
pub const AUDIO_CHUNK_BYTES: usize = 800;

/// Speech synthesizer producing µ-law 8 kHz audio.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Provider name as used in agent configuration.
    fn provider(&self) -> &'static str;

    /// Synthesize `text`, pushing audio chunks to `audio` as they arrive.
    ///
    /// Returns `ProviderError::Cancelled` as soon as `cancel` fires; chunks
    /// already pushed stay pushed.
    async fn synthesize(
        &self,
        text: &str,
        audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> ProviderResult<()>;

    /// Release provider resources.
    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }
}

/// Forward a streaming HTTP body to `audio` until it ends or `cancel` fires.
pub(crate) async fn forward_body(
    response: reqwest::Response,
    audio: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    let mut body = response.bytes_stream();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            chunk = body.next() => match chunk {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    if audio.send(chunk).await.is_err() {
                        return Err(ProviderError::Cancelled);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }
    }
}

/// Forward a complete audio buffer in fixed-size chunks so barge-in can cut
/// it short.
pub(crate) async fn forward_chunked(
    data: Bytes,
    audio: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    let mut offset = 0;
    while offset < data.len() {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let end = (offset + AUDIO_CHUNK_BYTES).min(data.len());
        if audio.send(data.slice(offset..end)).await.is_err() {
            return Err(ProviderError::Cancelled);
        }
        offset = end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_chunked_splits_audio() {
        let (tx, mut rx) = mpsc::channel(16);
        forward_chunked(Bytes::from(vec![0u8; 2000]), &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![800, 800, 400]);
    }

    #[tokio::test]
    async fn test_forward_chunked_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = forward_chunked(Bytes::from(vec![0u8; 2000]), &tx, &cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
