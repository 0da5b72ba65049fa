//! Ordered, paced delivery of chunks to one conversation.

use crate::channels::ChannelHandle;
use crate::chunker::Chunk;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    SendFailed(String),
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }
}

/// Sends chunks one at a time through a channel handle.
///
/// Each send is awaited before the next starts, with `inter_chunk_delay` between sends.
/// A failed send is recorded and the remaining chunks are still attempted.
pub struct OrderedDispatcher {
    handle: Arc<dyn ChannelHandle>,
    inter_chunk_delay: Duration,
}

impl OrderedDispatcher {
    pub fn new(handle: Arc<dyn ChannelHandle>, inter_chunk_delay: Duration) -> Self {
        Self {
            handle,
            inter_chunk_delay,
        }
    }

    /// Deliver `chunks` in `sequence_index` order. Returns one outcome per chunk, in that order.
    pub async fn send_all(&self, conversation_id: &str, chunks: &[Chunk]) -> Vec<DeliveryOutcome> {
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.sequence_index);

        let total = ordered.len();
        let mut outcomes = Vec::with_capacity(total);
        for (pos, chunk) in ordered.into_iter().enumerate() {
            if pos > 0 && !self.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }
            let outcome = match self.handle.send_message(conversation_id, &chunk.text).await {
                Ok(()) => {
                    log::debug!(
                        "dispatch: sent chunk {}/{} ({} chars) to {}",
                        pos + 1,
                        total,
                        chunk.text.chars().count(),
                        conversation_id
                    );
                    DeliveryOutcome::Sent
                }
                Err(e) => {
                    log::warn!(
                        "dispatch: chunk {} of {} to {} failed: {}",
                        chunk.sequence_index,
                        total,
                        conversation_id,
                        e
                    );
                    DeliveryOutcome::SendFailed(e)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records send start/end events; sends take 10ms and fail for texts in `fail_on`.
    struct Recorder {
        events: Mutex<Vec<String>>,
        fail_on: Vec<&'static str>,
    }

    impl Recorder {
        fn new(fail_on: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail_on,
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelHandle for Recorder {
        fn id(&self) -> &str {
            "recorder"
        }
        fn stop(&self) {}
        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", conversation_id, text));
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.events.lock().unwrap().push(format!("end {}", text));
            if self.fail_on.iter().any(|f| *f == text) {
                Err("transport unavailable".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                sequence_index: i,
                text: t.to_string(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn each_send_completes_before_next_starts() {
        let rec = Recorder::new(vec![]);
        let d = OrderedDispatcher::new(rec.clone(), Duration::from_millis(100));
        let outcomes = d.send_all("c1", &chunks(&["a", "b", "c"])).await;
        assert!(outcomes.iter().all(DeliveryOutcome::is_sent));
        assert_eq!(
            rec.events(),
            vec!["start c1 a", "end a", "start c1 b", "end b", "start c1 c", "end c"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_input_is_sent_by_index() {
        let rec = Recorder::new(vec![]);
        let d = OrderedDispatcher::new(rec.clone(), Duration::ZERO);
        let mut input = chunks(&["first", "second", "third"]);
        input.reverse();
        d.send_all("c1", &input).await;
        let starts: Vec<String> = rec
            .events()
            .into_iter()
            .filter(|e| e.starts_with("start"))
            .collect();
        assert_eq!(starts, vec!["start c1 first", "start c1 second", "start c1 third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_sends() {
        let rec = Recorder::new(vec![]);
        let d = OrderedDispatcher::new(rec, Duration::from_millis(100));
        let started = Instant::now();
        d.send_all("c1", &chunks(&["a", "b", "c"])).await;
        // three 10ms sends plus two pauses
        assert_eq!(started.elapsed(), Duration::from_millis(230));
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_has_no_delay() {
        let rec = Recorder::new(vec![]);
        let d = OrderedDispatcher::new(rec, Duration::from_millis(100));
        let started = Instant::now();
        d.send_all("c1", &chunker::Chunk::single("only")).await;
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_stop_remaining_chunks() {
        let rec = Recorder::new(vec!["b"]);
        let d = OrderedDispatcher::new(rec.clone(), Duration::from_millis(100));
        let outcomes = d.send_all("c1", &chunks(&["a", "b", "c"])).await;
        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Sent,
                DeliveryOutcome::SendFailed("transport unavailable".to_string()),
                DeliveryOutcome::Sent,
            ]
        );
        assert!(rec.events().contains(&"start c1 c".to_string()));
    }

    #[tokio::test]
    async fn empty_sequence_sends_nothing() {
        let rec = Recorder::new(vec![]);
        let d = OrderedDispatcher::new(rec.clone(), Duration::from_millis(100));
        assert!(d.send_all("c1", &[]).await.is_empty());
        assert!(rec.events().is_empty());
    }
}
