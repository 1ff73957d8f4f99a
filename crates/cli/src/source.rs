use anyhow::{Context, Result};
use async_trait::async_trait;
use conductor_protocol::Envelope;
use conductor_reconciler::{Delivery, EventSource, WorkerError};
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

pub type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Event envelopes, one JSON object per line.
///
/// Redeliveries are requeued in memory and served before new lines. A delivery
/// handed back more than `max_redeliveries` times is dropped.
pub struct JsonLinesSource<R> {
    lines: Option<Lines<R>>,
    pending: VecDeque<Delivery>,
    next_id: u64,
    line_no: u64,
    max_redeliveries: u32,
    dropped: u64,
}

impl JsonLinesSource<BoxedReader> {
    /// Reads `path`, or stdin when `path` is `None`.
    pub async fn open(path: Option<&Path>, max_redeliveries: u32) -> Result<Self> {
        let reader: BoxedReader = match path {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open event file {}", path.display()))?;
                log::info!("reading events from {}", path.display());
                Box::new(BufReader::new(file))
            }
            None => {
                log::info!("reading events from stdin");
                Box::new(BufReader::new(tokio::io::stdin()))
            }
        };
        Ok(Self::new(reader, max_redeliveries))
    }
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R, max_redeliveries: u32) -> Self {
        Self {
            lines: Some(reader.lines()),
            pending: VecDeque::new(),
            next_id: 0,
            line_no: 0,
            max_redeliveries,
            dropped: 0,
        }
    }

    /// Deliveries dropped after running out of redeliveries.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    async fn read_envelope(&mut self) -> Result<Option<Envelope>, WorkerError> {
        while let Some(lines) = self.lines.as_mut() {
            let line = lines
                .next_line()
                .await
                .map_err(|err| WorkerError::Source(err.to_string()))?;
            let Some(line) = line else {
                self.lines = None;
                break;
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope>(line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(err) => log::error!("skipping line {}: not an event envelope: {err}", self.line_no),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next(&mut self) -> Result<Option<Delivery>, WorkerError> {
        if let Some(delivery) = self.pending.pop_front() {
            return Ok(Some(delivery));
        }
        let Some(envelope) = self.read_envelope().await? else {
            return Ok(None);
        };
        self.next_id += 1;
        Ok(Some(Delivery {
            id: self.next_id,
            envelope,
            attempt: 1,
        }))
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), WorkerError> {
        log::debug!("delivery {} settled after {} attempt(s)", delivery.id, delivery.attempt);
        Ok(())
    }

    async fn redeliver(&mut self, mut delivery: Delivery) -> Result<(), WorkerError> {
        if delivery.attempt > self.max_redeliveries {
            self.dropped += 1;
            log::error!(
                "dropping delivery {} ({}) after {} attempt(s)",
                delivery.id,
                delivery.envelope.event_type,
                delivery.attempt
            );
            return Ok(());
        }
        delivery.attempt += 1;
        self.pending.push_back(delivery);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INPUT: &str = r#"
{"type": "ProjectCreated", "payload": {"project_id": 1, "user_id": "u1", "territory_id": 1}}

not json at all
{"type": "RegionalScenarioCreated", "payload": {"scenario_id": 2, "user_id": "u1", "territory_id": 1}}
"#;

    async fn drain<R: AsyncBufRead + Unpin + Send>(source: &mut JsonLinesSource<R>) -> Vec<String> {
        let mut types = Vec::new();
        while let Some(delivery) = source.next().await.unwrap() {
            types.push(delivery.envelope.event_type.clone());
            source.ack(delivery).await.unwrap();
        }
        types
    }

    #[tokio::test]
    async fn skips_blank_and_invalid_lines() {
        let mut source = JsonLinesSource::new(INPUT.as_bytes(), 3);
        assert_eq!(
            drain(&mut source).await,
            vec!["ProjectCreated", "RegionalScenarioCreated"]
        );
    }

    #[tokio::test]
    async fn redeliveries_come_first_and_are_capped() {
        let mut source = JsonLinesSource::new(INPUT.as_bytes(), 2);

        let first = source.next().await.unwrap().unwrap();
        assert_eq!((first.id, first.attempt), (1, 1));
        source.redeliver(first).await.unwrap();

        let again = source.next().await.unwrap().unwrap();
        assert_eq!((again.id, again.attempt), (1, 2));
        source.redeliver(again).await.unwrap();

        let third = source.next().await.unwrap().unwrap();
        assert_eq!((third.id, third.attempt), (1, 3));
        source.redeliver(third).await.unwrap();
        assert_eq!(source.dropped(), 1);

        let next = source.next().await.unwrap().unwrap();
        assert_eq!(next.id, 2);
        assert_eq!(next.envelope.event_type, "RegionalScenarioCreated");
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_redelivery_outlives_end_of_input() {
        let mut source = JsonLinesSource::new(
            r#"{"type": "ProjectCreated", "payload": {}}"#.as_bytes(),
            1,
        );
        let delivery = source.next().await.unwrap().unwrap();
        assert!(source.next().await.unwrap().is_none());

        source.redeliver(delivery).await.unwrap();
        let again = source.next().await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        assert!(source.next().await.unwrap().is_none());
    }
}
