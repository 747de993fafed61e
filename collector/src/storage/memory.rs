use super::{Counter, Counters, Gauge, Gauges, Repository, StorageError};
use async_trait::async_trait;
use pulse_core::MetricKind;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    gauges: Gauges,
    counters: Counters,
}

impl State {
    fn add_counter(&mut self, id: &str, delta: i64) {
        let value = self.counters.entry(id.to_string()).or_insert(0);
        *value = value.saturating_add(delta);
    }
}

/// In-memory repository guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_gauge(&self, id: &str) -> Result<f64, StorageError> {
        self.state
            .read()
            .await
            .gauges
            .get(id)
            .copied()
            .ok_or_else(|| StorageError::not_found(MetricKind::Gauge, id))
    }

    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), StorageError> {
        self.state.write().await.gauges.insert(id.to_string(), value);
        Ok(())
    }

    async fn get_counter(&self, id: &str) -> Result<i64, StorageError> {
        self.state
            .read()
            .await
            .counters
            .get(id)
            .copied()
            .ok_or_else(|| StorageError::not_found(MetricKind::Counter, id))
    }

    async fn add_counter(&self, id: &str, delta: i64) -> Result<(), StorageError> {
        self.state.write().await.add_counter(id, delta);
        Ok(())
    }

    async fn get_all_gauges(&self) -> Result<Gauges, StorageError> {
        Ok(self.state.read().await.gauges.clone())
    }

    async fn get_all_counters(&self) -> Result<Counters, StorageError> {
        Ok(self.state.read().await.counters.clone())
    }

    async fn set_gauges(&self, gauges: &[Gauge]) -> Result<(), StorageError> {
        self.apply(gauges, &[]).await
    }

    async fn add_counters(&self, counters: &[Counter]) -> Result<(), StorageError> {
        self.apply(&[], counters).await
    }

    async fn apply(&self, gauges: &[Gauge], counters: &[Counter]) -> Result<(), StorageError> {
        if gauges.is_empty() && counters.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        for gauge in gauges {
            state.gauges.insert(gauge.id.clone(), gauge.value);
        }
        for counter in counters {
            state.add_counter(&counter.id, counter.value);
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<(Gauges, Counters), StorageError> {
        let state = self.state.read().await;
        Ok((state.gauges.clone(), state.counters.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gauge_last_write_wins() {
        let repo = MemoryRepository::new();
        repo.set_gauge("Alloc", 1.0).await.unwrap();
        repo.set_gauge("Alloc", 2.5).await.unwrap();
        assert_eq!(repo.get_gauge("Alloc").await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let repo = MemoryRepository::new();
        repo.add_counter("PollCount", 3).await.unwrap();
        repo.add_counter("PollCount", 4).await.unwrap();
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_not_found_carries_kind() {
        let repo = MemoryRepository::new();
        match repo.get_counter("missing").await {
            Err(StorageError::NotFound { kind, id }) => {
                assert_eq!(kind, MetricKind::Counter);
                assert_eq!(id, "missing");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keyspaces_are_independent() {
        let repo = MemoryRepository::new();
        repo.set_gauge("Shared", 1.5).await.unwrap();
        repo.add_counter("Shared", 2).await.unwrap();
        assert_eq!(repo.get_gauge("Shared").await.unwrap(), 1.5);
        assert_eq!(repo.get_counter("Shared").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_with_duplicates() {
        let repo = MemoryRepository::new();
        repo.apply(
            &[Gauge::new("Alloc", 10.0), Gauge::new("Alloc", 20.0)],
            &[Counter::new("PollCount", 1), Counter::new("PollCount", 1)],
        )
        .await
        .unwrap();

        assert_eq!(repo.get_gauge("Alloc").await.unwrap(), 20.0);
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_adds() {
        let repo = Arc::new(MemoryRepository::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.add_counter("PollCount", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_batch() {
        let repo = Arc::new(MemoryRepository::new());
        let writer = {
            let repo = repo.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let v = i as f64;
                    repo.set_gauges(&[Gauge::new("A", v), Gauge::new("B", v)])
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            let (gauges, _) = repo.snapshot().await.unwrap();
            assert_eq!(gauges.get("A"), gauges.get("B"));
        }
        writer.await.unwrap();
    }
}
