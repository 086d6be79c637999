use crate::store::{RecordKind, RecordStore};
use eyre::{eyre, Result};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes routed to each partition of one topic. The next record goes to the
/// partition that has received the least payload so far.
struct PartitionLoads {
    bytes: Vec<AtomicU64>,
}

impl PartitionLoads {
    fn new(partitions: usize) -> Self {
        Self {
            bytes: (0..partitions.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn pick(&self, payload_len: usize) -> i32 {
        let mut best = 0;
        let mut best_load = u64::MAX;
        for (i, load) in self.bytes.iter().enumerate() {
            let l = load.load(Ordering::Relaxed);
            if l < best_load {
                best_load = l;
                best = i;
            }
        }
        self.bytes[best].fetch_add(payload_len as u64, Ordering::Relaxed);
        best as i32
    }
}

/// Single writer to the downstream bus. A record counts as emitted only after
/// the broker acknowledged it AND its ID landed in the durable set; a failed
/// write leaves both untouched so the item is retried on a later pass.
pub struct BusSink {
    producer: FutureProducer,
    store: Arc<RecordStore>,
    loads: HashMap<&'static str, PartitionLoads>,
}

impl BusSink {
    pub fn connect(brokers: &str, store: Arc<RecordStore>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| eyre!("failed to create kafka producer for {brokers}: {e}"))?;

        let mut loads = HashMap::new();
        for kind in [RecordKind::Video, RecordKind::Comment, RecordKind::Account] {
            let topic = kind.topic();
            let partitions = partition_count(&producer, topic).unwrap_or_else(|e| {
                tracing::warn!(topic, error = %e, "metadata fetch failed; assuming 1 partition");
                1
            });
            loads.insert(topic, PartitionLoads::new(partitions));
        }

        Ok(Self {
            producer,
            store,
            loads,
        })
    }

    pub async fn emit(&self, kind: RecordKind, key: &str, value: &serde_json::Value) -> Result<()> {
        let topic = kind.topic();
        let payload = serde_json::to_vec(value)
            .map_err(|e| eyre!("failed to serialize record {key} for {topic}: {e}"))?;
        let partition = self
            .loads
            .get(topic)
            .map(|l| l.pick(payload.len()))
            .unwrap_or(0);

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(&payload)
            .partition(partition);

        self.producer
            .send(record, Timeout::After(DELIVERY_TIMEOUT))
            .await
            .map_err(|(e, _)| eyre!("kafka delivery to {topic} failed: {e}"))?;

        self.store.record_emitted(kind, key)
    }
}

fn partition_count(producer: &FutureProducer, topic: &str) -> Result<usize> {
    use rdkafka::producer::Producer;
    let metadata = producer
        .client()
        .fetch_metadata(Some(topic), METADATA_TIMEOUT)
        .map_err(|e| eyre!("metadata fetch for {topic} failed: {e}"))?;
    let count = metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .map(|t| t.partitions().len())
        .unwrap_or(0);
    if count == 0 {
        return Err(eyre!("topic {topic} reports no partitions"));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_partition_wins() {
        let loads = PartitionLoads::new(3);
        loads.bytes[0].store(10, Ordering::Relaxed);
        loads.bytes[1].store(3, Ordering::Relaxed);
        loads.bytes[2].store(7, Ordering::Relaxed);
        assert_eq!(loads.pick(100), 1);
        // Partition 1 now carries 103 bytes, so 2 is next.
        assert_eq!(loads.pick(1), 2);
    }

    #[test]
    fn single_partition_always_zero() {
        let loads = PartitionLoads::new(0);
        assert_eq!(loads.pick(5), 0);
        assert_eq!(loads.pick(5), 0);
    }

    #[test]
    fn load_spreads_across_even_partitions() {
        let loads = PartitionLoads::new(2);
        let first = loads.pick(50);
        let second = loads.pick(50);
        assert_ne!(first, second);
    }
}
