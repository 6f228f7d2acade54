#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use opentelemetry::metrics::MeterProvider;
use opentelemetry_sdk::metrics::{
    SdkMeterProvider,
    data::{AggregatedMetrics, MetricData, ResourceMetrics},
};
use timber_chunk_store::MemoryChunkStore;
use timber_ingester_core::{Ingester, IngesterOptions};
use timber_observability::MetricsExporter;
use timber_resources::{Entry, LabelSet, TenantName};

/// Base timestamp for test entries.
const BASE_SECS: u64 = 1_700_000_000;

pub fn create_ingester(
    options: IngesterOptions,
) -> (Arc<Ingester>, Arc<MemoryChunkStore>, TestMetrics) {
    let exporter = MetricsExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(exporter.clone())
        .build();
    let meter = provider.meter("ingester");

    let store = Arc::new(MemoryChunkStore::new());
    let ingester = Ingester::new(options, store.clone(), &meter).expect("valid options");
    ingester.init_flush_queues();

    (
        ingester,
        store,
        TestMetrics {
            exporter,
            _provider: provider,
        },
    )
}

pub fn test_options() -> IngesterOptions {
    IngesterOptions {
        concurrent_flushes: 2,
        flush_check_period: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn tenant() -> TenantName {
    TenantName::new_unchecked("acme")
}

pub fn labels(app: &str) -> LabelSet {
    LabelSet::new([("app", app)])
}

/// A test timestamp `offset` seconds after the fixed base.
pub fn ts(offset: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(BASE_SECS + offset)
}

pub fn entry(timestamp: SystemTime, line: &str) -> Entry {
    Entry::new(timestamp, line)
}

/// Wait until `predicate` holds, yielding to the background workers.
pub async fn wait_for(predicate: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Collects instrument state from the meter handed to the ingester.
pub struct TestMetrics {
    exporter: MetricsExporter,
    _provider: SdkMeterProvider,
}

impl TestMetrics {
    fn collect(&self) -> ResourceMetrics {
        let mut rm = ResourceMetrics::default();
        self.exporter.collect(&mut rm).expect("collect metrics");
        rm
    }

    /// Sum of a u64 counter, optionally restricted to one attribute value.
    pub fn counter(&self, name: &str, attr: Option<(&str, &str)>) -> u64 {
        let rm = self.collect();
        let mut total = 0;
        for scope in rm.scope_metrics() {
            for metric in scope.metrics() {
                if metric.name() != name {
                    continue;
                }
                if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                    for dp in sum.data_points() {
                        let matches = match attr {
                            None => true,
                            Some((key, value)) => dp
                                .attributes()
                                .any(|kv| kv.key.as_str() == key && kv.value.as_str() == value),
                        };
                        if matches {
                            total += dp.value();
                        }
                    }
                }
            }
        }

        total
    }

    /// Current value of an i64 up-down counter.
    pub fn up_down(&self, name: &str) -> i64 {
        let rm = self.collect();
        let mut total = 0;
        for scope in rm.scope_metrics() {
            for metric in scope.metrics() {
                if metric.name() != name {
                    continue;
                }
                if let AggregatedMetrics::I64(MetricData::Sum(sum)) = metric.data() {
                    for dp in sum.data_points() {
                        total += dp.value();
                    }
                }
            }
        }

        total
    }
}
