use timber_observability::{Counter, Histogram, Meter, UpDownCounter};

/// Instruments recorded by the flush path.
///
/// All instruments are created from the meter handed to the ingester at
/// construction, so the core carries no process-wide metric state.
#[derive(Clone)]
pub struct FlushMetrics {
    /// The total number of chunks in memory.
    pub(crate) memory_chunks: UpDownCounter<i64>,
    pub(crate) chunk_utilization: Histogram<f64>,
    pub(crate) chunk_entries: Histogram<f64>,
    pub(crate) chunk_size_bytes: Histogram<f64>,
    pub(crate) chunk_compression_ratio: Histogram<f64>,
    pub(crate) chunk_age_seconds: Histogram<f64>,
    pub(crate) chunk_encode_time_seconds: Histogram<f64>,
    pub(crate) chunk_bounds_hours: Histogram<f64>,
    pub(crate) chunks_stored_total: Counter<u64>,
    pub(crate) chunk_stored_bytes_total: Counter<u64>,
    pub(crate) chunks_flushed_total: Counter<u64>,
}

impl FlushMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            memory_chunks: meter
                .i64_up_down_counter("ingester_memory_chunks")
                .with_description("The total number of chunks in memory.")
                .build(),
            chunk_utilization: meter
                .f64_histogram("ingester_chunk_utilization")
                .with_description("Distribution of stored chunk utilization (when stored).")
                .with_boundaries(linear_buckets(0.0, 0.2, 6))
                .build(),
            chunk_entries: meter
                .f64_histogram("ingester_chunk_entries")
                .with_description("Distribution of stored lines per chunk (when stored).")
                .with_boundaries(exponential_buckets(200.0, 2.0, 9))
                .build(),
            chunk_size_bytes: meter
                .f64_histogram("ingester_chunk_size_bytes")
                .with_unit("By")
                .with_description("Distribution of stored chunk sizes (when stored).")
                .with_boundaries(exponential_buckets(20_000.0, 2.0, 10))
                .build(),
            chunk_compression_ratio: meter
                .f64_histogram("ingester_chunk_compression_ratio")
                .with_description("Compression ratio of chunks (when stored).")
                .with_boundaries(linear_buckets(0.75, 2.0, 10))
                .build(),
            chunk_age_seconds: meter
                .f64_histogram("ingester_chunk_age_seconds")
                .with_unit("s")
                .with_description("Distribution of chunk ages (when stored).")
                // with default settings chunks should flush between 5 min
                // and 12 hours
                .with_boundaries(vec![
                    60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0, 36000.0, 43200.0,
                    57600.0,
                ])
                .build(),
            chunk_encode_time_seconds: meter
                .f64_histogram("ingester_chunk_encode_time_seconds")
                .with_unit("s")
                .with_description("Distribution of chunk encode times.")
                .with_boundaries(exponential_buckets(0.01, 4.0, 6))
                .build(),
            chunk_bounds_hours: meter
                .f64_histogram("ingester_chunk_bounds_hours")
                .with_unit("h")
                .with_description("Distribution of chunk end-start durations.")
                .with_boundaries(linear_buckets(1.0, 1.0, 8))
                .build(),
            chunks_stored_total: meter
                .u64_counter("ingester_chunks_stored_total")
                .with_description("Total stored chunks per tenant.")
                .build(),
            chunk_stored_bytes_total: meter
                .u64_counter("ingester_chunk_stored_bytes_total")
                .with_unit("By")
                .with_description("Total bytes stored in chunks per tenant.")
                .build(),
            chunks_flushed_total: meter
                .u64_counter("ingester_chunks_flushed_total")
                .with_description("Total flushed chunks per reason.")
                .build(),
        }
    }
}

fn linear_buckets(start: f64, width: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + width * i as f64).collect()
}

fn exponential_buckets(start: f64, factor: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start * factor.powi(i as i32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_buckets() {
        assert_eq!(linear_buckets(0.0, 0.2, 3), vec![0.0, 0.2, 0.4]);
    }

    #[test]
    fn test_exponential_buckets() {
        assert_eq!(
            exponential_buckets(200.0, 2.0, 4),
            vec![200.0, 400.0, 800.0, 1600.0]
        );
    }
}
