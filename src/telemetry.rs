//! Metrics instrumentation and in-process scraping.
//!
//! ## Key properties
//! - Library-safe: emitting metrics is effectively a no-op until a recorder is installed.
//! - Serverless scraping: with the `prometheus` feature, callers can render exposition text
//!   in-process without running an HTTP server.

pub mod core_metrics {
    use std::time::Duration;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
    #[cfg(feature = "prometheus")]
    use std::sync::atomic::{AtomicBool, Ordering};
    #[cfg(feature = "prometheus")]
    use std::sync::{Arc, Mutex};
    #[cfg(feature = "prometheus")]
    use std::thread::JoinHandle;

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    // Histograms are exposed as `<name>_bucket`, `<name>_sum`, `<name>_count`.

    pub const MERGE_SERIES_MATCHED: &str = "tsdelta_merge_series_matched";
    pub const MERGE_SERIES_ADDED: &str = "tsdelta_merge_series_added";
    pub const MERGE_POINTS: &str = "tsdelta_merge_points";
    pub const MERGE_DURATION_SECONDS: &str = "tsdelta_merge_duration_seconds";

    pub const RANGE_CROPS: &str = "tsdelta_range_crops";
    pub const SIZE_CROP_EVICTED_TIMESTAMPS: &str = "tsdelta_size_crop_evicted_timestamps";

    pub const PARSE_ROWS: &str = "tsdelta_parse_rows";
    pub const PARSE_ROWS_SKIPPED: &str = "tsdelta_parse_rows_skipped";
    pub const PARSE_DURATION_SECONDS: &str = "tsdelta_parse_duration_seconds";

    pub const CACHE_MARSHAL_BYTES: &str = "tsdelta_cache_marshal_bytes";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts an upkeep
        /// thread that keeps histogram state bounded.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("tsdelta-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_merge(duration: Duration, matched: u64, added: u64, points: u64) {
        ::metrics::histogram!(MERGE_DURATION_SECONDS).record(duration.as_secs_f64());
        if matched > 0 {
            ::metrics::counter!(MERGE_SERIES_MATCHED).increment(matched);
        }
        if added > 0 {
            ::metrics::counter!(MERGE_SERIES_ADDED).increment(added);
        }
        if points > 0 {
            ::metrics::counter!(MERGE_POINTS).increment(points);
        }
    }

    #[inline]
    pub fn record_range_crop() {
        ::metrics::counter!(RANGE_CROPS).increment(1);
    }

    #[inline]
    pub fn record_size_crop(evicted_timestamps: u64) {
        if evicted_timestamps > 0 {
            ::metrics::counter!(SIZE_CROP_EVICTED_TIMESTAMPS).increment(evicted_timestamps);
        }
    }

    #[inline]
    pub fn record_parse(duration: Duration, rows: u64, skipped: u64) {
        ::metrics::histogram!(PARSE_DURATION_SECONDS).record(duration.as_secs_f64());
        if rows > 0 {
            ::metrics::counter!(PARSE_ROWS).increment(rows);
        }
        if skipped > 0 {
            ::metrics::counter!(PARSE_ROWS_SKIPPED).increment(skipped);
        }
    }

    #[inline]
    pub fn record_cache_marshal(bytes: u64) {
        if bytes > 0 {
            ::metrics::counter!(CACHE_MARSHAL_BYTES).increment(bytes);
        }
    }

    pub fn describe_all() {
        describe_counter!(
            MERGE_SERIES_MATCHED,
            Unit::Count,
            "Incoming series merged into an existing series."
        );
        describe_counter!(
            MERGE_SERIES_ADDED,
            Unit::Count,
            "Incoming series added to a dataset as new series."
        );
        describe_counter!(MERGE_POINTS, Unit::Count, "Points carried by merged series.");
        describe_counter!(RANGE_CROPS, Unit::Count, "Datasets cropped to a time range.");
        describe_counter!(
            SIZE_CROP_EVICTED_TIMESTAMPS,
            Unit::Count,
            "Timestamps evicted by LRU size cropping."
        );
        describe_counter!(PARSE_ROWS, Unit::Count, "Data rows seen by the tabular parser.");
        describe_counter!(
            PARSE_ROWS_SKIPPED,
            Unit::Count,
            "Data rows skipped for width or timestamp errors."
        );
        describe_counter!(
            CACHE_MARSHAL_BYTES,
            Unit::Bytes,
            "Bytes produced by the cache encoding."
        );

        describe_histogram!(
            MERGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent merging incoming datasets."
        );
        describe_histogram!(
            PARSE_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent turning a row matrix into a dataset."
        );
    }
}
