use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use pin_project_lite::pin_project;

pin_project! {
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct TimedFuture<F, C>
    where
        F: Future,
        C: FnOnce(Duration),
    {
        #[pin]
        inner: F,
        start: Instant,
        callback: Option<C>, // taken on first completion
    }
}

impl<F, C> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    pub fn new(inner: F, callback: C) -> Self {
        Self {
            inner,
            callback: Some(callback),
            start: Instant::now(),
        }
    }
}

impl<F, C> Future for TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let poll_result = this.inner.poll(cx);

        if poll_result.is_ready() {
            let elapsed = this.start.elapsed();
            if let Some(callback) = this.callback.take() {
                callback(elapsed);
            }
        }

        poll_result
    }
}

pub fn create_timed_future<F, C>(future: F, callback: C) -> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    TimedFuture::new(future, callback)
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Counter<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        Counter::add(self, duration.as_secs_f64(), labels);
    }
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the time between `start` and drop into `metric`.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, &[])
    }

    pub fn start_with_labels(metric: &'a T, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels: labels.to_vec(),
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}

pub mod upload_stats {
    use opentelemetry::{
        metrics::{Counter, Histogram},
        KeyValue,
    };

    #[derive(Debug)]
    pub struct Metrics {
        pub uploads: Counter<u64>,
        pub original_bytes: Counter<u64>,
        pub optimized_bytes: Counter<u64>,
        pub retrievals: Counter<u64>,
        pub transcode_duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("imgdrop-server");
            let uploads = meter
                .u64_counter("imgdrop.uploads")
                .with_description("number of upload attempts by outcome")
                .build();
            let original_bytes = meter
                .u64_counter("imgdrop.upload_bytes.original")
                .with_description("bytes received in accepted uploads")
                .build();
            let optimized_bytes = meter
                .u64_counter("imgdrop.upload_bytes.optimized")
                .with_description("bytes written to the object store")
                .build();
            let retrievals = meter
                .u64_counter("imgdrop.retrievals")
                .with_description("number of image reads by outcome")
                .build();
            let transcode_duration = meter
                .f64_histogram("imgdrop.transcode.duration")
                .with_unit("s")
                .with_description("time spent decoding, resizing and encoding images")
                .build();
            Metrics {
                uploads,
                original_bytes,
                optimized_bytes,
                retrievals,
                transcode_duration,
            }
        }

        pub fn upload_outcome(&self, outcome: &'static str) {
            self.uploads.add(1, &[KeyValue::new("outcome", outcome)]);
        }

        pub fn retrieval_outcome(&self, outcome: &'static str) {
            self.retrievals.add(1, &[KeyValue::new("outcome", outcome)]);
        }
    }
}

pub mod blob_store_stats {
    use opentelemetry::metrics::Histogram;

    #[derive(Debug)]
    pub struct Metrics {
        pub operation_duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("imgdrop-blob-store");
            let operation_duration = meter
                .f64_histogram("imgdrop.store.duration")
                .with_unit("s")
                .with_description("object store call latency, labelled by operation")
                .build();
            Metrics { operation_duration }
        }
    }
}
