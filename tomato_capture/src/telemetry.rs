use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;
use tomato_prediction::Detection;

pub struct Metrics {
    request_counter: Counter<u64>,
    analysis_duration: Histogram<u64>,
    detection_counter: Counter<u64>,
    stream_fps: Gauge<f64>,
    pub registry: Registry,
    // Keeps the pipeline alive if the global provider is replaced.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("tomato_capture");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let analysis_duration = meter
            .u64_histogram("analysis_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of image analysis in milliseconds")
            .build();

        let detection_counter = meter
            .u64_counter("detections_total")
            .with_description("Detections by freshness label")
            .build();

        let stream_fps = meter
            .f64_gauge("stream_fps")
            .with_description("FPS of the annotated video stream")
            .build();

        Ok(Metrics {
            request_counter,
            analysis_duration,
            detection_counter,
            stream_fps,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_analysis_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.analysis_duration.record(duration_ms, &attributes);
    }

    pub fn record_detections(&self, detections: &[Detection]) {
        for detection in detections {
            let attributes = vec![KeyValue::new("label", detection.label.as_str())];
            self.detection_counter.add(1, &attributes);
        }
    }

    pub fn record_stream_fps(&self, fps: f64) {
        self.stream_fps.record(fps, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (2, 22, 26, 46, 146);
        let get = generate_boundaries(parts);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_detections_show_up_in_registry() {
        use tomato_prediction::{FreshnessLabel, Region};

        let metrics = Metrics::new().unwrap();
        metrics.record_request("/analyze_image");
        metrics.record_detections(&[Detection {
            label: FreshnessLabel::Unripe,
            confidence: 0.7,
            bbox: Region::new(0, 0, 40, 40),
        }]);

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.iter().any(|name| name.starts_with("detections_total")));
        assert!(names.iter().any(|name| name.starts_with("requests_total")));
    }
}
