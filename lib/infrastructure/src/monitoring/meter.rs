use cached::proc_macro::cached;
use opentelemetry::KeyValue;

pub fn increment(name: &'static str, labels: &[(&str, &str)]) {
    counter(name).add(1, &as_attributes(labels))
}

pub fn set(name: &'static str, value: f64, labels: &[(&str, &str)]) {
    gauge(name).record(value, &as_attributes(labels))
}

fn as_attributes(labels: &[(&str, &str)]) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(k, v)| KeyValue::new(k.to_string(), v.to_string()))
        .collect()
}

//Instruments are registered once per name on the global meter, a no-op meter until monitoring is initialized
#[cached]
fn counter(name: &'static str) -> opentelemetry::metrics::Counter<u64> {
    opentelemetry::global::meter("unit_assets").u64_counter(name).build()
}

#[cached]
fn gauge(name: &'static str) -> opentelemetry::metrics::Gauge<f64> {
    opentelemetry::global::meter("unit_assets").f64_gauge(name).build()
}
