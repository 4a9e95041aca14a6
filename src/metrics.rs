// =============================================================================
// Metrics — single registry façade
// =============================================================================
//
// Every counter/gauge/histogram/summary the core exposes is registered once
// here at process startup and reached through narrow methods on `Metrics`.
// No module reaches into a free-standing static of its own: cross-module
// metric sharing is an explicit `Arc<Metrics>` dependency, per the Design
// Notes' "ad-hoc module-level collectors" guidance.
//
// Scrape transport is out of scope (§1): this façade only registers and
// updates the series; an operator wires the registry to an HTTP exporter.
// =============================================================================

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, Registry,
};

pub struct Metrics {
    registry: Registry,

    pub app_up: Gauge,
    pub watchlist_size: Gauge,
    pub cache_size: Gauge,
    pub last_loop_ts: Gauge,
    pub last_profit: GaugeVec,
    pub last_alert_ts: GaugeVec,

    pub rpc_latency: HistogramVec,
    pub tx_scan_latency: HistogramVec,
    pub rpc_errors: CounterVec,
    pub rpc_error_gauge: GaugeVec,

    pub alert_duration: HistogramVec,
    pub alerts_total: CounterVec,
    pub signals_sent_total: CounterVec,
    pub api_calls_total: CounterVec,
    pub stripe_webhooks_total: CounterVec,
    pub active_subscriptions_total: GaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let app_up = Gauge::new("app_up", "1 while the process is healthy")?;
        let watchlist_size = Gauge::new("watchlist_size", "current watchlist size")?;
        let cache_size = Gauge::new("seen_signatures_size", "current seen-signature cache size")?;
        let last_loop_ts = Gauge::new("last_loop_ts", "unix timestamp of the last completed scan loop")?;

        let last_profit =
            GaugeVec::new(prometheus::Opts::new("last_profit", "last observed profit per wallet"), &["wallet"])?;
        let last_alert_ts = GaugeVec::new(
            prometheus::Opts::new("last_alert_ts", "unix timestamp of the last alert per wallet"),
            &["wallet"],
        )?;

        let rpc_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("rpc_latency_seconds", "RPC call latency"),
            &["method"],
        )?;
        let tx_scan_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("tx_scan_latency_seconds", "per-wallet scan latency"),
            &["wallet"],
        )?;
        let rpc_errors = CounterVec::new(
            prometheus::Opts::new("rpc_errors_total", "RPC errors by endpoint"),
            &["endpoint"],
        )?;
        let rpc_error_gauge = GaugeVec::new(
            prometheus::Opts::new("rpc_error_count", "consecutive RPC error count by endpoint"),
            &["endpoint"],
        )?;

        let alert_duration = HistogramVec::new(
            prometheus::HistogramOpts::new("alert_duration_seconds", "time spent building an alert")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0]),
            &["wallet"],
        )?;
        let alerts_total =
            CounterVec::new(prometheus::Opts::new("alerts_total", "alerts emitted per wallet"), &["wallet"])?;
        let signals_sent_total = CounterVec::new(
            prometheus::Opts::new("signals_sent_total", "webhook signals delivered"),
            &["tier"],
        )?;
        let api_calls_total = CounterVec::new(
            prometheus::Opts::new("api_calls_total", "Signal API calls"),
            &["endpoint", "tier"],
        )?;
        let stripe_webhooks_total = CounterVec::new(
            prometheus::Opts::new("stripe_webhooks_processed_total", "billing webhooks processed"),
            &["event"],
        )?;
        let active_subscriptions_total = GaugeVec::new(
            prometheus::Opts::new("active_subscriptions_total", "active subscriptions by tier"),
            &["tier"],
        )?;

        registry.register(Box::new(app_up.clone()))?;
        registry.register(Box::new(watchlist_size.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(last_loop_ts.clone()))?;
        registry.register(Box::new(last_profit.clone()))?;
        registry.register(Box::new(last_alert_ts.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(tx_scan_latency.clone()))?;
        registry.register(Box::new(rpc_errors.clone()))?;
        registry.register(Box::new(rpc_error_gauge.clone()))?;
        registry.register(Box::new(alert_duration.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(signals_sent_total.clone()))?;
        registry.register(Box::new(api_calls_total.clone()))?;
        registry.register(Box::new(stripe_webhooks_total.clone()))?;
        registry.register(Box::new(active_subscriptions_total.clone()))?;

        Ok(Self {
            registry,
            app_up,
            watchlist_size,
            cache_size,
            last_loop_ts,
            last_profit,
            last_alert_ts,
            rpc_latency,
            tx_scan_latency,
            rpc_errors,
            rpc_error_gauge,
            alert_duration,
            alerts_total,
            signals_sent_total,
            api_calls_total,
            stripe_webhooks_total,
            active_subscriptions_total,
        })
    }

    /// Recompute `active_subscriptions_total` from scratch: reset every
    /// known tier to zero, then set the supplied counts, mirroring the
    /// reference implementation's full-rewrite update.
    pub fn set_active_subscriptions(&self, counts: &std::collections::HashMap<crate::types::Tier, usize>) {
        for tier in [crate::types::Tier::Free, crate::types::Tier::Pro, crate::types::Tier::Elite] {
            let count = counts.get(&tier).copied().unwrap_or(0);
            self.active_subscriptions_total.with_label_values(&[&tier.to_string()]).set(count as f64);
        }
    }

    pub fn record_rpc_error(&self, endpoint: &str, consecutive: u32) {
        self.rpc_errors.with_label_values(&[endpoint]).inc();
        self.rpc_error_gauge.with_label_values(&[endpoint]).set(consecutive as f64);
    }

    pub fn record_alert(&self, wallet: &str, profit: f64, duration_secs: f64) {
        self.alerts_total.with_label_values(&[wallet]).inc();
        self.last_profit.with_label_values(&[wallet]).set(profit);
        self.last_alert_ts.with_label_values(&[wallet]).set(chrono::Utc::now().timestamp() as f64);
        self.alert_duration.with_label_values(&[wallet]).observe(duration_secs);
    }

    /// Render the registry in Prometheus text exposition format, for an
    /// operator-supplied scrape endpoint.
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_name_conflicts() {
        let metrics = Metrics::new().expect("registry should build cleanly");
        metrics.record_rpc_error("https://a", 2);
        metrics.record_alert("WalletA", 3.5, 0.2);
        let rendered = metrics.render().expect("should render");
        assert!(rendered.contains("alerts_total"));
        assert!(rendered.contains("rpc_errors_total"));
    }
}
