//! Optional metrics and tracing spans
//!
//! `metrics` feature: OpenTelemetry instruments exported through Prometheus.
//! `tracing` feature: spans around target statements, sandbox passes and table transfers.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{LifeportMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
    };
    use opentelemetry_prometheus::PrometheusExporter;
    use std::time::Duration;

    pub static METRICS: Lazy<LifeportMetrics> = Lazy::new(LifeportMetrics::init);

    pub struct LifeportMetrics {
        pub exporter: PrometheusExporter,
        pub statements_total: Counter<u64>,
        pub statement_failures: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub rows_migrated: Counter<u64>,
        pub repair_cycles: Counter<u64>,
    }

    impl LifeportMetrics {
        pub fn init() -> Self {
            let exporter = opentelemetry_prometheus::exporter()
                .build()
                .expect("failed to build prometheus exporter");
            let meter = global::meter("lifeport");

            let statements_total = meter
                .u64_counter("lifeport_statements_total")
                .with_description("Total statements executed against a target")
                .build();

            let statement_failures = meter
                .u64_counter("lifeport_statement_failures_total")
                .with_description("Statements that returned an error")
                .build();

            let statement_duration = meter
                .f64_histogram("lifeport_statement_duration_seconds")
                .with_description("Duration of target statements")
                .build();

            let rows_migrated = meter
                .u64_counter("lifeport_rows_migrated_total")
                .with_description("Rows inserted by the data mover")
                .build();

            let repair_cycles = meter
                .u64_counter("lifeport_repair_cycles_total")
                .with_description("Sandbox repair cycles entered")
                .build();

            Self {
                exporter,
                statements_total,
                statement_failures,
                statement_duration,
                rows_migrated,
                repair_cycles,
            }
        }

        pub fn record_statement(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_statement_error(&self) {
            self.statement_failures.add(1, &[]);
        }

        pub fn record_rows(&self, rows: u64) {
            self.rows_migrated.add(rows, &[]);
        }

        pub fn record_repair_cycle(&self) {
            self.repair_cycles.add(1, &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    const MAX_STATEMENT_CHARS: usize = 120;

    fn preview(sql: &str) -> String {
        let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() > MAX_STATEMENT_CHARS {
            let cut: String = flat.chars().take(MAX_STATEMENT_CHARS).collect();
            format!("{cut}...")
        } else {
            flat
        }
    }

    pub fn execute_statement_span(sql: &str) -> Span {
        info_span!("lifeport.execute", statement = %preview(sql))
    }

    pub fn sandbox_pass_span(attempt: u32) -> Span {
        info_span!("lifeport.sandbox_pass", attempt)
    }

    pub fn migrate_table_span(table: &str) -> Span {
        info_span!("lifeport.migrate_table", table)
    }

    pub fn connect_span(target: &str) -> Span {
        info_span!("lifeport.connect", target)
    }

}
