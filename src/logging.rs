use tracing_subscriber::prelude::*;

/// Installs the global subscriber. `RUST_LOG` wins when set; the fallback
/// keeps this crate at debug and everything else at info.
pub fn init_tracing() {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new("info,restitch=debug"),
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if result.is_err() {
        tracing::debug!("Subscriber already installed; keeping the existing one");
    }
}

/// Per-stream counters, logged once when the read loop ends.
#[derive(Debug, Default, Clone)]
pub struct StreamMetric {
    pub records: usize,
    pub bytes: usize,
    pub malformed: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &str) {
        self.records += 1;
        self.bytes += record.len();
    }

    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    pub fn log_summary(&self, kind: &str) {
        tracing::info!(
            "[STREAM END] Kind: {} | Records: {} | Bytes: {} | Malformed: {}",
            kind,
            self.records,
            self.bytes,
            self.malformed
        );
    }
}
