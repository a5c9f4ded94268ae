use std::sync::Arc;

use synchrony::{codec::LineFormat, settings::Settings, EFile};

/// Sets up tracing subscriber.
#[allow(dead_code)]
pub fn setup_tracing(level: Option<&str>) {
    use tracing_subscriber::{
        fmt::{format::FmtSpan, layer},
        layer::SubscriberExt,
        util::SubscriberInitExt,
        EnvFilter,
    };

    let filter_layer = level
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or("warn".into()));
    let fmt_layer = layer().with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}

/// One integer per line; the first line carries a `value=` header and
/// `track` lines are skipped, like a minimal annotation track.
pub struct NumFormat;

impl LineFormat for NumFormat {
    type Record = i64;

    fn is_guard(&self, line: &str) -> bool {
        line.starts_with("track")
    }

    fn encode_first(&self, record: &i64) -> String {
        format!("value={record}")
    }

    fn encode_rest(&self, record: &i64) -> String {
        record.to_string()
    }

    fn decode_first(&self, line: &str) -> Result<i64, String> {
        let value = line.strip_prefix("value=").ok_or("missing value header")?;
        value.parse().map_err(|_| format!("bad value {value:?}"))
    }

    fn decode_rest(&self, line: &str, _first: &i64) -> Result<i64, String> {
        line.parse().map_err(|_| format!("bad value {line:?}"))
    }
}

#[allow(dead_code)]
pub fn settings() -> Arc<Settings<i64>> {
    Arc::new(Settings::for_format(NumFormat))
}

/// Settings with test-specific knobs applied.
#[allow(dead_code)]
pub fn settings_with(adjust: impl FnOnce(&mut Settings<i64>)) -> Arc<Settings<i64>> {
    let mut settings = Settings::for_format(NumFormat);
    adjust(&mut settings);
    Arc::new(settings)
}

/// Collects every record of the file.
#[allow(dead_code)]
pub fn drain(file: &mut EFile<i64>) -> Vec<i64> {
    file.processed_with(|iter| {
        let mut records = Vec::new();
        while let Some(record) = iter.try_next()? {
            records.push(record);
        }
        Ok(records)
    })
    .unwrap()
}
