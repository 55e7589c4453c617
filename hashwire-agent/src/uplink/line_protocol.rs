//! Line-protocol rendering.
//!
//! One point per record:
//!
//! ```text
//! bitaxe,host=<label> hashrate=5.234e11,temperature=54.2,shares_accepted=12i <unix-nanos>
//! ```
//!
//! Fields are written core-first (hashrate, temperature, power, shares,
//! best difficulty), then the pass-through bag in key order, so identical
//! records always render identically.

use std::fmt::Write as _;

use crate::metrics::{FieldValue, MetricsRecord, field};

/// Measurement name of every point.
pub const MEASUREMENT: &str = "bitaxe";

/// Tag key carrying the device label.
pub const HOST_TAG: &str = "host";

/// Render a batch, one point per line. Returns the body and the number of
/// points written; records that end up with no usable field are skipped.
pub fn render_batch(records: &[MetricsRecord]) -> (String, usize) {
    let mut body = String::new();
    let mut points = 0;
    for record in records {
        if let Some(line) = render_point(record) {
            if points > 0 {
                body.push('\n');
            }
            body.push_str(&line);
            points += 1;
        }
    }
    (body, points)
}

/// Render one record as a point, or `None` if it has no finite field.
pub fn render_point(record: &MetricsRecord) -> Option<String> {
    let mut fields = FieldSet::default();
    fields.float(field::HASHRATE, record.hashrate.as_hashes());
    fields.float(field::TEMPERATURE, record.temperature_c);
    if let Some(power) = record.power_w {
        fields.float(field::POWER, power);
    }
    if let Some(accepted) = record.shares_accepted {
        fields.unsigned(field::SHARES_ACCEPTED, accepted);
    }
    if let Some(rejected) = record.shares_rejected {
        fields.unsigned(field::SHARES_REJECTED, rejected);
    }
    if let Some(best) = &record.best_difficulty {
        fields.text(field::BEST_DIFF, best);
    }
    for (key, value) in &record.extra {
        match value {
            FieldValue::Float(v) => fields.float(key, *v),
            FieldValue::Integer(v) => fields.integer(key, *v),
            FieldValue::Text(v) => fields.text(key, v),
        }
    }

    if fields.is_empty() {
        return None;
    }

    let mut line = String::new();
    escape_into(&mut line, MEASUREMENT, &[',', ' ']);
    line.push(',');
    escape_into(&mut line, HOST_TAG, &[',', '=', ' ']);
    line.push('=');
    escape_into(&mut line, &record.label, &[',', '=', ' ']);
    line.push(' ');
    line.push_str(&fields.0);
    let _ = write!(line, " {}", record.timestamp.unix_timestamp_nanos());
    Some(line)
}

/// Comma-separated `key=value` list under construction.
#[derive(Default)]
struct FieldSet(String);

impl FieldSet {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn key(&mut self, key: &str) {
        if !self.0.is_empty() {
            self.0.push(',');
        }
        escape_into(&mut self.0, key, &[',', '=', ' ']);
        self.0.push('=');
    }

    /// NaN and infinities have no line-protocol spelling; they are dropped.
    fn float(&mut self, key: &str, value: f64) {
        if value.is_finite() {
            self.key(key);
            let _ = write!(self.0, "{value}");
        }
    }

    fn integer(&mut self, key: &str, value: i64) {
        self.key(key);
        let _ = write!(self.0, "{value}i");
    }

    fn unsigned(&mut self, key: &str, value: u64) {
        // Saturates above i64::MAX.
        self.integer(key, i64::try_from(value).unwrap_or(i64::MAX));
    }

    fn text(&mut self, key: &str, value: &str) {
        self.key(key);
        self.0.push('"');
        for c in value.chars() {
            match c {
                '"' | '\\' => {
                    self.0.push('\\');
                    self.0.push(c);
                }
                '\n' => self.0.push_str("\\n"),
                _ => self.0.push(c),
            }
        }
        self.0.push('"');
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::macros::datetime;

    use super::*;
    use crate::types::HashRate;

    fn record() -> MetricsRecord {
        MetricsRecord {
            label: "garage".to_string(),
            timestamp: datetime!(2024-06-01 12:00:00 UTC),
            hashrate: HashRate::from_gigahashes(523.4),
            temperature_c: 54.2,
            power_w: None,
            shares_accepted: None,
            shares_rejected: None,
            best_difficulty: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn minimal_record() {
        assert_eq!(
            render_point(&record()).unwrap(),
            "bitaxe,host=garage hashrate=523400000000,temperature=54.2 1717243200000000000"
        );
    }

    #[test]
    fn full_record_field_order_and_types() {
        let mut rec = record();
        rec.power_w = Some(15.5);
        rec.shares_accepted = Some(120);
        rec.shares_rejected = Some(2);
        rec.best_difficulty = Some("4.29G".to_string());
        rec.extra.insert("uptime".into(), FieldValue::Integer(3600));
        rec.extra.insert("asic_model".into(), FieldValue::Text("BM1370".into()));
        rec.extra.insert("frequency".into(), FieldValue::Float(525.0));

        assert_eq!(
            render_point(&rec).unwrap(),
            "bitaxe,host=garage hashrate=523400000000,temperature=54.2,power=15.5,\
             shares_accepted=120i,shares_rejected=2i,best_diff=\"4.29G\",\
             asic_model=\"BM1370\",frequency=525,uptime=3600i 1717243200000000000"
        );
    }

    #[test]
    fn escapes_tag_and_string_values() {
        let mut rec = record();
        rec.label = "rack 1,slot=2".to_string();
        rec.extra
            .insert("note".into(), FieldValue::Text(r#"say "hi" \o/"#.into()));

        let line = render_point(&rec).unwrap();
        assert!(line.starts_with(r"bitaxe,host=rack\ 1\,slot\=2 "), "{line}");
        assert!(line.contains(r#"note="say \"hi\" \\o/""#), "{line}");
    }

    #[test]
    fn non_finite_floats_are_omitted() {
        let mut rec = record();
        rec.power_w = Some(f64::NAN);
        rec.extra.insert("vr_temperature".into(), FieldValue::Float(f64::INFINITY));

        let line = render_point(&rec).unwrap();
        assert!(!line.contains("power"), "{line}");
        assert!(!line.contains("vr_temperature"), "{line}");
    }

    #[test]
    fn record_without_usable_fields_is_skipped() {
        let mut rec = record();
        rec.hashrate = HashRate::from_hashes(f64::NAN);
        rec.temperature_c = f64::INFINITY;
        assert_eq!(render_point(&rec), None);

        let (body, points) = render_batch(&[rec, record()]);
        assert_eq!(points, 1);
        assert!(!body.contains('\n'));
    }

    #[test]
    fn batch_is_newline_separated() {
        let mut other = record();
        other.label = "office".to_string();

        let (body, points) = render_batch(&[record(), other]);
        assert_eq!(points, 2);
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bitaxe,host=garage "));
        assert!(lines[1].starts_with("bitaxe,host=office "));
    }
}
