use crate::error::Error;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One upstream metrics record, keyed by field name.
pub type AggregateRecord = Map<String, Value>;

/// Per-date records produced by [`distribute_across_range`], ordered by date.
pub type DistributedRecordSet = BTreeMap<NaiveDate, Vec<AggregateRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Counts such as impressions or clicks. Split into integer parts.
    AdditiveInteger,
    /// Money and other continuous totals. Split into equal floating shares.
    AdditiveCurrency,
    /// Identifiers, names and anything else copied as-is.
    Invariant,
}

/// Fixed classification of record fields. Fields not listed are [`FieldKind::Invariant`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldKind>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integers(mut self, names: &[&str]) -> Self {
        for name in names {
            self.fields
                .insert(name.to_string(), FieldKind::AdditiveInteger);
        }
        self
    }

    pub fn with_currencies(mut self, names: &[&str]) -> Self {
        for name in names {
            self.fields
                .insert(name.to_string(), FieldKind::AdditiveCurrency);
        }
        self
    }

    #[cfg(test)]
    pub fn kind_of(&self, field: &str) -> FieldKind {
        self.fields
            .get(field)
            .copied()
            .unwrap_or(FieldKind::Invariant)
    }

    fn additive_fields(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields
            .iter()
            .filter(|(_, kind)| **kind != FieldKind::Invariant)
            .map(|(name, kind)| (name.as_str(), *kind))
    }
}

///
/// Splits aggregate records covering `range` into one record per date.
///
/// Integer fields with total `T` over `N` dates get `T div N`, with the first `T mod N`
/// dates receiving one extra unit, so the parts always sum back to `T`. Floor division
/// is used, which keeps that property for negative totals too. Currency fields get
/// `T / N` on every date. A missing additive field counts as zero.
///
/// # Arguments
/// * `records` - Aggregate records, each covering the whole range
/// * `range` - Ascending dates the records cover
/// * `schema` - Classification of the record fields
///
/// # Returns
/// A Result containing either the per-date records, in input order, or an [`Error`]
pub fn distribute_across_range(
    records: &[AggregateRecord],
    range: &[NaiveDate],
    schema: &FieldSchema,
) -> Result<DistributedRecordSet, Error> {
    if range.is_empty() {
        return Err(Error::EmptyRange);
    }

    let n = range.len();
    let mut distributed: DistributedRecordSet = range
        .iter()
        .map(|date| (*date, Vec::with_capacity(records.len())))
        .collect();

    for record in records {
        let per_day = if n == 1 {
            vec![record.clone()]
        } else {
            split_record(record, n, schema)?
        };

        for (date, day_record) in range.iter().zip(per_day) {
            if let Some(day_records) = distributed.get_mut(date) {
                day_records.push(day_record);
            }
        }
    }

    Ok(distributed)
}

fn split_record(
    record: &AggregateRecord,
    n: usize,
    schema: &FieldSchema,
) -> Result<Vec<AggregateRecord>, Error> {
    let mut per_day = vec![record.clone(); n];

    for (field, kind) in schema.additive_fields() {
        match kind {
            FieldKind::AdditiveInteger => {
                let total = integer_total(field, record.get(field))?;
                for (day, share) in per_day.iter_mut().zip(integer_shares(total, n)) {
                    day.insert(field.to_string(), Value::from(share));
                }
            }
            FieldKind::AdditiveCurrency => {
                let share = currency_total(field, record.get(field))? / n as f64;
                for day in per_day.iter_mut() {
                    day.insert(field.to_string(), Value::from(share));
                }
            }
            FieldKind::Invariant => {}
        }
    }

    Ok(per_day)
}

fn integer_shares(total: i64, n: usize) -> impl Iterator<Item = i64> {
    let divisor = n as i64;
    let base = total.div_euclid(divisor);
    let remainder = total.rem_euclid(divisor) as usize;

    (0..n).map(move |i| if i < remainder { base + 1 } else { base })
}

fn invalid_metric(field: &str, value: &Value) -> Error {
    Error::InvalidMetric {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn integer_total(field: &str, value: Option<&Value>) -> Result<i64, Error> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| invalid_metric(field, &Value::Number(number.clone()))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid_metric(field, &Value::String(s.clone()))),
        Some(other) => Err(invalid_metric(field, other)),
    }
}

fn currency_total(field: &str, value: Option<&Value>) -> Result<f64, Error> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| invalid_metric(field, &Value::Number(number.clone()))),
        // LinkedIn reports money as decimal strings
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid_metric(field, &Value::String(s.clone()))),
        Some(other) => Err(invalid_metric(field, other)),
    }
}
