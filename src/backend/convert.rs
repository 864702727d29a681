use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};
use tiberius::{ColumnData, ToSql, Uuid, numeric::Numeric};

use super::Row;

// -----------------------------------------------------------------------------
// ----- SqlParam --------------------------------------------------------------

/// Binds a JSON argument as a typed TDS parameter.
pub(super) struct SqlParam<'a>(pub &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ColumnData::I64(Some(i))
                } else if let Some(f) = n.as_f64() {
                    ColumnData::F64(Some(f))
                } else {
                    ColumnData::String(Some(Cow::Owned(n.to_string())))
                }
            }
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            // Arrays and objects travel as their JSON text.
            other => ColumnData::String(Some(Cow::Owned(other.to_string()))),
        }
    }
}

pub(super) fn params(values: &[Value]) -> Vec<SqlParam<'_>> {
    values.iter().map(SqlParam).collect()
}

pub(super) fn param_refs<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

// -----------------------------------------------------------------------------
// ----- Row conversion --------------------------------------------------------

pub(super) fn row_to_json(row: &tiberius::Row) -> Row {
    let mut out = Row::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), cell_to_json(row, idx));
    }
    out
}

fn cell_to_json(row: &tiberius::Row, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return float(f64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return float(v);
    }
    if let Ok(Some(v)) = row.try_get::<Numeric, _>(idx) {
        return numeric(v);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Uuid, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<DateTime<FixedOffset>, _>(idx) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDate, _>(idx) {
        return Value::String(v.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveTime, _>(idx) {
        return Value::String(v.format("%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(bytes)) = row.try_get::<&[u8], _>(idx) {
        return Value::String(hex(bytes));
    }
    Value::Null
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn numeric(n: Numeric) -> Value {
    let text = n.to_string();
    if n.scale() == 0 {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => float(f),
        _ => Value::String(text),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_binds_as_untyped_string() {
        let v = Value::Null;
        assert!(matches!(SqlParam(&v).to_sql(), ColumnData::String(None)));
    }

    #[test]
    fn scalars_bind_natively() {
        let b = json!(true);
        assert!(matches!(SqlParam(&b).to_sql(), ColumnData::Bit(Some(true))));

        let i = json!(42);
        assert!(matches!(SqlParam(&i).to_sql(), ColumnData::I64(Some(42))));

        let f = json!(1.5);
        assert!(matches!(SqlParam(&f).to_sql(), ColumnData::F64(Some(x)) if x == 1.5));
    }

    #[test]
    fn strings_borrow_and_objects_serialize() {
        let s = json!("O'Brien");
        match SqlParam(&s).to_sql() {
            ColumnData::String(Some(cow)) => assert_eq!(cow, "O'Brien"),
            _ => panic!("expected string"),
        }

        let o = json!({"a": [1, 2]});
        match SqlParam(&o).to_sql() {
            ColumnData::String(Some(cow)) => assert_eq!(cow, r#"{"a":[1,2]}"#),
            _ => panic!("expected json text"),
        }
    }

    #[test]
    fn binary_renders_as_hex() {
        assert_eq!(hex(&[0x00, 0xAB, 0x10]), "0x00AB10");
        assert_eq!(hex(&[]), "0x");
    }

    #[test]
    fn decimals_prefer_numbers() {
        assert_eq!(numeric(Numeric::new_with_scale(12345, 2)), json!(123.45));
        assert_eq!(numeric(Numeric::new_with_scale(7, 0)), json!(7));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
