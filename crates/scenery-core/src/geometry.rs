//! Small geometry value types used by node payloads
//!
//! Components keep the JSON number they were read from, so a record written
//! with `1` comes back as `1` and not `1.0`.

use std::array;

use serde_json::{Number, Value};

/// A stored JSON number.
#[derive(Debug, Clone, PartialEq)]
pub struct Real(Number);

impl Real {
    pub fn get(&self) -> f64 {
        self.0.as_f64().unwrap_or_default()
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => Ok(Real(n.clone())),
            other => Err(format!("expected a number, found {other}")),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Number(self.0.clone())
    }
}

impl From<i64> for Real {
    fn from(value: i64) -> Self {
        Real(value.into())
    }
}

impl From<Real> for Value {
    fn from(real: Real) -> Self {
        Value::Number(real.0)
    }
}

/// A 3-component vector stored as `[x, y, z]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector3 {
    pub x: Real,
    pub y: Real,
    pub z: Real,
}

impl Vector3 {
    pub fn new(x: Real, y: Real, z: Real) -> Self {
        Vector3 { x, y, z }
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        let [x, y, z] = numbers::<3>(value)?;
        Ok(Vector3 { x, y, z })
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![self.x.to_value(), self.y.to_value(), self.z.to_value()])
    }
}

/// Row-major 4×4 matrix stored as an array of four rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix4 {
    pub rows: [[Real; 4]; 4],
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix4 {
    pub fn identity() -> Self {
        Matrix4 {
            rows: array::from_fn(|i| array::from_fn(|j| Real::from(i64::from(i == j)))),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        let rows = value
            .as_array()
            .filter(|rows| rows.len() == 4)
            .ok_or_else(|| "expected an array of 4 rows".to_string())?;
        let mut parsed = Vec::with_capacity(4);
        for (i, row) in rows.iter().enumerate() {
            parsed.push(numbers::<4>(row).map_err(|e| format!("row {i}: {e}"))?);
        }
        let rows = parsed
            .try_into()
            .map_err(|_| "expected an array of 4 rows".to_string())?;
        Ok(Matrix4 { rows })
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| Value::Array(row.iter().map(Real::to_value).collect()))
                .collect(),
        )
    }
}

/// Axis-aligned box stored as `[[min], [max]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3,
    pub max: Vector3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::unit()
    }
}

impl BoundingBox {
    /// The cube from [-1,-1,-1] to [1,1,1].
    pub fn unit() -> Self {
        let corner = |n: i64| Vector3::new(Real::from(n), Real::from(n), Real::from(n));
        BoundingBox {
            min: corner(-1),
            max: corner(1),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value.as_array().map(Vec::as_slice) {
            Some([min, max]) => Ok(BoundingBox {
                min: Vector3::from_value(min).map_err(|e| format!("min: {e}"))?,
                max: Vector3::from_value(max).map_err(|e| format!("max: {e}"))?,
            }),
            _ => Err("expected [[min], [max]]".to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![self.min.to_value(), self.max.to_value()])
    }
}

fn numbers<const N: usize>(value: &Value) -> Result<[Real; N], String> {
    let items = value
        .as_array()
        .filter(|items| items.len() == N)
        .ok_or_else(|| format!("expected an array of {N} numbers"))?;
    let parsed = items.iter().map(Real::from_value).collect::<Result<Vec<_>, _>>()?;
    parsed
        .try_into()
        .map_err(|_| format!("expected an array of {N} numbers"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_keep_their_written_form() {
        let written = json!([1, 0.5, -2]);
        let v = Vector3::from_value(&written).unwrap();
        assert_eq!(v.to_value(), written);
        assert_eq!((v.x.get(), v.y.get(), v.z.get()), (1.0, 0.5, -2.0));
        assert_eq!(v.x, Real::from(1_i64));

        let float = json!([1.0, 0.0, 0.0]);
        assert_eq!(Vector3::from_value(&float).unwrap().to_value(), float);
        let ints = Vector3::new(Real::from(1_i64), Real::from(0_i64), Real::from(0_i64));
        assert_ne!(Vector3::from_value(&float).unwrap(), ints);
    }

    #[test]
    fn test_real_rejects_non_numbers() {
        assert!(Real::from_value(&json!("1")).is_err());
        assert!(Real::from_value(&Value::Null).is_err());
        assert_eq!(Real::from_value(&json!(0.25)).unwrap().get(), 0.25);
    }

    #[test]
    fn test_matrix_parse_errors() {
        assert!(Matrix4::from_value(&json!([[1.0, 0.0]])).is_err());
        assert!(Matrix4::from_value(&json!("identity")).is_err());
        let bad_cell = json!([[1, 0, 0, "x"], [0, 1, 0, 0], [0, 0, 1, 0], [0, 0, 0, 1]]);
        assert!(Matrix4::from_value(&bad_cell).is_err());
        let parsed = Matrix4::from_value(&Matrix4::identity().to_value()).unwrap();
        assert_eq!(parsed, Matrix4::identity());
        assert_eq!(parsed.rows[2][2].get(), 1.0);
    }

    #[test]
    fn test_bounding_box() {
        let written = json!([[0.0, 0, 0], [2.5, 4, 6]]);
        let bbox = BoundingBox::from_value(&written).unwrap();
        assert_eq!(bbox.max.x.get(), 2.5);
        assert_eq!(bbox.max.y, Real::from(4_i64));
        assert_eq!(bbox.to_value(), written);
        assert_eq!(BoundingBox::unit().to_value(), json!([[-1, -1, -1], [1, 1, 1]]));

        assert!(BoundingBox::from_value(&json!([[0.0, 0.0, 0.0]])).is_err());
    }
}
