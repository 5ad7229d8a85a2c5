//! 指派範本：寫入覆寫前先轉換指派的值

use quib_core::{NdArray, QuibError, Result, Value};
use serde::{Deserialize, Serialize};

/// 指派範本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignmentTemplate {
    /// 夾在 [min, max] 之間
    Bound { min: f64, max: f64 },
    /// 對齊 start + k * step 的格點，並限制在 [start, stop] 內
    Range { start: f64, stop: f64, step: f64 },
}

impl AssignmentTemplate {
    pub fn bound(min: f64, max: f64) -> Self {
        AssignmentTemplate::Bound { min, max }
    }

    pub fn range(start: f64, stop: f64, step: f64) -> Result<Self> {
        if step <= 0.0 {
            return Err(QuibError::Config(format!("範本步長必須為正，收到 {}", step)));
        }
        Ok(AssignmentTemplate::Range { start, stop, step })
    }

    pub fn convert_scalar(&self, v: f64) -> f64 {
        match *self {
            AssignmentTemplate::Bound { min, max } => v.clamp(min, max),
            AssignmentTemplate::Range { start, stop, step } => {
                let last = start + ((stop - start) / step).floor() * step;
                let snapped = start + ((v - start) / step).round() * step;
                snapped.clamp(start, last)
            }
        }
    }

    /// 轉換數值、數值陣列或數值序列
    pub fn convert(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Float(v) => Ok(Value::Float(self.convert_scalar(*v))),
            Value::Int(i) => {
                let converted = self.convert_scalar(*i as f64);
                if converted.fract() == 0.0 {
                    Ok(Value::Int(converted as i64))
                } else {
                    Ok(Value::Float(converted))
                }
            }
            Value::Array(a) => Ok(Value::Array(self.convert_array(a))),
            Value::List(items) => Ok(Value::List(
                items.iter().map(|v| self.convert(v)).collect::<Result<_>>()?,
            )),
            Value::Tuple(items) => Ok(Value::Tuple(
                items.iter().map(|v| self.convert(v)).collect::<Result<_>>()?,
            )),
            other => Err(QuibError::TypeMismatch(format!(
                "指派範本無法轉換 {}",
                other.kind_name()
            ))),
        }
    }

    fn convert_array(&self, array: &NdArray<f64>) -> NdArray<f64> {
        array.map(|v| self.convert_scalar(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-5.0, 0.0)]
    #[case(3.5, 3.5)]
    #[case(42.0, 10.0)]
    fn test_bound_clamps(#[case] input: f64, #[case] expected: f64) {
        assert_eq!(AssignmentTemplate::bound(0.0, 10.0).convert_scalar(input), expected);
    }

    #[rstest]
    #[case(0.26, 0.5)]
    #[case(0.74, 0.5)]
    #[case(2.9, 2.5)]
    #[case(-1.0, 0.0)]
    fn test_range_snaps_to_grid(#[case] input: f64, #[case] expected: f64) {
        let template = AssignmentTemplate::range(0.0, 2.8, 0.5).unwrap();
        assert!((template.convert_scalar(input) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_convert_values() {
        let template = AssignmentTemplate::bound(0.0, 1.0);
        assert_eq!(template.convert(&Value::Int(5)).unwrap(), Value::Int(1));
        assert_eq!(
            template.convert(&Value::from(vec![-1.0, 0.5])).unwrap(),
            Value::from(vec![0.0, 0.5])
        );
        assert!(template.convert(&Value::from("x")).is_err());
    }

    #[test]
    fn test_range_rejects_non_positive_step() {
        assert!(AssignmentTemplate::range(0.0, 1.0, 0.0).is_err());
    }
}
