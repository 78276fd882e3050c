//! Arithmetic reference stages
//!
//! Integers stay integers through add, subtract and multiply unless the
//! result overflows; divide always yields a float.

use async_trait::async_trait;
use serde_json::{json, Number, Value};

use crate::route::registry::StageRegistry;
use crate::route::stage::Stage;
use crate::core::errors::Result;

pub const ADD: &str = "module_add";
pub const SUBTRACT: &str = "module_subtract";
pub const MULTIPLY: &str = "module_multiply";
pub const DIVIDE: &str = "module_divide";

fn as_number(stage: &str, value: &Value) -> anyhow::Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("{} expects a number, got {}", stage, value))
}

fn float(stage: &str, result: f64) -> anyhow::Result<Value> {
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| anyhow::anyhow!("{} produced a non-finite result", stage))
}

/// Apply an integer op when the input is an integer and the op does not
/// overflow, otherwise fall back to the float op
fn apply(
    stage: &str,
    value: &Value,
    int_op: impl Fn(i64) -> Option<i64>,
    float_op: impl Fn(f64) -> f64,
) -> anyhow::Result<Value> {
    if let Some(n) = value.as_i64() {
        if let Some(result) = int_op(n) {
            return Ok(json!(result));
        }
    }
    float(stage, float_op(as_number(stage, value)?))
}

macro_rules! prepare_log {
    ($name:expr) => {
        tracing::info!(stage = $name, "Module initialized");
    };
}

/// Adds 10
#[derive(Debug, Default)]
pub struct AddStage;

#[async_trait]
impl Stage for AddStage {
    fn namespace(&self) -> &str {
        ADD
    }

    async fn prepare(&mut self) -> anyhow::Result<()> {
        prepare_log!(ADD);
        Ok(())
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        apply(ADD, &value, |n| n.checked_add(10), |x| x + 10.0)
    }
}

/// Subtracts 10
#[derive(Debug, Default)]
pub struct SubtractStage;

#[async_trait]
impl Stage for SubtractStage {
    fn namespace(&self) -> &str {
        SUBTRACT
    }

    async fn prepare(&mut self) -> anyhow::Result<()> {
        prepare_log!(SUBTRACT);
        Ok(())
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        apply(SUBTRACT, &value, |n| n.checked_sub(10), |x| x - 10.0)
    }
}

/// Doubles
#[derive(Debug, Default)]
pub struct MultiplyStage;

#[async_trait]
impl Stage for MultiplyStage {
    fn namespace(&self) -> &str {
        MULTIPLY
    }

    async fn prepare(&mut self) -> anyhow::Result<()> {
        prepare_log!(MULTIPLY);
        Ok(())
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        apply(MULTIPLY, &value, |n| n.checked_mul(2), |x| x * 2.0)
    }
}

/// Halves, never truncating
#[derive(Debug, Default)]
pub struct DivideStage;

#[async_trait]
impl Stage for DivideStage {
    fn namespace(&self) -> &str {
        DIVIDE
    }

    async fn prepare(&mut self) -> anyhow::Result<()> {
        prepare_log!(DIVIDE);
        Ok(())
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        float(DIVIDE, as_number(DIVIDE, &value)? / 2.0)
    }
}

impl StageRegistry {
    /// Registry holding the four arithmetic stages
    pub fn arithmetic() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_default::<AddStage>()?;
        registry.register_default::<SubtractStage>()?;
        registry.register_default::<MultiplyStage>()?;
        registry.register_default::<DivideStage>()?;
        Ok(registry)
    }
}
