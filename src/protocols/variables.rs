//! # Variable store (OPC-UA-like).
//!
//! Named, typed process variables. A variable must be created before it can
//! be updated; every update is checked against the declared [`VariableType`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::error::ProtocolError;
use crate::protocols::monitor::{Protocol, ProtocolMonitor};

/// Declared type of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Boolean,
    Double,
    String,
    /// Structured value; accepts any JSON.
    Object,
}

impl VariableType {
    /// Natural type of a JSON value (`null` counts as an object).
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(_) => VariableType::Double,
            Value::String(_) => VariableType::String,
            Value::Null | Value::Array(_) | Value::Object(_) => VariableType::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::Boolean => "boolean",
            VariableType::Double => "double",
            VariableType::String => "string",
            VariableType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        *self == VariableType::Object || *self == VariableType::of(value)
    }
}

/// Abstract variable access.
#[async_trait]
pub trait VariableStore: Send + Sync + 'static {
    /// Declares a variable with an initial value.
    async fn create(&self, name: &str, initial: Value, ty: VariableType)
    -> Result<(), ProtocolError>;

    /// Replaces the value of an existing variable.
    async fn update(&self, name: &str, value: Value) -> Result<(), ProtocolError>;

    /// Reads the current value.
    async fn read(&self, name: &str) -> Result<Value, ProtocolError>;
}

struct Variable {
    ty: VariableType,
    value: Value,
}

/// In-memory variable namespace.
pub struct MemoryVariables {
    vars: RwLock<HashMap<String, Variable>>,
    monitor: Option<Arc<ProtocolMonitor>>,
}

impl MemoryVariables {
    pub fn new() -> Self {
        Self {
            vars: RwLock::new(HashMap::new()),
            monitor: None,
        }
    }

    /// Records every access on `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<ProtocolMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Number of declared variables.
    pub async fn len(&self) -> usize {
        self.vars.read().await.len()
    }

    fn record(&self, name: &str, event_type: &'static str, data: Value) {
        if let Some(m) = &self.monitor {
            m.record(Protocol::OpcUa, "line", name, event_type, data);
        }
    }

    fn mismatch(name: &str, ty: VariableType, value: &Value) -> ProtocolError {
        ProtocolError::TypeMismatch {
            name: name.to_string(),
            expected: ty.as_str(),
            found: VariableType::of(value).as_str(),
        }
    }
}

impl Default for MemoryVariables {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VariableStore for MemoryVariables {
    async fn create(
        &self,
        name: &str,
        initial: Value,
        ty: VariableType,
    ) -> Result<(), ProtocolError> {
        if !ty.accepts(&initial) {
            return Err(Self::mismatch(name, ty, &initial));
        }
        let mut vars = self.vars.write().await;
        if vars.contains_key(name) {
            return Err(ProtocolError::VariableExists(name.to_string()));
        }
        self.record(name, "create", json!({ "type": ty, "value": &initial }));
        vars.insert(name.to_string(), Variable { ty, value: initial });
        Ok(())
    }

    async fn update(&self, name: &str, value: Value) -> Result<(), ProtocolError> {
        let mut vars = self.vars.write().await;
        let var = vars
            .get_mut(name)
            .ok_or_else(|| ProtocolError::VariableNotFound(name.to_string()))?;
        if !var.ty.accepts(&value) {
            return Err(Self::mismatch(name, var.ty, &value));
        }
        self.record(name, "update", value.clone());
        var.value = value;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Value, ProtocolError> {
        let vars = self.vars.read().await;
        let var = vars
            .get(name)
            .ok_or_else(|| ProtocolError::VariableNotFound(name.to_string()))?;
        self.record(name, "read", var.value.clone());
        Ok(var.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_and_type_checks() {
        let vars = MemoryVariables::new();
        assert_eq!(
            vars.update("filling_plc_status", json!("idle")).await,
            Err(ProtocolError::VariableNotFound("filling_plc_status".into()))
        );

        vars.create("filling_plc_status", json!("idle"), VariableType::String)
            .await
            .unwrap();
        assert_eq!(
            vars.create("filling_plc_status", json!("idle"), VariableType::String)
                .await,
            Err(ProtocolError::VariableExists("filling_plc_status".into()))
        );

        vars.update("filling_plc_status", json!("filling")).await.unwrap();
        assert_eq!(vars.read("filling_plc_status").await, Ok(json!("filling")));

        let err = vars.update("filling_plc_status", json!(1.5)).await.unwrap_err();
        assert_eq!(err.as_label(), "protocol_type_mismatch");
    }

    #[tokio::test]
    async fn object_accepts_anything() {
        let vars = MemoryVariables::new();
        vars.create("main_conveyor", json!(null), VariableType::Object)
            .await
            .unwrap();
        vars.update("main_conveyor", json!({"active": true})).await.unwrap();
        vars.update("main_conveyor", json!(0.5)).await.unwrap();
        assert_eq!(vars.len().await, 1);
    }
}
