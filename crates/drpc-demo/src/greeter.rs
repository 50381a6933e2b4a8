//! Greeter provider used by the demo.

use async_trait::async_trait;
use drpc_core::{RpcError, RpcService, ServiceInterface};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub const SERVICE_NAME: &str = "Greeter";

pub fn interface() -> ServiceInterface {
    ServiceInterface::new(SERVICE_NAME, ["greet"])
}

pub struct GreeterService {
    label: String,
    greetings: AtomicUsize,
}

impl GreeterService {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            greetings: AtomicUsize::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn greetings(&self) -> usize {
        self.greetings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcService for GreeterService {
    fn implementation_name(&self) -> &str {
        "GreeterService"
    }

    fn interfaces(&self) -> Vec<ServiceInterface> {
        vec![interface()]
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> drpc_core::Result<Value> {
        match method {
            "greet" => {
                let name = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Service("greet expects a name".to_string()))?;
                self.greetings.fetch_add(1, Ordering::SeqCst);
                debug!("{} greeting {}", self.label, name);
                Ok(json!(format!("hello {}", name)))
            }
            _ => Err(RpcError::MethodNotFound {
                service: SERVICE_NAME.to_string(),
                method: method.to_string(),
            }),
        }
    }
}
