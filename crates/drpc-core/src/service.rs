//! Service interfaces and the provider-side implementation seam.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named service and the methods it offers.
///
/// Both sides agree on this table: a stub refuses methods not listed here,
/// and a provider declares the interfaces it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInterface {
    pub name: String,
    pub methods: Vec<String>,
}

impl ServiceInterface {
    pub fn new<I, S>(name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// A provider-side service implementation.
///
/// Exactly one declared interface is required for registration.
#[async_trait::async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Name used in logs and errors, usually the implementing type.
    fn implementation_name(&self) -> &str;

    /// Interfaces this implementation provides.
    fn interfaces(&self) -> Vec<ServiceInterface>;

    /// Run `method` with decoded arguments.
    ///
    /// Unknown methods should fail with
    /// [`RpcError::MethodNotFound`](crate::error::RpcError::MethodNotFound).
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value>;
}
