//! Method name to handler mapping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{RegistryError, validate_declared_code};
use crate::handler::JsonRpcHandler;
use crate::types::ParamsShape;

/// Params shapes a method accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamShapes {
    pub positional: bool,
    pub named: bool,
    pub absent: bool,
}

impl ParamShapes {
    pub const fn any() -> Self {
        Self {
            positional: true,
            named: true,
            absent: true,
        }
    }

    pub const fn positional() -> Self {
        Self {
            positional: true,
            named: false,
            absent: false,
        }
    }

    pub const fn named() -> Self {
        Self {
            positional: false,
            named: true,
            absent: false,
        }
    }

    /// Only calls without a `params` member
    pub const fn none() -> Self {
        Self {
            positional: false,
            named: false,
            absent: true,
        }
    }

    pub const fn or_absent(mut self) -> Self {
        self.absent = true;
        self
    }

    pub fn accepts(&self, shape: ParamsShape) -> bool {
        match shape {
            ParamsShape::Positional => self.positional,
            ParamsShape::Named => self.named,
            ParamsShape::Absent => self.absent,
        }
    }

    fn accepts_nothing(&self) -> bool {
        !(self.positional || self.named || self.absent)
    }
}

impl Default for ParamShapes {
    fn default() -> Self {
        Self::any()
    }
}

/// A handler bound to a name plus its calling contract
#[derive(Clone)]
pub struct RegisteredMethod {
    pub name: String,
    pub handler: Arc<dyn JsonRpcHandler>,
    pub shapes: ParamShapes,
    pub declared_errors: Vec<i64>,
}

impl RegisteredMethod {
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: JsonRpcHandler + 'static,
    {
        Self::from_arc(name, Arc::new(handler))
    }

    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn JsonRpcHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            shapes: ParamShapes::any(),
            declared_errors: Vec::new(),
        }
    }

    pub fn accepts(mut self, shapes: ParamShapes) -> Self {
        self.shapes = shapes;
        self
    }

    /// Application error codes the handler may return.
    pub fn declares_errors(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.declared_errors.extend(codes);
        self
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::EmptyMethodName);
        }
        if self.shapes.accepts_nothing() {
            return Err(RegistryError::UnsupportedShapes(self.name.clone()));
        }
        for code in &self.declared_errors {
            validate_declared_code(&self.name, *code)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RegisteredMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredMethod")
            .field("name", &self.name)
            .field("shapes", &self.shapes)
            .field("declared_errors", &self.declared_errors)
            .finish_non_exhaustive()
    }
}

/// Registry of callable methods.
///
/// Lookups hold the read lock only long enough to clone an `Arc`, so they
/// never wait on a running handler. Registration takes the write lock and may
/// happen after traffic has started.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<RegisteredMethod>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, rejecting duplicates.
    pub fn register<H>(
        &self,
        name: impl Into<String>,
        handler: H,
        shapes: ParamShapes,
    ) -> Result<(), RegistryError>
    where
        H: JsonRpcHandler + 'static,
    {
        self.register_method(RegisteredMethod::new(name, handler).accepts(shapes))
    }

    pub fn register_method(&self, method: RegisteredMethod) -> Result<(), RegistryError> {
        method.validate()?;

        let mut methods = self.methods.write();
        if methods.contains_key(&method.name) {
            return Err(RegistryError::DuplicateMethod(method.name));
        }
        debug!(method = %method.name, shapes = ?method.shapes, "Registered method");
        methods.insert(method.name.clone(), Arc::new(method));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<RegisteredMethod>> {
        self.methods.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.method_names())
            .finish()
    }
}
