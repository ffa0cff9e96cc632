//! Declarative contract model
//!
//! A contract is an immutable tree whose leaves are procedure descriptors
//! and whose inner nodes are namespaces; paths are the dot-joined keys
//! from root to leaf. The client consults an installed contract for the
//! procedure kind behind a path and for the optional input/output
//! predicates attached to it. Schema backends stay out of scope: a
//! predicate is any `Fn(&Value) -> bool`.
//!
//! # Example
//! ```rust,ignore
//! let contract = Contract::builder()
//!     .query("health")
//!     .namespace("user", |ns| {
//!         ns.query("get").mutation("create")
//!     })
//!     .subscription("stream.chat")
//!     .build()?;
//!
//! assert_eq!(contract.kind_of("user.get"), Some(ProcedureType::Query));
//! ```

use crate::error::{RpcError, RpcResult};
use crate::middleware::ProcedureType;
use crate::path::validate_path;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Predicate over a JSON value; the pluggable seam for schema backends.
pub type SchemaCheck = dyn Fn(&Value) -> bool + Send + Sync;

/// A procedure descriptor: its kind plus optional input/output predicates.
#[derive(Clone)]
pub struct ProcedureDef {
    /// The procedure kind, deciding how the client dispatches the path.
    pub procedure_type: ProcedureType,
    input_check: Option<Arc<SchemaCheck>>,
    output_check: Option<Arc<SchemaCheck>>,
}

impl ProcedureDef {
    /// A query descriptor.
    pub fn query() -> Self {
        Self::new(ProcedureType::Query)
    }

    /// A mutation descriptor.
    pub fn mutation() -> Self {
        Self::new(ProcedureType::Mutation)
    }

    /// A subscription descriptor.
    pub fn subscription() -> Self {
        Self::new(ProcedureType::Subscription)
    }

    fn new(procedure_type: ProcedureType) -> Self {
        Self {
            procedure_type,
            input_check: None,
            output_check: None,
        }
    }

    /// Attach an input predicate.
    #[must_use = "This method returns a new ProcedureDef and does not modify self"]
    pub fn with_input_check<F: Fn(&Value) -> bool + Send + Sync + 'static>(
        mut self,
        check: F,
    ) -> Self {
        self.input_check = Some(Arc::new(check));
        self
    }

    /// Attach an output predicate.
    #[must_use = "This method returns a new ProcedureDef and does not modify self"]
    pub fn with_output_check<F: Fn(&Value) -> bool + Send + Sync + 'static>(
        mut self,
        check: F,
    ) -> Self {
        self.output_check = Some(Arc::new(check));
        self
    }

    /// Run the input predicate; a descriptor without one accepts anything.
    pub fn check_input(&self, input: &Value) -> bool {
        self.input_check.as_ref().is_none_or(|check| check(input))
    }

    /// Run the output predicate; a descriptor without one accepts anything.
    pub fn check_output(&self, output: &Value) -> bool {
        self.output_check.as_ref().is_none_or(|check| check(output))
    }
}

impl fmt::Debug for ProcedureDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDef")
            .field("procedure_type", &self.procedure_type)
            .field("input_check", &self.input_check.is_some())
            .field("output_check", &self.output_check.is_some())
            .finish()
    }
}

/// An immutable contract: path → procedure descriptor.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    procedures: BTreeMap<String, Arc<ProcedureDef>>,
}

impl Contract {
    /// Start building a contract.
    pub fn builder() -> ContractBuilder {
        ContractBuilder::new()
    }

    /// The descriptor registered for `path`.
    pub fn get(&self, path: &str) -> Option<Arc<ProcedureDef>> {
        self.procedures.get(path).cloned()
    }

    /// The kind registered for `path`.
    pub fn kind_of(&self, path: &str) -> Option<ProcedureType> {
        self.procedures.get(path).map(|def| def.procedure_type)
    }

    /// All registered paths, in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    /// The set of paths declared as subscriptions.
    pub fn subscription_paths(&self) -> HashSet<String> {
        self.procedures
            .iter()
            .filter(|(_, def)| def.procedure_type == ProcedureType::Subscription)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether the contract is empty.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

/// Builder assembling a [`Contract`] from nested namespaces.
#[derive(Default)]
pub struct ContractBuilder {
    prefix: Vec<String>,
    procedures: BTreeMap<String, Arc<ProcedureDef>>,
    duplicates: Vec<String>,
}

impl ContractBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn join(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix.join("."), name)
        }
    }

    /// Register a procedure with an explicit descriptor.
    #[must_use = "This method returns a new ContractBuilder and does not modify self"]
    pub fn procedure(mut self, name: &str, def: ProcedureDef) -> Self {
        let path = self.join(name);
        if self.procedures.insert(path.clone(), Arc::new(def)).is_some() {
            self.duplicates.push(path);
        }
        self
    }

    /// Register a query at `name` (relative to the current namespace).
    #[must_use = "This method returns a new ContractBuilder and does not modify self"]
    pub fn query(self, name: &str) -> Self {
        self.procedure(name, ProcedureDef::query())
    }

    /// Register a mutation at `name`.
    #[must_use = "This method returns a new ContractBuilder and does not modify self"]
    pub fn mutation(self, name: &str) -> Self {
        self.procedure(name, ProcedureDef::mutation())
    }

    /// Register a subscription at `name`.
    #[must_use = "This method returns a new ContractBuilder and does not modify self"]
    pub fn subscription(self, name: &str) -> Self {
        self.procedure(name, ProcedureDef::subscription())
    }

    /// Descend into a namespace; procedures registered inside get the
    /// namespace's name prefixed onto their paths.
    #[must_use = "This method returns a new ContractBuilder and does not modify self"]
    pub fn namespace(mut self, name: &str, f: impl FnOnce(ContractBuilder) -> ContractBuilder) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.push(name.to_string());
        let child = f(ContractBuilder {
            prefix,
            procedures: BTreeMap::new(),
            duplicates: Vec::new(),
        });
        self.duplicates.extend(child.duplicates);
        for (path, def) in child.procedures {
            if self.procedures.insert(path.clone(), def).is_some() {
                self.duplicates.push(path);
            }
        }
        self
    }

    /// Finish building, validating every registered path.
    pub fn build(self) -> RpcResult<Contract> {
        if !self.duplicates.is_empty() {
            return Err(RpcError::validation(format!(
                "Duplicate contract path(s): {}",
                self.duplicates.join(", ")
            )));
        }
        for path in self.procedures.keys() {
            validate_path(path).map_err(|err| err.into_public())?;
        }
        Ok(Contract {
            procedures: self.procedures,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
