//! Interface contracts and their executable test suites.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use super::component::ComponentId;

/// Content hash identifying one revision of a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractVersion(pub String);

impl ContractVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for display.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractVersion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_ref: type_ref.into(),
        }
    }
}

/// A declared error condition of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCondition {
    pub name: String,
    #[serde(default)]
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default = "default_return")]
    pub returns: String,
    #[serde(default)]
    pub errors: Vec<ErrorCondition>,
}

fn default_return() -> String {
    "()".to_string()
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, returns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters,
            returns: returns.into(),
            errors: Vec::new(),
        }
    }

    /// Canonical one-line rendering, e.g. `parse(input: str) -> Ast`.
    pub fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_ref))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({}) -> {}", self.name, params, self.returns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Typed interface a component's implementation must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentContract {
    pub component_id: ComponentId,
    #[serde(default)]
    pub version: ContractVersion,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub functions: Vec<FunctionSignature>,
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
    /// Free-form invariant assertions.
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<ComponentId>,
}

impl ComponentContract {
    pub fn new(component_id: impl Into<String>) -> Self {
        let component_id = component_id.into();
        Self {
            name: component_id.clone(),
            component_id,
            version: ContractVersion::default(),
            description: String::new(),
            functions: Vec::new(),
            types: Vec::new(),
            invariants: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Hex SHA-256 of the canonical JSON with the version field blanked.
    pub fn compute_version(&self) -> ContractVersion {
        let mut unversioned = self.clone();
        unversioned.version = ContractVersion::default();
        // Struct fields serialize in declaration order and sets are sorted,
        // so the encoding is stable for equal contracts.
        let bytes = serde_json::to_vec(&unversioned).unwrap_or_default();
        ContractVersion(hex::encode(Sha256::digest(&bytes)))
    }

    /// Stamp the content hash into `version`.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.version = self.compute_version();
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Whether `signature` appears verbatim among the declared functions.
    pub fn declares(&self, signature: &FunctionSignature) -> bool {
        self.functions.iter().any(|f| f == signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Signatures this case calls; each must be declared by the contract.
    #[serde(default)]
    pub exercises: Vec<FunctionSignature>,
    /// Executable assertion body.
    pub body: String,
    #[serde(default)]
    pub expected_behavior: String,
}

/// Executable tests generated against one contract version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTestSuite {
    pub component_id: ComponentId,
    pub contract_version: ContractVersion,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

fn default_language() -> String {
    "rust".to_string()
}

impl ContractTestSuite {
    pub fn is_stale(&self, contract: &ComponentContract) -> bool {
        self.contract_version != contract.version
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
