//! Mechanical validation gate.
//!
//! A pure function of the tree, the current contracts and the current test
//! suites. Every check reports independently; errors block the Validate gate
//! and warnings are only recorded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::errors::{Severity, ValidationIssue};
use crate::domain::models::{
    ComponentContract, ComponentId, ContractTestSuite, DecompositionTree, ValidationConfig,
};
use crate::services::dependency_graph::DependencyGraph;
use crate::services::test_syntax;

/// Findings of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity() {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    /// Errors and warnings concerning `component_id`.
    pub fn for_component<'a>(&'a self, component_id: &'a str) -> impl Iterator<Item = &'a ValidationIssue> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .filter(move |i| i.component_id() == Some(component_id))
    }
}

/// Run the graph-only checks: structure, missing references, acyclicity.
pub fn validate_tree(tree: &DecompositionTree, policy: &ValidationConfig) -> ValidationReport {
    let graph = DependencyGraph::new(tree);
    let mut report = ValidationReport::default();

    report.extend(check_structure(tree, policy));
    report.extend(graph.missing_dependencies());
    report.extend(
        graph
            .orphans()
            .into_iter()
            .map(|component_id| ValidationIssue::OrphanedComponent { component_id }),
    );
    if let Some(path) = graph.detect_cycles() {
        report.push(ValidationIssue::CycleDetected { path });
    }
    report
}

/// Full validation over tree, contracts and suites.
pub fn validate(
    tree: &DecompositionTree,
    contracts: &BTreeMap<ComponentId, ComponentContract>,
    suites: &BTreeMap<ComponentId, ContractTestSuite>,
    policy: &ValidationConfig,
) -> ValidationReport {
    let graph = DependencyGraph::new(tree);
    let mut report = validate_tree(tree, policy);

    report.extend(graph.resolve_refs(contracts));
    report.extend(check_contract_dependencies(tree, contracts));
    report.extend(check_coverage(tree, contracts, suites, policy));
    report.extend(check_suites(contracts, suites));
    report
}

fn check_structure(tree: &DecompositionTree, policy: &ValidationConfig) -> Vec<ValidationIssue> {
    tree.nodes
        .values()
        .filter(|node| !node.is_leaf())
        .filter(|node| {
            let count = node.children.len();
            count < policy.min_children || count > policy.max_children
        })
        .map(|node| ValidationIssue::ComponentCountOutOfRange {
            component_id: node.id.clone(),
            count: node.children.len(),
            min: policy.min_children,
            max: policy.max_children,
        })
        .collect()
}

/// Contract dependencies may be narrower than graph dependencies, never wider.
fn check_contract_dependencies(
    tree: &DecompositionTree,
    contracts: &BTreeMap<ComponentId, ComponentContract>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for contract in contracts.values() {
        let Some(node) = tree.get(&contract.component_id) else {
            continue;
        };
        for dep in &contract.dependencies {
            // Unknown ids are already reported as unresolved references
            if tree.get(dep).is_some() && !node.dependencies.contains(dep) {
                issues.push(ValidationIssue::WiderContractDependencies {
                    component_id: contract.component_id.clone(),
                    dependency_id: dep.clone(),
                });
            }
        }
    }
    issues
}

fn check_coverage(
    tree: &DecompositionTree,
    contracts: &BTreeMap<ComponentId, ComponentContract>,
    suites: &BTreeMap<ComponentId, ContractTestSuite>,
    policy: &ValidationConfig,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for id in tree.ids() {
        match contracts.get(id) {
            None if policy.require_contract_for_every_node => {
                issues.push(ValidationIssue::MissingContract {
                    component_id: id.clone(),
                });
            }
            Some(contract) if contract.functions.is_empty() => {
                issues.push(ValidationIssue::EmptyContract {
                    component_id: id.clone(),
                });
            }
            _ => {}
        }
        if policy.require_contract_for_every_node && !suites.contains_key(id) {
            issues.push(ValidationIssue::MissingTestSuite {
                component_id: id.clone(),
            });
        }
    }
    issues
}

/// Staleness, parseability and signature coherence of every suite.
fn check_suites(
    contracts: &BTreeMap<ComponentId, ComponentContract>,
    suites: &BTreeMap<ComponentId, ContractTestSuite>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for suite in suites.values() {
        let contract = contracts.get(&suite.component_id);
        match contract {
            Some(contract) if suite.is_stale(contract) => {
                issues.push(ValidationIssue::StaleTestSuite {
                    component_id: suite.component_id.clone(),
                    suite_version: suite.contract_version.to_string(),
                    contract_version: contract.version.to_string(),
                });
            }
            None => {
                issues.push(ValidationIssue::StaleTestSuite {
                    component_id: suite.component_id.clone(),
                    suite_version: suite.contract_version.to_string(),
                    contract_version: String::new(),
                });
            }
            Some(_) => {}
        }

        for case in &suite.cases {
            if let Err(err) = test_syntax::check(&case.body, &suite.language) {
                issues.push(ValidationIssue::MalformedTest {
                    component_id: suite.component_id.clone(),
                    test_name: case.name.clone(),
                    reason: err.to_string(),
                });
            }
            if let Some(contract) = contract {
                for signature in &case.exercises {
                    if !contract.declares(signature) {
                        issues.push(ValidationIssue::SignatureMismatch {
                            component_id: suite.component_id.clone(),
                            test_name: case.name.clone(),
                            signature: signature.render(),
                        });
                    }
                }
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ComponentNode, FunctionSignature, Parameter, TestCase};

    fn tree() -> DecompositionTree {
        let mut tree = DecompositionTree::new(ComponentNode::new("root", "Root"));
        tree.insert_child("root", ComponentNode::new("a", "A")).unwrap();
        tree.insert_child("root", ComponentNode::new("b", "B").with_dependencies(["a"]))
            .unwrap();
        tree
    }

    fn signature() -> FunctionSignature {
        FunctionSignature::new("run", vec![Parameter::new("x", "i64")], "i64")
    }

    fn fixtures(
        tree: &DecompositionTree,
    ) -> (
        BTreeMap<ComponentId, ComponentContract>,
        BTreeMap<ComponentId, ContractTestSuite>,
    ) {
        let mut contracts = BTreeMap::new();
        let mut suites = BTreeMap::new();
        for node in tree.nodes.values() {
            let mut contract = ComponentContract::new(node.id.clone());
            contract.functions.push(signature());
            contract.dependencies.clone_from(&node.dependencies);
            let contract = contract.sealed();
            suites.insert(
                node.id.clone(),
                ContractTestSuite {
                    component_id: node.id.clone(),
                    contract_version: contract.version.clone(),
                    language: "rust".into(),
                    cases: vec![TestCase {
                        name: "runs".into(),
                        exercises: vec![signature()],
                        body: "assert_eq!(run(1), 1);".into(),
                        expected_behavior: "identity".into(),
                    }],
                },
            );
            contracts.insert(node.id.clone(), contract);
        }
        (contracts, suites)
    }

    #[test]
    fn test_clean_tree_passes() {
        let tree = tree();
        let (contracts, suites) = fixtures(&tree);
        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        assert!(report.passed(), "{report:?}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unresolved_reference_in_contract() {
        let tree = tree();
        let (mut contracts, suites) = fixtures(&tree);
        let b = contracts.get_mut("b").unwrap();
        b.dependencies.insert("ghost".into());
        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        assert!(report.errors.contains(&ValidationIssue::UnresolvedReference {
            component_id: "b".into(),
            missing_id: "ghost".into(),
        }));
    }

    #[test]
    fn test_wider_contract_dependencies() {
        let tree = tree();
        let (mut contracts, suites) = fixtures(&tree);
        contracts.get_mut("a").unwrap().dependencies.insert("b".into());
        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        assert!(report.errors.iter().any(|i| matches!(
            i,
            ValidationIssue::WiderContractDependencies { component_id, dependency_id }
                if component_id == "a" && dependency_id == "b"
        )));
    }

    #[test]
    fn test_narrower_contract_dependencies_are_legal() {
        let tree = tree();
        let (mut contracts, mut suites) = fixtures(&tree);
        let mut b = contracts.remove("b").unwrap();
        b.dependencies.clear();
        let b = b.sealed();
        suites.get_mut("b").unwrap().contract_version = b.version.clone();
        contracts.insert("b".into(), b);
        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        assert!(report.passed(), "{report:?}");
    }

    #[test]
    fn test_stale_suite_malformed_and_mismatch() {
        let tree = tree();
        let (mut contracts, mut suites) = fixtures(&tree);
        let a = contracts.remove("a").unwrap();
        let mut changed = a.clone();
        changed.invariants.push("x > 0".into());
        contracts.insert("a".into(), changed.sealed());

        let case = &mut suites.get_mut("b").unwrap().cases[0];
        case.body = "assert_eq!(run(1, 1);".into();
        case.exercises = vec![FunctionSignature::new("run", vec![], "i64")];

        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        let kinds: Vec<&str> = report.errors.iter().map(ValidationIssue::kind).collect();
        assert!(kinds.contains(&"stale_test_suite"));
        assert!(kinds.contains(&"malformed_test"));
        assert!(kinds.contains(&"signature_mismatch"));
        assert_eq!(report.for_component("b").count(), 2);
    }

    #[test]
    fn test_balanced_but_incomplete_body_is_malformed() {
        let tree = tree();
        let (contracts, mut suites) = fixtures(&tree);
        suites.get_mut("b").unwrap().cases[0].body = "assert_eq!(run(1) 1);".into();

        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        let kinds: Vec<&str> = report.errors.iter().map(ValidationIssue::kind).collect();
        assert_eq!(kinds, vec!["malformed_test"]);
    }

    #[test]
    fn test_structure_and_cycle() {
        let mut tree = tree();
        tree.insert_child("a", ComponentNode::new("a1", "A1")).unwrap();
        tree.get_mut("a1").unwrap().dependencies.insert("b".into());
        let report = validate_tree(&tree, &ValidationConfig::default());
        let kinds: Vec<&str> = report.errors.iter().map(ValidationIssue::kind).collect();
        assert!(kinds.contains(&"component_count_out_of_range"));
        assert!(kinds.contains(&"cycle_detected"));
    }

    #[test]
    fn test_missing_contract_and_suite() {
        let tree = tree();
        let (mut contracts, mut suites) = fixtures(&tree);
        contracts.remove("a");
        suites.remove("a");
        let report = validate(&tree, &contracts, &suites, &ValidationConfig::default());
        let kinds: Vec<&str> = report.errors.iter().map(ValidationIssue::kind).collect();
        assert!(kinds.contains(&"missing_contract"));
        assert!(kinds.contains(&"missing_test_suite"));

        let lenient = ValidationConfig {
            require_contract_for_every_node: false,
            ..ValidationConfig::default()
        };
        assert!(validate(&tree, &contracts, &suites, &lenient).passed());
    }
}
