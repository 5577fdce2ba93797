//! Scripted in-process backend and harness.
//!
//! Every capability answers from a per-component script queue and falls back
//! to a deterministic default once the queue is empty. The backend also acts
//! as the test harness for the composed artifacts it produced.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::models::{
    ComponentContract, ComponentId, ComponentNode, ContractTestSuite, FunctionSignature, Parameter,
    TestCase, TestCaseResult, TestRun,
};
use crate::domain::ports::{
    AgentBackend, Authored, CapabilityError, CompositionReport, CompositionRequest,
    ContractRequest, ImplementationReport, ImplementationRequest, TestHarness, TestRequest,
};

/// Scripted result of one implementation or composition call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedAttempt {
    /// Passing cases; the remainder of `total` fail.
    pub passed: usize,
    pub total: usize,
    pub duration_ms: u64,
    pub cost_usd: f64,
    /// Wall-clock time spent before answering.
    pub delay: Duration,
    /// Message for every failing case; defaults to a per-case message.
    pub failure_message: Option<String>,
    /// Collection errors reported alongside the results.
    pub errors: Vec<String>,
    /// Fail the invocation itself with this message.
    pub invocation_error: Option<String>,
    pub notes: Option<String>,
}

impl Default for ScriptedAttempt {
    fn default() -> Self {
        Self {
            passed: 1,
            total: 1,
            duration_ms: 10,
            cost_usd: 0.0,
            delay: Duration::ZERO,
            failure_message: None,
            errors: Vec::new(),
            invocation_error: None,
            notes: None,
        }
    }
}

impl ScriptedAttempt {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn partial(passed: usize, total: usize) -> Self {
        Self {
            passed,
            total,
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            passed: 0,
            total: 1,
            failure_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// No test collected and no collection error either.
    pub fn zero_tests() -> Self {
        Self {
            passed: 0,
            total: 0,
            ..Self::default()
        }
    }

    pub fn invocation_error(message: impl Into<String>) -> Self {
        Self {
            invocation_error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn test_run(&self, component_id: &str) -> TestRun {
        let results = (0..self.total)
            .map(|i| {
                let name = format!("test_{component_id}_{i}");
                if i < self.passed {
                    TestCaseResult::pass(name)
                } else {
                    let message = self
                        .failure_message
                        .clone()
                        .unwrap_or_else(|| format!("{component_id}: case {i} returned the wrong value"));
                    TestCaseResult::fail(name, message)
                }
            })
            .collect();
        TestRun {
            results,
            errors: self.errors.clone(),
        }
    }

    fn error(&self) -> Option<CapabilityError> {
        self.invocation_error
            .as_ref()
            .map(|message| CapabilityError::new(message.clone()).with_cost(self.cost_usd, self.duration_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    AuthorContract,
    AuthorTests,
    Implement,
    Compose,
    RunSuite,
}

/// One recorded call into the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub capability: Capability,
    pub component_id: ComponentId,
    pub round: u32,
    /// Whether the request carried a rendered diagnosis context.
    pub had_context: bool,
}

/// Decrements the in-flight counter when the call ends or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Scripts {
    contracts: HashMap<ComponentId, VecDeque<Result<ComponentContract, String>>>,
    suites: HashMap<ComponentId, VecDeque<Result<ContractTestSuite, String>>>,
    implementations: HashMap<ComponentId, VecDeque<ScriptedAttempt>>,
    compositions: HashMap<ComponentId, VecDeque<ScriptedAttempt>>,
    /// Fallback once a component's queue is empty.
    fallbacks: HashMap<ComponentId, ScriptedAttempt>,
}

/// Scripted backend for dry runs and tests.
pub struct MockBackend {
    scripts: Mutex<Scripts>,
    /// Harness verdicts keyed by composed artifact.
    composed: Mutex<HashMap<String, TestRun>>,
    invocations: Mutex<Vec<Invocation>>,
    authoring_cost_usd: f64,
    authoring_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Scripts::default()),
            composed: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            authoring_cost_usd: 0.0,
            authoring_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_authoring_cost(mut self, cost_usd: f64) -> Self {
        self.authoring_cost_usd = cost_usd;
        self
    }

    #[must_use]
    pub fn with_authoring_delay(mut self, delay: Duration) -> Self {
        self.authoring_delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Queue a contract (sealed on return) for `component_id`.
    pub async fn script_contract(&self, component_id: &str, contract: ComponentContract) {
        self.scripts
            .lock()
            .await
            .contracts
            .entry(component_id.to_string())
            .or_default()
            .push_back(Ok(contract));
    }

    pub async fn script_contract_error(&self, component_id: &str, message: impl Into<String>) {
        self.scripts
            .lock()
            .await
            .contracts
            .entry(component_id.to_string())
            .or_default()
            .push_back(Err(message.into()));
    }

    pub async fn script_suite(&self, component_id: &str, suite: ContractTestSuite) {
        self.scripts
            .lock()
            .await
            .suites
            .entry(component_id.to_string())
            .or_default()
            .push_back(Ok(suite));
    }

    /// Queue implementation results, consumed one per attempt.
    pub async fn script_implementations<I>(&self, component_id: &str, attempts: I)
    where
        I: IntoIterator<Item = ScriptedAttempt>,
    {
        self.scripts
            .lock()
            .await
            .implementations
            .entry(component_id.to_string())
            .or_default()
            .extend(attempts);
    }

    pub async fn script_compositions<I>(&self, component_id: &str, attempts: I)
    where
        I: IntoIterator<Item = ScriptedAttempt>,
    {
        self.scripts
            .lock()
            .await
            .compositions
            .entry(component_id.to_string())
            .or_default()
            .extend(attempts);
    }

    /// Result used for `component_id` once its queues are empty.
    pub async fn set_fallback(&self, component_id: &str, attempt: ScriptedAttempt) {
        self.scripts
            .lock()
            .await
            .fallbacks
            .insert(component_id.to_string(), attempt);
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Calls of one capability, in arrival order.
    pub async fn calls(&self, capability: Capability) -> Vec<Invocation> {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|i| i.capability == capability)
            .cloned()
            .collect()
    }

    /// Highest number of implementation or composition calls seen at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn log(&self, capability: Capability, component_id: &str, round: u32, had_context: bool) {
        self.invocations.lock().await.push(Invocation {
            capability,
            component_id: component_id.to_string(),
            round,
            had_context,
        });
    }

    async fn next_implementation(&self, component_id: &str) -> ScriptedAttempt {
        let mut scripts = self.scripts.lock().await;
        let scripted = scripts
            .implementations
            .get_mut(component_id)
            .and_then(VecDeque::pop_front);
        scripted
            .or_else(|| scripts.fallbacks.get(component_id).cloned())
            .unwrap_or_default()
    }

    async fn next_composition(&self, component_id: &str) -> ScriptedAttempt {
        let mut scripts = self.scripts.lock().await;
        let scripted = scripts
            .compositions
            .get_mut(component_id)
            .and_then(VecDeque::pop_front);
        scripted
            .or_else(|| scripts.fallbacks.get(component_id).cloned())
            .unwrap_or_default()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract with one entry point per component, declaring the graph
/// dependencies of the node.
pub fn default_contract(node: &ComponentNode) -> ComponentContract {
    let mut contract = ComponentContract::new(node.id.clone());
    contract.name.clone_from(&node.name);
    contract.description.clone_from(&node.description);
    contract.functions.push(FunctionSignature::new(
        entry_point(&node.id),
        vec![Parameter::new("input", "str")],
        "str",
    ));
    contract.dependencies = node.dependencies.clone();
    contract
}

/// One case per declared function, bound to the contract's version.
pub fn default_suite(contract: &ComponentContract) -> ContractTestSuite {
    let cases = contract
        .functions
        .iter()
        .map(|function| TestCase {
            name: format!("test_{}", function.name),
            exercises: vec![function.clone()],
            body: format!("assert_eq!({}(\"ping\"), \"ping\");", function.name),
            expected_behavior: format!("{} echoes its input", function.name),
        })
        .collect();
    ContractTestSuite {
        component_id: contract.component_id.clone(),
        contract_version: contract.version.clone(),
        language: "rust".to_string(),
        cases,
    }
}

fn entry_point(component_id: &str) -> String {
    let ident: String = component_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("run_{ident}")
}

#[async_trait]
impl AgentBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn author_contract(
        &self,
        request: ContractRequest,
    ) -> Result<Authored<ComponentContract>, CapabilityError> {
        let id = request.component.id.clone();
        self.log(Capability::AuthorContract, &id, 0, request.prior_error.is_some()).await;
        if !self.authoring_delay.is_zero() {
            tokio::time::sleep(self.authoring_delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .await
            .contracts
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        let contract = match scripted {
            Some(Ok(contract)) => contract,
            Some(Err(message)) => {
                return Err(CapabilityError::new(message).with_cost(self.authoring_cost_usd, 0));
            }
            None => default_contract(&request.component),
        };
        tracing::debug!(component_id = %id, "Mock contract authored");
        Ok(Authored {
            value: contract.sealed(),
            cost_usd: self.authoring_cost_usd,
            duration_ms: 0,
        })
    }

    async fn author_tests(
        &self,
        request: TestRequest,
    ) -> Result<Authored<ContractTestSuite>, CapabilityError> {
        let id = request.contract.component_id.clone();
        self.log(Capability::AuthorTests, &id, 0, false).await;

        let scripted = self
            .scripts
            .lock()
            .await
            .suites
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        let suite = match scripted {
            Some(Ok(suite)) => suite,
            Some(Err(message)) => {
                return Err(CapabilityError::new(message).with_cost(self.authoring_cost_usd, 0));
            }
            None => default_suite(&request.contract),
        };
        Ok(Authored {
            value: suite,
            cost_usd: self.authoring_cost_usd,
            duration_ms: 0,
        })
    }

    async fn implement(
        &self,
        request: ImplementationRequest,
    ) -> Result<ImplementationReport, CapabilityError> {
        let id = request.contract.component_id.clone();
        let _guard = InFlight::enter(&self.in_flight, &self.peak);
        self.log(Capability::Implement, &id, request.round, request.context.is_some()).await;

        let script = self.next_implementation(&id).await;
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if let Some(err) = script.error() {
            return Err(err);
        }

        tracing::debug!(
            component_id = %id,
            slot = request.slot,
            passed = script.passed,
            total = script.total,
            "Mock implementation finished"
        );
        Ok(ImplementationReport {
            agent: format!("mock-{}", request.slot),
            artifact: Some(format!("impl:{id}:{}", request.attempt_id)),
            tests: script.test_run(&id),
            cost_usd: script.cost_usd,
            duration_ms: script.duration_ms,
            notes: script.notes.clone(),
        })
    }

    async fn compose(
        &self,
        request: CompositionRequest,
    ) -> Result<CompositionReport, CapabilityError> {
        let id = request.parent.component_id.clone();
        let _guard = InFlight::enter(&self.in_flight, &self.peak);
        self.log(Capability::Compose, &id, request.round, request.context.is_some()).await;

        let script = self.next_composition(&id).await;
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if let Some(err) = script.error() {
            return Err(err);
        }

        let artifact = format!("composed:{id}:{}", request.attempt_id);
        self.composed
            .lock()
            .await
            .insert(artifact.clone(), script.test_run(&id));
        Ok(CompositionReport {
            agent: "mock".to_string(),
            artifact,
            suite: default_suite(&request.parent),
            cost_usd: script.cost_usd,
            duration_ms: script.duration_ms,
            notes: script.notes,
        })
    }
}

#[async_trait]
impl TestHarness for MockBackend {
    async fn run_suite(
        &self,
        _workspace: &Path,
        artifact: &str,
        suite: &ContractTestSuite,
    ) -> Result<TestRun, CapabilityError> {
        self.log(Capability::RunSuite, &suite.component_id, 0, false).await;
        if let Some(verdict) = self.composed.lock().await.get(artifact) {
            return Ok(verdict.clone());
        }
        Ok(TestRun {
            results: suite.cases.iter().map(|c| TestCaseResult::pass(c.name.clone())).collect(),
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn implementation_request(id: &str, slot: usize) -> ImplementationRequest {
        let contract = default_contract(&ComponentNode::new(id, id)).sealed();
        ImplementationRequest {
            run_id: Uuid::new_v4(),
            attempt_id: Uuid::new_v4(),
            suite: default_suite(&contract),
            contract,
            context: None,
            workspace: PathBuf::from("/tmp/unused"),
            round: 0,
            slot,
        }
    }

    #[test]
    fn test_default_contract_and_suite_agree() {
        let node = ComponentNode::new("http-client", "HTTP client").with_dependencies(["codec"]);
        let contract = default_contract(&node).sealed();
        let suite = default_suite(&contract);

        assert_eq!(contract.functions[0].name, "run_http_client");
        assert!(contract.dependencies.contains("codec"));
        assert_eq!(suite.contract_version, contract.version);
        assert!(suite.cases.iter().all(|c| c.exercises.iter().all(|s| contract.declares(s))));
    }

    #[tokio::test]
    async fn test_scripted_attempts_then_fallback() {
        let backend = MockBackend::new();
        backend
            .script_implementations("x", [ScriptedAttempt::partial(4, 5).with_duration(7)])
            .await;

        let first = backend.implement(implementation_request("x", 0)).await.unwrap();
        assert_eq!(first.tests.passed(), 4);
        assert_eq!(first.tests.total(), 5);
        assert_eq!(first.duration_ms, 7);

        let second = backend.implement(implementation_request("x", 1)).await.unwrap();
        assert!(second.tests.all_passed());
        assert_eq!(backend.calls(Capability::Implement).await.len(), 2);
    }

    #[tokio::test]
    async fn test_invocation_error_reports_cost() {
        let backend = MockBackend::new();
        backend
            .set_fallback("x", ScriptedAttempt::invocation_error("agent crashed").with_cost(0.3))
            .await;
        let err = backend.implement(implementation_request("x", 0)).await.unwrap_err();
        assert_eq!(err.message, "agent crashed");
        assert!((err.cost_usd - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_harness_replays_composition_verdict() {
        let backend = MockBackend::new();
        backend
            .script_compositions("root", [ScriptedAttempt::failing("glue mismatch")])
            .await;
        let parent = default_contract(&ComponentNode::new("root", "Root")).sealed();
        let report = backend
            .compose(CompositionRequest {
                run_id: Uuid::new_v4(),
                attempt_id: Uuid::new_v4(),
                parent,
                children: Vec::new(),
                context: None,
                workspace: PathBuf::from("/tmp/unused"),
                round: 0,
            })
            .await
            .unwrap();

        let verdict = backend
            .run_suite(Path::new("/tmp/unused"), &report.artifact, &report.suite)
            .await
            .unwrap();
        assert!(!verdict.all_passed());
        assert_eq!(verdict.first_failure_message().as_deref(), Some("glue mismatch"));
    }
}
