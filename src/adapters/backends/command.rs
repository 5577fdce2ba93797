//! Backend that delegates every capability to an external program.
//!
//! Each call spawns `<program> <args..> <subcommand>`, writes the request as
//! JSON to stdin and reads the JSON response from stdout. A non-zero exit is
//! a failed invocation; if stdout then holds a JSON error object it is used
//! as-is, otherwise stderr becomes the message.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CommandBackendConfig, ComponentContract, ContractTestSuite, TestRun};
use crate::domain::ports::{
    AgentBackend, Authored, CapabilityError, CompositionReport, CompositionRequest,
    ContractRequest, ImplementationReport, ImplementationRequest, TestHarness, TestRequest,
};

/// Request sent to the `run_tests` subcommand.
#[derive(Debug, Serialize)]
struct SuiteRequest<'a> {
    workspace: &'a Path,
    artifact: &'a str,
    suite: &'a ContractTestSuite,
}

pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    pub fn new(config: CommandBackendConfig) -> DomainResult<Self> {
        if config.program.trim().is_empty() {
            return Err(DomainError::BackendError(
                "command backend requires backend.command.program".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn exchange<Req, Resp>(
        &self,
        subcommand: &str,
        request: &Req,
        cwd: Option<&Path>,
    ) -> Result<Resp, CapabilityError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)
            .map_err(|e| CapabilityError::new(format!("encode {subcommand} request: {e}")))?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(subcommand)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| CapabilityError::new(format!("spawn {}: {e}", self.config.program)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CapabilityError::new("failed to capture stdin"))?;

        let write = async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| CapabilityError::new(format!("wait for {subcommand}: {e}")))?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !output.status.success() {
            if let Ok(mut err) = serde_json::from_slice::<CapabilityError>(&output.stdout) {
                if err.duration_ms == 0 {
                    err.duration_ms = elapsed;
                }
                return Err(err);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::new(format!(
                "{subcommand} exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .with_cost(0.0, elapsed));
        }
        if let Err(e) = written {
            tracing::warn!(subcommand, error = %e, "Backend closed stdin early");
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            CapabilityError::new(format!("decode {subcommand} response: {e}")).with_cost(0.0, elapsed)
        })
    }
}

#[async_trait]
impl AgentBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn author_contract(
        &self,
        request: ContractRequest,
    ) -> Result<Authored<ComponentContract>, CapabilityError> {
        self.exchange(&self.config.contract_subcommand, &request, None).await
    }

    async fn author_tests(
        &self,
        request: TestRequest,
    ) -> Result<Authored<ContractTestSuite>, CapabilityError> {
        self.exchange(&self.config.tests_subcommand, &request, None).await
    }

    async fn implement(
        &self,
        request: ImplementationRequest,
    ) -> Result<ImplementationReport, CapabilityError> {
        let workspace: PathBuf = request.workspace.clone();
        tracing::debug!(
            component_id = %request.contract.component_id,
            attempt_id = %request.attempt_id,
            workspace = %workspace.display(),
            "Invoking implementation command"
        );
        self.exchange(&self.config.implement_subcommand, &request, Some(&workspace))
            .await
    }

    async fn compose(
        &self,
        request: CompositionRequest,
    ) -> Result<CompositionReport, CapabilityError> {
        let workspace = request.workspace.clone();
        self.exchange(&self.config.compose_subcommand, &request, Some(&workspace))
            .await
    }
}

#[async_trait]
impl TestHarness for CommandBackend {
    async fn run_suite(
        &self,
        workspace: &Path,
        artifact: &str,
        suite: &ContractTestSuite,
    ) -> Result<TestRun, CapabilityError> {
        let request = SuiteRequest {
            workspace,
            artifact,
            suite,
        };
        self.exchange(&self.config.run_tests_subcommand, &request, Some(workspace))
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::models::ComponentNode;
    use uuid::Uuid;

    fn backend(script: &str) -> CommandBackend {
        CommandBackend::new(CommandBackendConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "pact-backend".to_string()],
            ..CommandBackendConfig::default()
        })
        .unwrap()
    }

    fn contract_request() -> ContractRequest {
        ContractRequest {
            run_id: Uuid::new_v4(),
            task: "demo".to_string(),
            component: ComponentNode::new("a", "A"),
            dependency_contracts: Vec::new(),
            prior_error: None,
        }
    }

    #[test]
    fn test_requires_program() {
        assert!(CommandBackend::new(CommandBackendConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_reads_json_response() {
        let backend = backend(
            r#"cat > /dev/null; echo '{"value": {"component_id": "a"}, "cost_usd": 0.2, "duration_ms": 5}'"#,
        );
        let authored = backend.author_contract(contract_request()).await.unwrap();
        assert_eq!(authored.value.component_id, "a");
        assert!((authored.cost_usd - 0.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_subcommand_is_passed_as_argument() {
        let backend = backend(
            r#"cat > /dev/null; echo "{\"value\": {\"component_id\": \"$1\"}, \"cost_usd\": 0, \"duration_ms\": 0}""#,
        );
        let authored = backend.author_contract(contract_request()).await.unwrap();
        assert_eq!(authored.value.component_id, "contract");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_capability_error() {
        let backend = backend("cat > /dev/null; echo boom >&2; exit 3");
        let err = backend.author_contract(contract_request()).await.unwrap_err();
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_structured_error_on_stdout() {
        let backend = backend(
            r#"cat > /dev/null; echo '{"message": "quota", "cost_usd": 1.5, "duration_ms": 9}'; exit 1"#,
        );
        let err = backend.author_contract(contract_request()).await.unwrap_err();
        assert_eq!(err.message, "quota");
        assert!((err.cost_usd - 1.5).abs() < f64::EPSILON);
        assert_eq!(err.duration_ms, 9);
    }
}
