//! Bounded narrative retry.
//!
//! A failed round is counted against a per-component bound. While rounds
//! remain, the diagnosis pass appends what was learned (attempt summaries,
//! failure messages, agent notes, I/O traces of failing assertions) to the
//! component's append-only context and requeues it. The next invocation
//! receives that context framed as a fresh engagement. Past the bound the
//! component fails permanently and its dependents stay blocked.

use chrono::Utc;

use crate::domain::errors::TerminalError;
use crate::domain::models::{
    ComponentNode, ContextFragment, DiagnosisConfig, FailureKind, FailureRecord, FragmentKind,
    ImplementationAttempt, TaskRecord, TaskState, TimeoutPolicy,
};

/// Result of counting a failed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Rounds remain; the component awaits diagnosis.
    Retry { rounds_failed: u32 },
    /// The bound is reached; the component is permanently failed.
    Exhausted(TerminalError),
}

#[derive(Debug, Clone)]
pub struct Diagnoser {
    config: DiagnosisConfig,
}

impl Diagnoser {
    pub fn new(config: DiagnosisConfig) -> Self {
        Self { config }
    }

    /// Leaves fail on their own implementation; parents on the glue joining
    /// children that already satisfied their contracts.
    pub fn classify(node: &ComponentNode) -> FailureKind {
        if node.is_leaf() {
            FailureKind::ImplementationBug
        } else {
            FailureKind::GlueBug
        }
    }

    /// Count one failed round for `component_id`.
    pub fn register_failed_round(
        &self,
        component_id: &str,
        task: &mut TaskRecord,
        kind: FailureKind,
        all_timed_out: bool,
        explanation: impl Into<String>,
    ) -> FailureVerdict {
        let forgiven = all_timed_out && self.config.timeout_policy == TimeoutPolicy::Forgiven;
        let counted = if forgiven {
            task.timeout_rounds += 1;
            task.timeout_rounds
        } else {
            task.rounds_failed += 1;
            task.rounds_failed
        };

        task.failure_history.push(FailureRecord {
            round: task.round,
            kind,
            explanation: explanation.into(),
            all_timed_out,
            recorded_at: Utc::now(),
        });
        task.state = TaskState::Failed;
        task.winner = None;

        if counted >= self.config.max_retries {
            task.exhausted = true;
            task.awaiting_diagnosis = None;
            FailureVerdict::Exhausted(TerminalError::DiagnosisExhausted {
                component_id: component_id.to_string(),
                rounds: task.rounds_failed + task.timeout_rounds,
            })
        } else {
            task.awaiting_diagnosis = Some(kind);
            FailureVerdict::Retry {
                rounds_failed: task.rounds_failed,
            }
        }
    }

    /// Append the evidence of the failed round to the component context.
    ///
    /// `attempts` are the attempts of the current round; they are taken in
    /// submission order so the bundle stays chronological.
    pub fn gather(&self, task: &mut TaskRecord, attempts: &[ImplementationAttempt]) {
        let round = task.round;
        let mut ordered: Vec<&ImplementationAttempt> =
            attempts.iter().filter(|a| a.round == round).collect();
        ordered.sort_by_key(|a| a.submission_order);

        let mut seen_messages: Vec<String> = Vec::new();
        for attempt in ordered {
            task.context.push(ContextFragment {
                kind: FragmentKind::Attempt,
                round,
                content: format!(
                    "attempt #{} by {}: {}",
                    attempt.submission_order,
                    attempt.agent,
                    attempt.failure_summary()
                ),
            });

            for failure in attempt.tests.failures() {
                if let Some(message) = &failure.message {
                    if !seen_messages.contains(message) {
                        seen_messages.push(message.clone());
                        task.context.push(ContextFragment {
                            kind: FragmentKind::FailureMessage,
                            round,
                            content: format!("{}: {}", failure.name, message),
                        });
                    }
                }
                let trace = failure.trace.as_ref().map_or_else(
                    || {
                        format!(
                            "{}: {}",
                            failure.name,
                            failure.message.as_deref().unwrap_or("assertion failed")
                        )
                    },
                    |t| format!("{}: {}", failure.name, t.render()),
                );
                task.context.push(ContextFragment {
                    kind: FragmentKind::Trace,
                    round,
                    content: trace,
                });
            }

            for error in &attempt.tests.errors {
                if !seen_messages.contains(error) {
                    seen_messages.push(error.clone());
                    task.context.push(ContextFragment {
                        kind: FragmentKind::FailureMessage,
                        round,
                        content: error.clone(),
                    });
                }
            }

            if let Some(notes) = &attempt.notes {
                task.context.push(ContextFragment {
                    kind: FragmentKind::Notes,
                    round,
                    content: notes.clone(),
                });
            }
        }
        self.trim(task);
    }

    /// Drop the oldest non-trace fragments until the bound holds.
    fn trim(&self, task: &mut TaskRecord) {
        let max = self.config.max_context_fragments;
        while task.context.len() > max {
            match task
                .context
                .iter()
                .position(|f| f.kind != FragmentKind::Trace)
            {
                Some(index) => {
                    task.context.remove(index);
                }
                None => break,
            }
        }
    }

    /// Finish the diagnosis pass: record the classification and requeue the
    /// component for the next round. Returns the explanation.
    pub fn diagnose(&self, node: &ComponentNode, task: &mut TaskRecord) -> String {
        let kind = task
            .awaiting_diagnosis
            .unwrap_or_else(|| Self::classify(node));
        let explanation = match kind {
            FailureKind::ImplementationBug => format!(
                "implementation bug: no attempt for '{}' passed its contract tests in round {}",
                node.id, task.round
            ),
            FailureKind::GlueBug => format!(
                "glue bug: children of '{}' satisfy their contracts but the composition failed its integration tests in round {}",
                node.id, task.round
            ),
        };

        task.context.push(ContextFragment {
            kind: FragmentKind::Diagnosis,
            round: task.round,
            content: explanation.clone(),
        });
        self.trim(task);

        task.awaiting_diagnosis = None;
        task.state = TaskState::Queued;
        task.round += 1;
        explanation
    }

    /// Render the context bundle for the next invocation, if there is any.
    pub fn render(&self, node: &ComponentNode, task: &TaskRecord) -> Option<String> {
        if task.context.is_empty() {
            return None;
        }
        let mut out = format!(
            "You are a senior engineer taking over component '{}' ({}) with a fresh pair of eyes.\n\
             Earlier attempts did not pass the contract tests. The record below is evidence, \
             not a plan: do not continue their reasoning. Start again from the contract and the \
             failing assertions.\n",
            node.name, node.id
        );
        let mut current_round = None;
        for fragment in &task.context {
            if current_round != Some(fragment.round) {
                current_round = Some(fragment.round);
                out.push_str(&format!("\n## Round {}\n", fragment.round));
            }
            let label = match fragment.kind {
                FragmentKind::Attempt => "attempt",
                FragmentKind::FailureMessage => "failure",
                FragmentKind::Notes => "notes",
                FragmentKind::Trace => "trace",
                FragmentKind::Diagnosis => "diagnosis",
            };
            out.push_str(&format!("- [{label}] {}\n", fragment.content));
        }
        Some(out)
    }
}
