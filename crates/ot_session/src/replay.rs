//! Scripted multi-site replays.
//!
//! Every site first runs its own steps locally. Each site then receives the
//! requests of all other sites in reverse generation order, which exercises
//! out-of-order buffering as well as transformation. A scenario converges
//! when all sites end with the same text and state vector.

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::session::DocumentSession;
use ot_engine::{Operation, Request, StateVector, TextBuffer, UserId};
use serde::{Deserialize, Serialize};

/// A scripted editing session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Initial document shared by every site
    pub text: String,
    pub sites: Vec<SiteScript>,
}

/// The steps one user performs at their own site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteScript {
    pub user: UserId,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Edit { operation: Operation },
    Undo,
    Redo,
}

/// Final state of one site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SiteOutcome {
    pub user: UserId,
    pub text: String,
    pub current: StateVector,
    /// Requests still waiting for dependencies that never arrived
    pub pending: usize,
}

/// Result of a replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub sites: Vec<SiteOutcome>,
}

impl ReplayReport {
    /// Whether every site ended in the same state with nothing pending.
    pub fn converged(&self) -> bool {
        let Some(first) = self.sites.first() else {
            return true;
        };
        self.sites.iter().all(|site| {
            site.pending == 0 && site.text == first.text && site.current == first.current
        })
    }
}

/// Run a scenario to completion.
pub fn run(scenario: &Scenario, config: &SessionConfig) -> SessionResult<ReplayReport> {
    let users: Vec<UserId> = scenario.sites.iter().map(|site| site.user).collect();

    let mut sessions = Vec::with_capacity(scenario.sites.len());
    let mut generated: Vec<Request> = Vec::new();

    for script in &scenario.sites {
        let mut session =
            DocumentSession::new(TextBuffer::from(scenario.text.as_str()), config.clone());
        for peer in users.iter().filter(|peer| **peer != script.user) {
            session.add_user(*peer, StateVector::new())?;
        }

        for step in &script.steps {
            let request = match step {
                Step::Edit { operation } => {
                    Some(session.local_edit(script.user, operation.clone())?)
                }
                Step::Undo => session.undo(script.user)?,
                Step::Redo => session.redo(script.user)?,
            };
            generated.extend(request);
        }
        tracing::debug!(
            "{} generated its requests, text is now {:?}",
            script.user,
            session.buffer().text()
        );
        sessions.push(session);
    }

    for (script, session) in scenario.sites.iter().zip(sessions.iter_mut()) {
        for request in generated.iter().rev() {
            if request.user != script.user {
                session.receive(request.clone())?;
            }
        }
    }

    let sites = scenario
        .sites
        .iter()
        .zip(sessions)
        .map(|(script, session)| SiteOutcome {
            user: script.user,
            text: session.buffer().text(),
            current: session.current().clone(),
            pending: session.pending_len(),
        })
        .collect();

    Ok(ReplayReport { sites })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_scenario_parsing() {
        let scenario = parse(
            r#"{
                "text": "ab",
                "sites": [
                    {"user": 1, "steps": [
                        {"action": "edit", "operation": {"type": "insert", "position": 1, "text": "X"}},
                        {"action": "undo"}
                    ]},
                    {"user": 2}
                ]
            }"#,
        );

        assert_eq!(scenario.text, "ab");
        assert_eq!(scenario.sites.len(), 2);
        assert_eq!(scenario.sites[0].steps[1], Step::Undo);
        assert!(scenario.sites[1].steps.is_empty());
    }

    #[test]
    fn test_empty_scenario_converges() {
        let report = run(&Scenario::default(), &SessionConfig::default()).unwrap();
        assert!(report.sites.is_empty());
        assert!(report.converged());
    }

    #[test]
    fn test_replay_tie() {
        let scenario = parse(
            r#"{
                "text": "ab",
                "sites": [
                    {"user": 1, "steps": [{"action": "edit", "operation": {"type": "insert", "position": 1, "text": "X"}}]},
                    {"user": 2, "steps": [{"action": "edit", "operation": {"type": "insert", "position": 1, "text": "Y"}}]}
                ]
            }"#,
        );

        let report = run(&scenario, &SessionConfig::default()).unwrap();
        assert!(report.converged());
        assert_eq!(report.sites[0].text, "aXYb");
    }

    #[test]
    fn test_divergent_report() {
        let report = ReplayReport {
            sites: vec![
                SiteOutcome {
                    user: UserId(1),
                    text: "a".into(),
                    current: StateVector::new(),
                    pending: 0,
                },
                SiteOutcome {
                    user: UserId(2),
                    text: "b".into(),
                    current: StateVector::new(),
                    pending: 0,
                },
            ],
        };
        assert!(!report.converged());
    }
}
