// evaluate.rs — Run proposed actions through the governor.
//
// Input is JSON lines, one request per line:
//
//   {"session_id": "s1", "action_type": "place_order", "tool": "broker",
//    "params": {"amount": 1000, "ticker": "ACME"},
//    "context": {"risk_exposure": 10000}}

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};

use anyhow::Context;
use serde::Deserialize;
use tg_action::{ActionType, ParamValue, ProposedAction, SafetyContext};
use tg_governor::{Evaluation, Governor, GovernorConfig};

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub session_id: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub context: SafetyContext,
}

impl ActionRequest {
    pub fn into_parts(self) -> (ProposedAction, SafetyContext) {
        let mut action = ProposedAction::new(self.session_id, self.action_type);
        if let Some(tool) = self.tool {
            action = action.with_tool(tool);
        }
        if let Some(agent_id) = self.agent_id {
            action = action.with_agent(agent_id);
        }
        for (key, value) in self.params {
            action = action.with_param(key, value);
        }
        (action, self.context)
    }
}

/// Parse requests from JSON lines, skipping blanks.
pub fn parse_requests(reader: impl BufRead) -> anyhow::Result<Vec<ActionRequest>> {
    let mut requests = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: ActionRequest = serde_json::from_str(&line)
            .with_context(|| format!("invalid action request on line {}", idx + 1))?;
        requests.push(request);
    }
    Ok(requests)
}

pub async fn execute(config: &GovernorConfig, input: &str, json: bool) -> anyhow::Result<()> {
    let requests = if input == "-" {
        parse_requests(std::io::stdin().lock())?
    } else {
        let file = std::fs::File::open(input).with_context(|| format!("cannot open {}", input))?;
        parse_requests(BufReader::new(file))?
    };

    let governor = Governor::builder(config.clone()).build()?;

    if !json {
        println!(
            "{:<38} {:<10} {:<11} {:<14} REASON",
            "ACTION", "SESSION", "DECISION", "STAGE"
        );
        println!("{}", "-".repeat(100));
    }

    for request in requests {
        let (action, context) = request.into_parts();
        let evaluation = governor.evaluate(&action, &context).await?;
        if json {
            println!("{}", serde_json::to_string(&evaluation)?);
        } else {
            print_row(&action, &evaluation);
        }
    }
    Ok(())
}

fn print_row(action: &ProposedAction, evaluation: &Evaluation) {
    let decision = &evaluation.decision;
    println!(
        "{:<38} {:<10} {:<11} {:<14} {}",
        action.action_id,
        action.session_id,
        decision.disposition.to_string(),
        decision.stage.to_string(),
        decision.reason
    );
    for transition in &evaluation.transitions {
        println!(
            "{:<38} {:<10} session {} -> {}",
            "", transition.session_id, transition.from, transition.to
        );
    }
}
