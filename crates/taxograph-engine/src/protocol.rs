//! Decision protocol: constrained menu choices through tool calling
//!
//! The oracle is offered one tool whose `enum` parameter lists the menu
//! labels, plus a free-text `reasoning` field.
//!
//! ```text
//!  SingleShot                       ExecuteAndConfirm
//!  ──────────                       ─────────────────
//!  request ─► call                  request ─► call ──┐
//!              │                                       ▼
//!         on menu? ── no ─► fail          validate against menu
//!              │                          │ no: error payload +
//!           execute                       │     "you must choose from"
//!                                         │     (up to max_attempts)
//!                                         ▼ yes
//!                                      execute ─► result fed back
//!                                         │
//!                                      confirmation (free text)
//! ```
//!
//! Each [`DecisionProtocol::decide`] call owns its conversation log; nothing
//! is shared between steps.

use crate::config::DecisionStrategy;
use crate::error::DecisionError;
use crate::{CandidateEntry, CandidateSet, DecisionResult, MaterialRecord};
use async_trait::async_trait;
use serde_json::{json, Value};
use taxograph_oracle::{
    CompletionRequest, CompletionResponse, DecisionOracle, Message, ToolCall, ToolChoice, ToolSpec,
};

/// Sampling temperature of every decision request.
pub const DECISION_TEMPERATURE: f32 = 0.0;

// ============================================================================
// Executors
// ============================================================================

/// The side effect bound to an accepted choice.
#[async_trait]
pub trait StepExecutor: Send {
    /// Carry out `label`. The returned JSON is fed back to the oracle; an
    /// error message is reported to it as a failed call.
    async fn execute(&mut self, label: &str, entry: &CandidateEntry) -> Result<Value, String>;
}

/// Executor for plain navigation steps: acknowledges the selection.
pub struct SelectionEcho;

#[async_trait]
impl StepExecutor for SelectionEcho {
    async fn execute(&mut self, label: &str, entry: &CandidateEntry) -> Result<Value, String> {
        Ok(json!({
            "success": true,
            "selected": label,
            "element_id": entry.element_id,
        }))
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// Prompt and tool shape of one decision step.
#[derive(Debug, Clone)]
pub struct Instructions {
    pub system: String,
    pub tool_name: String,
    pub tool_description: String,
    /// Name of the enumerated argument.
    pub choice_field: String,
}

const PREAMBLE: &str = "The material knowledge graph is a tree managing the hierarchy of \
    materials; you are the node mounter of this graph.";

impl Instructions {
    /// Choose the sub-category of `parent` a record belongs to.
    pub fn branch(parent: &str, menu: &CandidateSet) -> Self {
        let mut system = format!(
            "{PREAMBLE}\n\nThe material is known to belong to \"{parent}\". Based on its \
             composition, properties and uses, choose the single most suitable sub-category \
             of {parent}:\n\n"
        );
        for (label, entry) in menu.iter() {
            system.push_str(&format!("- {label}"));
            if !entry.examples.is_empty() {
                system.push_str(&format!("\n  examples: {}", entry.examples.join(", ")));
            }
            system.push_str("\n\n");
        }
        Self {
            system,
            tool_name: "classify_to_subtype".to_string(),
            tool_description: format!("Classify the material into a sub-category of {parent}"),
            choice_field: "subtype".to_string(),
        }
    }

    /// Choose the concrete instance under `parent` a record is mounted on.
    pub fn instance(parent: &str, menu: &CandidateSet) -> Self {
        let mut system = format!(
            "{PREAMBLE}\n\nThe material belongs to \"{parent}\". Choose the concrete \
             instance it is closest to; the record will be mounted under it:\n\n"
        );
        for (label, entry) in menu.iter() {
            system.push_str(&format!("- {label}"));
            if let Some(description) = &entry.description {
                system.push_str(&format!(": {description}"));
            }
            if let Some(score) = entry.score {
                system.push_str(&format!(" (composition similarity {score:.3})"));
            }
            system.push('\n');
        }
        Self {
            system,
            tool_name: "select_instance".to_string(),
            tool_description: format!("Select the instance of {parent} to mount the material on"),
            choice_field: "instance".to_string(),
        }
    }

    fn tool(&self, menu: &CandidateSet) -> ToolSpec {
        ToolSpec {
            name: self.tool_name.clone(),
            description: self.tool_description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    self.choice_field.as_str(): {
                        "type": "string",
                        "enum": menu.labels(),
                        "description": "One of the listed options, verbatim",
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "Why this option fits the material (composition, properties)",
                    }
                },
                "required": [self.choice_field.as_str(), "reasoning"]
            }),
        }
    }
}

// ============================================================================
// Protocol
// ============================================================================

pub struct DecisionProtocol<'a> {
    oracle: &'a dyn DecisionOracle,
    strategy: DecisionStrategy,
    max_attempts: usize,
}

/// A proposal extracted from one oracle response.
struct Proposal {
    call: ToolCall,
    choice: String,
    reasoning: Option<String>,
    /// The call targets the offered tool.
    on_tool: bool,
}

impl Proposal {
    /// Menu entry of the choice; calls to any other tool never match.
    fn entry<'m>(&self, menu: &'m CandidateSet) -> Option<&'m CandidateEntry> {
        if self.on_tool {
            menu.get(&self.choice)
        } else {
            None
        }
    }

    fn rejection(&self, tool: &ToolSpec) -> String {
        if self.on_tool {
            format!("'{}' is not a valid option", self.choice)
        } else {
            format!("'{}' is not an offered tool, call '{}'", self.call.name, tool.name)
        }
    }
}

impl<'a> DecisionProtocol<'a> {
    pub fn new(oracle: &'a dyn DecisionOracle, strategy: DecisionStrategy, max_attempts: usize) -> Self {
        Self {
            oracle,
            strategy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Ask the oracle to pick one entry of `menu` and run `executor` on it.
    ///
    /// The returned label is always a member of `menu`.
    pub async fn decide(
        &self,
        menu: &CandidateSet,
        record: &MaterialRecord,
        instructions: &Instructions,
        executor: &mut dyn StepExecutor,
    ) -> Result<DecisionResult, DecisionError> {
        if menu.is_empty() {
            return Err(DecisionError::EmptyMenu);
        }
        let tool = instructions.tool(menu);
        let mut conversation = vec![
            Message::system(instructions.system.clone()),
            Message::user(format!(
                "Material record:\n{}",
                serde_json::to_string_pretty(&record.payload).unwrap_or_default()
            )),
        ];

        match self.strategy {
            DecisionStrategy::SingleShot => {
                self.single_shot(menu, instructions, &tool, &conversation, executor)
                    .await
            }
            DecisionStrategy::ExecuteAndConfirm => {
                self.execute_and_confirm(menu, instructions, &tool, &mut conversation, executor)
                    .await
            }
        }
    }

    async fn single_shot(
        &self,
        menu: &CandidateSet,
        instructions: &Instructions,
        tool: &ToolSpec,
        conversation: &[Message],
        executor: &mut dyn StepExecutor,
    ) -> Result<DecisionResult, DecisionError> {
        let response = self.propose(conversation, tool).await?;
        let proposal = extract(&response, instructions)?;

        let Some(entry) = proposal.entry(menu) else {
            tracing::warn!(
                tool = %proposal.call.name,
                choice = %proposal.choice,
                "oracle answered outside the menu"
            );
            return Err(DecisionError::InvalidChoice {
                attempts: 1,
                last: proposal.choice,
            });
        };

        executor
            .execute(&proposal.choice, entry)
            .await
            .map_err(DecisionError::ExecutedFunctionFailed)?;

        Ok(DecisionResult {
            chosen_label: proposal.choice,
            entry: entry.clone(),
            reasoning: proposal.reasoning,
            confirmation: None,
            attempts: 1,
        })
    }

    async fn execute_and_confirm(
        &self,
        menu: &CandidateSet,
        instructions: &Instructions,
        tool: &ToolSpec,
        conversation: &mut Vec<Message>,
        executor: &mut dyn StepExecutor,
    ) -> Result<DecisionResult, DecisionError> {
        let mut last = String::new();

        for attempt in 1..=self.max_attempts {
            let response = self.propose(conversation, tool).await?;
            let proposal = extract(&response, instructions)?;
            // Only the first call is answered; the log must pair every call
            // it contains with a tool result.
            conversation.push(Message::assistant_calls(
                response.content.clone(),
                vec![proposal.call.clone()],
            ));

            let Some(entry) = proposal.entry(menu) else {
                tracing::warn!(
                    attempt,
                    tool = %proposal.call.name,
                    choice = %proposal.choice,
                    "oracle answered outside the menu, asking again"
                );
                let options = menu.labels();
                conversation.push(Message::tool_result(
                    &proposal.call.id,
                    json!({
                        "success": false,
                        "error": proposal.rejection(tool),
                        "valid_options": options,
                    })
                    .to_string(),
                ));
                conversation.push(Message::user(format!(
                    "You must choose from: {}",
                    options.join(", ")
                )));
                last = proposal.choice;
                continue;
            };

            let executed = match executor.execute(&proposal.choice, entry).await {
                Ok(executed) => executed,
                Err(message) => {
                    conversation.push(Message::tool_result(
                        &proposal.call.id,
                        json!({"success": false, "error": message}).to_string(),
                    ));
                    return Err(DecisionError::ExecutedFunctionFailed(message));
                }
            };
            conversation.push(Message::tool_result(&proposal.call.id, executed.to_string()));

            let confirmation = self.confirm(conversation, tool).await;
            tracing::debug!(choice = %proposal.choice, attempt, "decision accepted");

            return Ok(DecisionResult {
                chosen_label: proposal.choice,
                entry: entry.clone(),
                reasoning: proposal.reasoning,
                confirmation,
                        attempts: attempt,
            });
        }

        Err(DecisionError::InvalidChoice {
            attempts: self.max_attempts,
            last,
        })
    }

    async fn propose(
        &self,
        conversation: &[Message],
        tool: &ToolSpec,
    ) -> Result<CompletionResponse, DecisionError> {
        let request = CompletionRequest {
            messages: conversation.to_vec(),
            tools: vec![tool.clone()],
            tool_choice: ToolChoice::Function(tool.name.clone()),
            temperature: Some(DECISION_TEMPERATURE),
            max_tokens: None,
        };
        Ok(self.oracle.complete(&request).await?)
    }

    /// Final free-text summary. The side effect already happened, so a
    /// failure here is logged and the decision stands.
    async fn confirm(&self, conversation: &[Message], tool: &ToolSpec) -> Option<String> {
        let request = CompletionRequest {
            messages: conversation.to_vec(),
            tools: vec![tool.clone()],
            tool_choice: ToolChoice::None,
            temperature: Some(DECISION_TEMPERATURE),
            max_tokens: None,
        };
        match self.oracle.complete(&request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(error = %e, "confirmation request failed");
                None
            }
        }
    }
}

fn extract(response: &CompletionResponse, instructions: &Instructions) -> Result<Proposal, DecisionError> {
    let call = response
        .tool_calls
        .first()
        .cloned()
        .ok_or_else(|| {
            DecisionError::NoChoice(
                response
                    .content
                    .clone()
                    .unwrap_or_else(|| "response carried no tool call".to_string()),
            )
        })?;

    let on_tool = call.name == instructions.tool_name;
    let choice = call
        .arguments
        .get(&instructions.choice_field)
        .and_then(Value::as_str)
        .map(str::to_string);
    let choice = match (choice, on_tool) {
        (Some(choice), _) => choice,
        // A stray tool call is rejected like an off-menu answer.
        (None, false) => String::new(),
        (None, true) => {
            return Err(DecisionError::NoChoice(format!(
                "call to '{}' without a '{}' argument: {}",
                call.name, instructions.choice_field, call.arguments
            )))
        }
    };
    let reasoning = call
        .arguments
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Proposal {
        call,
        choice,
        reasoning,
        on_tool,
    })
}
