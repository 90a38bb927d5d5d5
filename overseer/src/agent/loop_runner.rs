//! The agent loop: one `Execute(ctx, input) -> Outcome` call per turn.
//!
//! A turn resolves a [`Policy`], assembles a system prompt from the live
//! tool catalog, then alternates model calls and tool executions until the
//! model emits a final decision, the loop exhausts its step budget, or a
//! policy/approval gate stops it early.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use overseer_core::completion::{GenerateOptions, Message};
use overseer_core::model::Model;

use crate::domain::{
    ActionApproval, ApprovalStatus, ExecutionStatus, Policy, Task, TaskRouting, TaskSource,
    TaskStatus, ToolCallRecord, ToolCallStatus, TraceEntry,
};
use crate::error::{Error, ErrorKind, Result};
use crate::store::Store;
use crate::tools::ToolRegistry;
use crate::util;

const DEFAULT_CONFIDENCE: f64 = 1.0;
const MAX_TOOL_OUTPUT_CHARS: usize = 4_000;

/// Identifies who/where a turn executes for: quota bucketing, audit
/// attribution, and the workspace root tools resolve relative paths
/// against.
#[derive(Debug, Clone)]
pub struct ExecuteContext {
    pub workspace_id: String,
    pub context_id: String,
    pub connector: String,
    pub external_id: String,
    pub requester_user_id: String,
    pub workspace_root: PathBuf,
    /// Present when a human operator has already consented to running
    /// `requires_approval` tools for this turn; bypasses the approval gate
    /// instead of opening a new pending approval.
    pub approval_token: Option<String>,
}

/// One turn's input.
#[derive(Debug, Clone)]
pub struct ExecuteInput {
    pub text: String,
    pub system_prompt: Option<String>,
    pub skip_grounding: bool,
}

impl ExecuteInput {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            system_prompt: None,
            skip_grounding: false,
        }
    }
}

/// Outcome of one `Execute` call.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub reply: String,
    pub action_taken: bool,
    pub tool_name: Option<String>,
    pub tool_output: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub steps: u32,
    pub confidence: f64,
    pub error: Option<String>,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub trace: Vec<TraceEntry>,
}

impl ExecuteOutcome {
    fn blocked(reason: impl Into<String>, trace: Vec<TraceEntry>) -> Self {
        let reason = reason.into();
        Self {
            reply: reason.clone(),
            action_taken: false,
            tool_name: None,
            tool_output: None,
            tool_calls: Vec::new(),
            steps: 0,
            confidence: 0.0,
            error: None,
            blocked: true,
            block_reason: Some(reason),
            trace,
        }
    }
}

/// Bookkeeping for the per-key autonomous-task admission quota.
#[derive(Default)]
struct TaskQuota {
    admissions: Mutex<HashMap<String, Vec<i64>>>,
}

impl TaskQuota {
    fn key(connector: &str, workspace_id: &str, context_id: &str, external_id: &str) -> String {
        let lowered = connector.to_lowercase();
        if lowered.is_empty() && workspace_id.is_empty() && context_id.is_empty() && external_id.is_empty() {
            return "global".to_owned();
        }
        format!("{lowered}|{workspace_id}|{context_id}|{external_id}")
    }

    /// Atomically check whether one more admission fits within the hourly
    /// and daily ceilings, and if so record it.
    async fn try_admit(&self, key: &str, per_hour: u32, per_day: u32) -> bool {
        let now = util::timestamp_secs();
        let mut admissions = self.admissions.lock().await;
        let entry = admissions.entry(key.to_owned()).or_default();
        entry.retain(|&t| now - t < 24 * 3600);

        let within_hour = entry.iter().filter(|&&t| now - t < 3600).count() as u32;
        let within_day = entry.len() as u32;
        if within_hour >= per_hour || within_day >= per_day {
            return false;
        }
        entry.push(now);
        true
    }
}

/// Turn-local decision, after parsing the model's response.
enum Decision {
    Tool { name: String, args: Value },
    Final { text: String, confidence: f64 },
}

/// The agent loop: stateless across turns except for the task-admission
/// quota and the tool registry/store it shares with the rest of the
/// runtime.
pub struct AgentLoop<M: Model> {
    model: Arc<M>,
    tools: Arc<ToolRegistry>,
    store: Store,
    base_policy: Policy,
    quota: TaskQuota,
}

impl<M: Model> AgentLoop<M> {
    #[must_use]
    pub fn new(model: Arc<M>, tools: Arc<ToolRegistry>, store: Store, base_policy: Policy) -> Self {
        Self {
            model,
            tools,
            store,
            base_policy,
            quota: TaskQuota::default(),
        }
    }

    /// Run one turn to completion.
    pub async fn execute(
        &self,
        ctx: &ExecuteContext,
        policy_override: Option<&Policy>,
        input: ExecuteInput,
    ) -> Result<ExecuteOutcome> {
        let mut trace = Vec::new();
        push_trace(&mut trace, "start", &format!("turn starting for context {}", ctx.context_id));

        let policy = match policy_override {
            Some(over) => Policy::merge(&self.base_policy, over),
            None => self.base_policy.clone(),
        };
        push_trace(
            &mut trace,
            "policy.resolved",
            &format!(
                "max_loop_steps={} max_tool_calls_per_turn={}",
                policy.max_loop_steps, policy.max_tool_calls_per_turn
            ),
        );

        let deadline = if policy.max_turn_duration_secs > 0 {
            Some(Instant::now() + Duration::from_secs(policy.max_turn_duration_secs))
        } else {
            None
        };

        let input_size = util::count_runes(&input.text);
        if input_size > policy.max_input_chars {
            push_trace(&mut trace, "policy.size_gate", &format!("{input_size} runes exceeds {}", policy.max_input_chars));
            return Ok(ExecuteOutcome::blocked("input exceeds max size policy", trace));
        }

        let catalog = self.tools.describe_all().await?;
        let system_prompt = build_system_prompt(ctx, input.system_prompt.as_deref(), &catalog);
        push_trace(&mut trace, "prompt.ready", &format!("tool catalog has {} entries", self.tools.len().await));

        let tool_defs = self.tools.list_definitions().await?;
        let gen_options = GenerateOptions {
            tools: tool_defs,
            ..GenerateOptions::default()
        };

        let mut messages = vec![Message::system(system_prompt)];
        let grounding = if input.skip_grounding {
            String::new()
        } else {
            "Respond with exactly one JSON decision per step: either \
             {\"tool\": <name>, \"args\": {...}} to call a tool, or \
             {\"final\": <text>, \"confidence\": <0..1>} to finish the turn. \
             Plain text with no JSON is treated as a final reply.\n\n"
                .to_owned()
        };
        messages.push(Message::user(format!("{grounding}User request:\n{}", input.text)));

        let mut tool_call_records: Vec<ToolCallRecord> = Vec::new();
        let mut seen_signatures: HashSet<String> = HashSet::new();
        let mut tool_calls_this_turn: u32 = 0;
        let mut last_tool_output: Option<String> = None;
        let mut last_tool_name: Option<String> = None;

        for step in 1..=policy.max_loop_steps {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    push_trace(&mut trace, "loop.stop", "turn deadline exceeded");
                    return Ok(ExecuteOutcome::blocked("turn deadline exceeded", trace));
                }
            }

            messages.push(Message::user(format!("STEP {step} OF {}.", policy.max_loop_steps)));

            push_trace(&mut trace, "llm.call", &format!("step {step}"));
            let response = self.model.generate(&messages, &gen_options).await;
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    push_trace(&mut trace, "llm.error", &e.to_string());
                    return Ok(ExecuteOutcome {
                        reply: String::new(),
                        action_taken: !tool_call_records.is_empty(),
                        tool_name: last_tool_name,
                        tool_output: last_tool_output,
                        tool_calls: tool_call_records,
                        steps: step,
                        confidence: 0.0,
                        error: Some(e.to_string()),
                        blocked: false,
                        block_reason: None,
                        trace,
                    });
                }
            };

            let decision = if let Some(first) = response.tool_calls.first() {
                Decision::Tool { name: first.name.clone(), args: first.arguments.clone() }
            } else {
                parse_textual_decision(&response.content)
            };

            match decision {
                Decision::Final { text, confidence } => {
                    push_trace(&mut trace, "decision.final", &format!("confidence={confidence}"));
                    if confidence < policy.min_final_confidence {
                        push_trace(
                            &mut trace,
                            "policy.confidence_gate",
                            &format!("{confidence} below {}", policy.min_final_confidence),
                        );
                        return Ok(ExecuteOutcome::blocked(
                            format!("final confidence {confidence} below required {}", policy.min_final_confidence),
                            trace,
                        ));
                    }
                    let reply = if text.trim().is_empty() {
                        last_tool_output.clone().unwrap_or_default()
                    } else {
                        text
                    };
                    push_trace(&mut trace, "loop.stop", "final reply returned");
                    return Ok(ExecuteOutcome {
                        reply,
                        action_taken: !tool_call_records.is_empty(),
                        tool_name: last_tool_name,
                        tool_output: last_tool_output,
                        tool_calls: tool_call_records,
                        steps: step,
                        confidence,
                        error: None,
                        blocked: false,
                        block_reason: None,
                        trace,
                    });
                }
                Decision::Tool { name, args } => {
                    push_trace(&mut trace, "decision.tool", &name);

                    if tool_calls_this_turn >= policy.max_tool_calls_per_turn {
                        push_trace(&mut trace, "policy.max_tool_calls", &name);
                        return Ok(ExecuteOutcome::blocked("max tool calls per turn reached", trace));
                    }

                    if let Some(allowed) = &policy.allowed_tools {
                        if !allowed.iter().any(|t| t == &name) {
                            push_trace(&mut trace, "policy.allowed_tools", &name);
                            return Ok(ExecuteOutcome::blocked(format!("tool '{name}' is not allowed"), trace));
                        }
                    }

                    let is_builtin = name == "create_task" || name == "run_action";
                    if !is_builtin && !self.tools.contains(&name).await {
                        push_trace(&mut trace, "tool.error", &format!("unknown tool '{name}'"));
                        tool_call_records.push(ToolCallRecord {
                            tool_name: name.clone(),
                            tool_args: args,
                            status: ToolCallStatus::Failed,
                            tool_output: None,
                            error: Some(format!("unknown tool '{name}'")),
                        });
                        messages.push(Message::assistant(format!("tool {name} failed: unknown tool")));
                        continue;
                    }

                    if let Some(classes) = &policy.allowed_tool_classes {
                        if !is_builtin {
                            let meta = self.tools.meta(&name).await;
                            let class = meta.map(|m| m.class).unwrap_or_else(|| "general".to_owned());
                            if !classes.iter().any(|c| c == &class) {
                                push_trace(&mut trace, "policy.allowed_tool_classes", &format!("{name} ({class})"));
                                return Ok(ExecuteOutcome::blocked(
                                    format!("tool '{name}' belongs to a disallowed class"),
                                    trace,
                                ));
                            }
                        }
                    }

                    let requires_approval = if name == "run_action" {
                        true
                    } else if let Some(meta) = self.tools.meta(&name).await {
                        meta.requires_approval
                    } else {
                        false
                    };

                    if requires_approval && ctx.approval_token.is_none() {
                        let approval_id = self.create_pending_approval(ctx, &name, &args).await?;
                        push_trace(&mut trace, "tool.blocked", &format!("awaiting approval {approval_id}"));
                        tool_call_records.push(ToolCallRecord {
                            tool_name: name.clone(),
                            tool_args: args,
                            status: ToolCallStatus::Blocked,
                            tool_output: None,
                            error: Some(format!("awaiting approval {approval_id}")),
                        });
                        push_trace(&mut trace, "loop.stop", "approval required, turn terminated");
                        return Ok(ExecuteOutcome {
                            reply: format!("This action needs approval before it can run (request {approval_id})."),
                            action_taken: true,
                            tool_name: Some(name),
                            tool_output: None,
                            tool_calls: tool_call_records,
                            steps: step,
                            confidence: 0.0,
                            error: None,
                            blocked: true,
                            block_reason: Some(format!("approval required: {approval_id}")),
                            trace,
                        });
                    }
                    if requires_approval {
                        push_trace(&mut trace, "tool.approval_bypass", &name);
                    }

                    if name == "create_task" {
                        let key = TaskQuota::key(&ctx.connector, &ctx.workspace_id, &ctx.context_id, &ctx.external_id);
                        let admitted = self
                            .quota
                            .try_admit(&key, policy.max_autonomous_tasks_per_hour, policy.max_autonomous_tasks_per_day)
                            .await;
                        if !admitted {
                            push_trace(&mut trace, "policy.task_quota", &key);
                            tool_call_records.push(ToolCallRecord {
                                tool_name: name.clone(),
                                tool_args: args,
                                status: ToolCallStatus::Blocked,
                                tool_output: None,
                                error: Some("autonomous task quota exceeded".to_owned()),
                            });
                            messages.push(Message::assistant("create_task suppressed: quota exceeded".to_owned()));
                            continue;
                        }
                    }

                    let signature = format!("{}:{}", name.to_lowercase(), canonicalize_args(&args));
                    if seen_signatures.contains(&signature) {
                        push_trace(&mut trace, "tool.blocked", &format!("repeated failed tool call: {name}"));
                        tool_call_records.push(ToolCallRecord {
                            tool_name: name.clone(),
                            tool_args: args,
                            status: ToolCallStatus::Blocked,
                            tool_output: None,
                            error: Some("repeated failed tool call with unchanged args".to_owned()),
                        });
                        messages.push(Message::assistant(format!(
                            "tool {name} suppressed: already attempted with these arguments"
                        )));
                        continue;
                    }

                    seen_signatures.insert(signature.clone());
                    tool_calls_this_turn += 1;

                    let execution = if name == "create_task" {
                        self.handle_create_task(ctx, &args).await
                    } else {
                        self.tools.execute(&name, args.clone()).await.map(|v| v.to_string())
                    };

                    match execution {
                        Ok(output) => {
                            seen_signatures.remove(&signature);
                            let truncated = util::truncate_str(&output, MAX_TOOL_OUTPUT_CHARS);
                            push_trace(&mut trace, "tool.ok", &name);
                            tool_call_records.push(ToolCallRecord {
                                tool_name: name.clone(),
                                tool_args: args,
                                status: ToolCallStatus::Succeeded,
                                tool_output: Some(truncated.clone()),
                                error: None,
                            });
                            messages.push(Message::assistant(format!("called {name}")));
                            messages.push(Message::tool_result(format!("call_{step}"), truncated.clone()));
                            last_tool_output = Some(truncated);
                            last_tool_name = Some(name);
                        }
                        Err(e) => {
                            if e.kind() == ErrorKind::ApprovalRequired {
                                push_trace(&mut trace, "loop.stop", &e.to_string());
                                tool_call_records.push(ToolCallRecord {
                                    tool_name: name.clone(),
                                    tool_args: args,
                                    status: ToolCallStatus::Blocked,
                                    tool_output: None,
                                    error: Some(e.to_string()),
                                });
                                return Ok(ExecuteOutcome {
                                    reply: e.to_string(),
                                    action_taken: true,
                                    tool_name: Some(name),
                                    tool_output: None,
                                    tool_calls: tool_call_records,
                                    steps: step,
                                    confidence: 0.0,
                                    error: None,
                                    blocked: true,
                                    block_reason: Some(e.to_string()),
                                    trace,
                                });
                            }
                            push_trace(&mut trace, "tool.error", &e.to_string());
                            tool_call_records.push(ToolCallRecord {
                                tool_name: name.clone(),
                                tool_args: args,
                                status: ToolCallStatus::Failed,
                                tool_output: None,
                                error: Some(e.to_string()),
                            });
                            messages.push(Message::assistant(format!("tool {name} failed: {e}")));
                        }
                    }
                }
            }
        }

        push_trace(&mut trace, "loop.stop", "max loop steps reached");
        Ok(ExecuteOutcome::blocked("max loop steps reached", trace))
    }

    async fn handle_create_task(&self, ctx: &ExecuteContext, args: &Value) -> Result<String> {
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::internal("create_task requires 'title'"))?
            .to_owned();
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or(&title)
            .to_owned();
        let kind = args.get("kind").and_then(Value::as_str).unwrap_or("adhoc").to_owned();
        let run_key = args.get("run_key").and_then(Value::as_str).map(str::to_owned);

        let now = util::timestamp_secs();
        let task = Task {
            id: util::generate_id("task"),
            workspace_id: ctx.workspace_id.clone(),
            context_id: ctx.context_id.clone(),
            kind,
            title: title.clone(),
            prompt,
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key,
            routing: TaskRouting::default(),
            source: TaskSource {
                connector: Some(ctx.connector.clone()),
                external_id: Some(ctx.external_id.clone()),
                user_id: Some(ctx.requester_user_id.clone()),
                text: None,
                objective_id: None,
            },
            created_at: now,
            updated_at: now,
        };
        let id = task.id.clone();
        self.store.create_task(&task).await?;
        Ok(format!("task {id} queued: {title}"))
    }

    async fn create_pending_approval(&self, ctx: &ExecuteContext, name: &str, args: &Value) -> Result<String> {
        let payload: Map<String, Value> = if name == "run_action" {
            args.as_object().cloned().unwrap_or_default()
        } else {
            let mut m = Map::new();
            m.insert("args".to_owned(), args.clone());
            m
        };
        let action_type = payload
            .get("action_type")
            .or_else(|| payload.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_owned();
        let action_target = payload
            .get("action_target")
            .or_else(|| payload.get("target"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let action_summary = payload
            .get("action_summary")
            .or_else(|| payload.get("summary"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let approval = ActionApproval {
            id: util::generate_id("appr"),
            workspace_id: ctx.workspace_id.clone(),
            context_id: ctx.context_id.clone(),
            connector: ctx.connector.clone(),
            external_id: ctx.external_id.clone(),
            requester_user_id: ctx.requester_user_id.clone(),
            action_type,
            action_target,
            action_summary,
            payload,
            status: ApprovalStatus::Pending,
            approver_user_id: None,
            denied_reason: None,
            execution_status: ExecutionStatus::NotExecuted,
            execution_message: None,
            executor_plugin: None,
            executed_at: None,
        };
        let id = approval.id.clone();
        self.store.create_approval(&approval).await?;
        Ok(id)
    }
}

fn push_trace(trace: &mut Vec<TraceEntry>, stage: &str, message: &str) {
    trace.push(TraceEntry {
        utc_time: util::timestamp_secs(),
        stage: stage.to_owned(),
        message: message.to_owned(),
    });
}

fn build_system_prompt(ctx: &ExecuteContext, extra: Option<&str>, catalog: &str) -> String {
    let now = util::timestamp_secs();
    let mut prompt = format!(
        "Current UTC time (unix seconds): {now}\n\n\
         You are the automation overseer for workspace `{}`, operating on behalf \
         of a human through the `{}` connector. You work by calling tools or by \
         producing a final reply once the request is satisfied. Prefer the \
         smallest number of tool calls that accomplishes the goal, and never \
         invent data a tool could confirm.\n\n\
         Available tools:\n{catalog}",
        ctx.workspace_id, ctx.connector
    );
    if let Some(extra) = extra {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Deterministic string form of `args` used to dedupe retried tool calls:
/// sorted-key JSON so field order never changes the signature.
fn canonicalize_args(args: &Value) -> String {
    fn canon(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut sorted: Vec<_> = map.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), canon(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canon).collect()),
            other => other.clone(),
        }
    }
    canon(args).to_string()
}

/// Strip a single Markdown code-fence wrapper (```json ... ``` or ``` ... ```)
/// around `text`, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}

/// Scan `text` for the first balanced top-level `{...}` object and parse it,
/// tolerating surrounding prose the model prepends or appends to its JSON
/// decision. Skips brace characters that appear inside string literals.
fn find_balanced_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = None;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            if let Ok(value) = serde_json::from_str::<Value>(&text[s..=i]) {
                                return Some(value);
                            }
                        }
                        start = None;
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_textual_decision(content: &str) -> Decision {
    let candidate = strip_code_fence(content);
    let parsed = serde_json::from_str::<Value>(candidate).ok().or_else(|| find_balanced_json_object(candidate));
    let Some(value) = parsed else {
        return Decision::Final { text: content.trim().to_owned(), confidence: DEFAULT_CONFIDENCE };
    };
    let Value::Object(map) = &value else {
        return Decision::Final { text: value.to_string(), confidence: DEFAULT_CONFIDENCE };
    };

    if let Some(tool) = map.get("tool").and_then(Value::as_str) {
        let args = map.get("args").or_else(|| map.get("arguments")).cloned().unwrap_or_else(|| json!({}));
        return Decision::Tool { name: tool.to_owned(), args };
    }

    if let Some(action_type) = map.get("type").and_then(Value::as_str) {
        if map.contains_key("target") || map.contains_key("summary") {
            let mut args = Map::new();
            args.insert("action_type".to_owned(), json!(action_type));
            if let Some(target) = map.get("target") {
                args.insert("action_target".to_owned(), target.clone());
            }
            if let Some(summary) = map.get("summary") {
                args.insert("action_summary".to_owned(), summary.clone());
            }
            if let Some(payload) = map.get("payload") {
                args.insert("payload".to_owned(), payload.clone());
            }
            return Decision::Tool { name: "run_action".to_owned(), args: Value::Object(args) };
        }
    }

    if let Some(final_value) = map.get("final") {
        let text = final_value.as_str().map(str::to_owned).unwrap_or_else(|| final_value.to_string());
        let confidence = map
            .get("confidence")
            .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(DEFAULT_CONFIDENCE);
        return Decision::Final { text, confidence };
    }

    Decision::Final { text: value.to_string(), confidence: DEFAULT_CONFIDENCE }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_wrapper() {
        let text = "```json\n{\"tool\": \"x\"}\n```";
        assert_eq!(strip_code_fence(text), "{\"tool\": \"x\"}");
    }

    #[test]
    fn strip_code_fence_passes_plain_text_through() {
        assert_eq!(strip_code_fence("hello"), "hello");
    }

    #[test]
    fn parse_tool_decision() {
        let decision = parse_textual_decision("{\"tool\": \"search\", \"args\": {\"q\": \"x\"}}");
        match decision {
            Decision::Tool { name, args } => {
                assert_eq!(name, "search");
                assert_eq!(args, json!({"q": "x"}));
            }
            Decision::Final { .. } => panic!("expected tool decision"),
        }
    }

    #[test]
    fn parse_legacy_action_envelope() {
        let decision = parse_textual_decision(
            "{\"type\": \"webhook\", \"target\": \"https://x\", \"summary\": \"ping\"}",
        );
        match decision {
            Decision::Tool { name, args } => {
                assert_eq!(name, "run_action");
                assert_eq!(args["action_type"], json!("webhook"));
                assert_eq!(args["action_target"], json!("https://x"));
            }
            Decision::Final { .. } => panic!("expected run_action decision"),
        }
    }

    #[test]
    fn parse_final_decision_with_confidence() {
        let decision = parse_textual_decision("{\"final\": \"done\", \"confidence\": 0.9}");
        match decision {
            Decision::Final { text, confidence } => {
                assert_eq!(text, "done");
                assert!((confidence - 0.9).abs() < f64::EPSILON);
            }
            Decision::Tool { .. } => panic!("expected final decision"),
        }
    }

    #[test]
    fn parse_tool_decision_surrounded_by_prose() {
        let decision = parse_textual_decision(
            "Sure, here's my decision:\n{\"tool\": \"search\", \"args\": {\"q\": \"x\"}}\nlet me know if that helps.",
        );
        match decision {
            Decision::Tool { name, args } => {
                assert_eq!(name, "search");
                assert_eq!(args, json!({"q": "x"}));
            }
            Decision::Final { .. } => panic!("expected tool decision"),
        }
    }

    #[test]
    fn parse_plain_text_is_final_with_default_confidence() {
        let decision = parse_textual_decision("just a plain reply");
        match decision {
            Decision::Final { text, confidence } => {
                assert_eq!(text, "just a plain reply");
                assert_eq!(confidence, DEFAULT_CONFIDENCE);
            }
            Decision::Tool { .. } => panic!("expected final decision"),
        }
    }

    #[test]
    fn canonicalize_args_is_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize_args(&a), canonicalize_args(&b));
    }

    #[tokio::test]
    async fn task_quota_enforces_hourly_ceiling() {
        let quota = TaskQuota::default();
        let key = TaskQuota::key("cli", "ws", "ctx", "local");
        assert!(quota.try_admit(&key, 2, 10).await);
        assert!(quota.try_admit(&key, 2, 10).await);
        assert!(!quota.try_admit(&key, 2, 10).await);
    }
}
