//! Team Orchestrator — sequential / parallel / DAG / evaluator-optimizer
//! execution strategies over a set of Tool-Loop-backed team members.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::batch::ToolCallParallelConfig;
use crate::loop_::{LoopConfig, RetryPolicy, TokenBudget, ToolLoop};
use crate::provider::{Message, Provider};
use crate::tool::ToolRegistry;

const MAX_CONTEXT_CHARS: usize = 8000;
const CONTEXT_TRUNCATION_MARKER: &str = "\n…[truncated]";
const EVALUATOR_MAX_ATTEMPTS: u32 = 5;
const TEAM_DEADLINE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamStrategy {
    Sequential,
    Parallel,
    Dag,
    EvaluatorOptimizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produces {
    Code,
    Data,
    Document,
}

#[derive(Debug, Clone)]
pub struct TeamMember {
    pub id: String,
    pub role: String,
    pub task: String,
    pub model: Option<String>,
    pub depends_on: Vec<String>,
    pub produces: Option<Produces>,
}

#[derive(Debug, Clone)]
pub struct TeamRunConfig {
    pub strategy: TeamStrategy,
    pub members: Vec<TeamMember>,
    pub max_team_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MemberOutcome {
    pub member_id: String,
    pub content: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TeamResult {
    pub outcomes: Vec<MemberOutcome>,
    pub reviewer_notes: Option<String>,
}

/// Coordinates a set of [`TeamMember`]s, each running its own [`ToolLoop`],
/// under one of four execution strategies.
pub struct TeamOrchestrator {
    provider: Arc<dyn Provider>,
    default_model: String,
    registry: Arc<ToolRegistry>,
    allowed_models: HashSet<String>,
    max_concurrency: usize,
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}{CONTEXT_TRUNCATION_MARKER}")
}

fn canned_review_task(produces: Produces) -> &'static str {
    match produces {
        Produces::Code => {
            "Review the team's code output above for correctness, style, and security issues. Report any problems found."
        }
        Produces::Data => {
            "Review the team's data output above for correctness, completeness, and schema consistency. Report any problems found."
        }
        Produces::Document => {
            "Review the team's document output above for clarity, accuracy, and completeness. Report any problems found."
        }
    }
}

fn build_loop_config(
    provider: Arc<dyn Provider>,
    model: String,
    sender_id: String,
    budget: Option<Arc<TokenBudget>>,
    registry: Arc<ToolRegistry>,
) -> LoopConfig {
    LoopConfig {
        provider,
        model,
        registry,
        max_iterations: 20,
        temperature: None,
        max_tokens: None,
        sender_id,
        parallel_cfg: ToolCallParallelConfig::default(),
        retry_policy: RetryPolicy::default(),
        retry_notice: None,
        remaining_token_budget: budget,
        cancel_flag: None,
    }
}

async fn run_member(
    provider: Arc<dyn Provider>,
    member: &TeamMember,
    model: &str,
    task: String,
    registry: Arc<ToolRegistry>,
    budget: Option<Arc<TokenBudget>>,
) -> MemberOutcome {
    let sender_id = format!("team:{}", member.id);
    let tool_loop = ToolLoop::new(build_loop_config(
        provider,
        model.to_string(),
        sender_id.clone(),
        budget,
        registry,
    ));
    let messages = vec![
        Message::system(format!("You are acting as: {}.", member.role)),
        Message::user(task),
    ];
    match tool_loop.run(&sender_id, messages).await {
        Ok(outcome) => MemberOutcome {
            member_id: member.id.clone(),
            content: outcome.content,
            error: None,
        },
        Err(e) => MemberOutcome {
            member_id: member.id.clone(),
            content: String::new(),
            error: Some(e),
        },
    }
}

impl TeamOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        default_model: String,
        registry: Arc<ToolRegistry>,
        allowed_models: HashSet<String>,
    ) -> Self {
        Self {
            provider,
            default_model,
            registry,
            allowed_models,
            max_concurrency: 4,
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// Confirm a member's model override is in the allowed candidate set. An
    /// empty allowed set means unrestricted (no candidate list configured).
    fn resolve_model(&self, member: &TeamMember) -> Result<String, String> {
        match &member.model {
            Some(model) => {
                if self.allowed_models.is_empty() || self.allowed_models.contains(model) {
                    Ok(model.clone())
                } else {
                    Err(format!(
                        "model \"{model}\" for member \"{}\" is not in the allowed candidate set",
                        member.id
                    ))
                }
            }
            None => Ok(self.default_model.clone()),
        }
    }

    async fn registry_for(&self, strategy: TeamStrategy) -> Arc<ToolRegistry> {
        match strategy {
            TeamStrategy::Parallel | TeamStrategy::Dag => {
                Arc::new(self.registry.upgrade_for_concurrency().await)
            }
            _ => self.registry.clone(),
        }
    }

    #[tracing::instrument(name = "team.run", skip(self, config), fields(strategy = ?config.strategy, members = config.members.len()))]
    pub async fn run(&self, config: TeamRunConfig) -> Result<TeamResult, String> {
        let registry = self.registry_for(config.strategy).await;
        let budget = config
            .max_team_tokens
            .filter(|t| *t > 0)
            .map(|t| Arc::new(TokenBudget::new(t)));
        let strategy = config.strategy;
        let members = config.members;

        let run_fut = async {
            match strategy {
                TeamStrategy::Sequential => self.run_sequential(&members, registry.clone(), budget.clone()).await,
                TeamStrategy::Parallel => self.run_parallel(&members, registry.clone(), budget.clone()).await,
                TeamStrategy::Dag => self.run_dag(&members, registry.clone(), budget.clone()).await,
                TeamStrategy::EvaluatorOptimizer => {
                    self.run_evaluator_optimizer(&members, registry.clone(), budget.clone()).await
                }
            }
        };

        let mut outcomes = tokio::time::timeout(TEAM_DEADLINE, run_fut)
            .await
            .map_err(|_| "team execution exceeded its 15-minute deadline".to_string())??;

        let reviewer_notes = self.run_auto_reviewer(strategy, &members, &outcomes, registry, budget).await;
        if let Some(notes) = &reviewer_notes {
            for outcome in outcomes.iter_mut() {
                outcome.content.push_str("\n\n--- Reviewer Notes ---\n");
                outcome.content.push_str(notes);
            }
        }

        Ok(TeamResult { outcomes, reviewer_notes })
    }

    async fn run_sequential(
        &self,
        members: &[TeamMember],
        registry: Arc<ToolRegistry>,
        budget: Option<Arc<TokenBudget>>,
    ) -> Result<Vec<MemberOutcome>, String> {
        let mut outcomes = Vec::with_capacity(members.len());
        let mut previous: Option<String> = None;
        for member in members {
            let model = self.resolve_model(member)?;
            let mut task = member.task.clone();
            if let Some(prev) = &previous {
                task.push_str("\n\n--- Previous Output ---\n");
                task.push_str(&truncate_chars(prev, MAX_CONTEXT_CHARS));
            }
            let outcome = run_member(self.provider.clone(), member, &model, task, registry.clone(), budget.clone()).await;
            if let Some(err) = &outcome.error {
                return Err(format!("team member \"{}\" failed: {err}", member.id));
            }
            previous = Some(outcome.content.clone());
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_parallel(
        &self,
        members: &[TeamMember],
        registry: Arc<ToolRegistry>,
        budget: Option<Arc<TokenBudget>>,
    ) -> Result<Vec<MemberOutcome>, String> {
        let mut models = Vec::with_capacity(members.len());
        for member in members {
            models.push(self.resolve_model(member)?);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<(usize, MemberOutcome)> = JoinSet::new();
        for (idx, (member, model)) in members.iter().cloned().zip(models).enumerate() {
            let provider = self.provider.clone();
            let registry = registry.clone();
            let budget = budget.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| e.to_string())?;
            join_set.spawn(async move {
                let task = member.task.clone();
                let outcome = run_member(provider, &member, &model, task, registry, budget).await;
                drop(permit);
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<MemberOutcome>> = (0..members.len()).map(|_| None).collect();
        let mut any_failed = false;
        while let Some(joined) = join_set.join_next().await {
            let (idx, outcome) = joined.map_err(|e| e.to_string())?;
            if outcome.error.is_some() {
                any_failed = true;
            }
            slots[idx] = Some(outcome);
        }
        let outcomes: Vec<MemberOutcome> = slots.into_iter().map(|o| o.expect("every index spawned exactly once")).collect();

        if any_failed {
            let composite = outcomes
                .iter()
                .map(|o| match &o.error {
                    Some(e) => format!("[{}] error: {e}", o.member_id),
                    None => format!("[{}] ok: {}", o.member_id, o.content),
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Err(format!("one or more team members failed:\n{composite}"));
        }

        Ok(outcomes)
    }

    async fn run_dag(
        &self,
        members: &[TeamMember],
        registry: Arc<ToolRegistry>,
        budget: Option<Arc<TokenBudget>>,
    ) -> Result<Vec<MemberOutcome>, String> {
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let by_id: HashMap<String, TeamMember> = members.iter().cloned().map(|m| (m.id.clone(), m)).collect();
        for member in members {
            for dep in &member.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(format!(
                        "team member \"{}\" depends_on unknown id \"{dep}\"",
                        member.id
                    ));
                }
            }
        }

        let mut in_degree: HashMap<String, usize> =
            members.iter().map(|m| (m.id.clone(), m.depends_on.len())).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for member in members {
            for dep in &member.depends_on {
                dependents.entry(dep.clone()).or_default().push(member.id.clone());
            }
        }

        // Kahn's-algorithm cycle check, run over a disposable copy of in_degree.
        {
            let mut sim = in_degree.clone();
            let mut queue: VecDeque<String> =
                sim.iter().filter(|(_, d)| **d == 0).map(|(id, _)| id.clone()).collect();
            let mut visited = 0usize;
            while let Some(id) = queue.pop_front() {
                visited += 1;
                if let Some(deps) = dependents.get(&id) {
                    for d in deps {
                        let entry = sim.get_mut(d).expect("dependent id validated above");
                        *entry -= 1;
                        if *entry == 0 {
                            queue.push_back(d.clone());
                        }
                    }
                }
            }
            if visited != members.len() {
                return Err("team DAG contains a cycle".to_string());
            }
        }

        let mut models = HashMap::with_capacity(members.len());
        for member in members {
            models.insert(member.id.clone(), self.resolve_model(member)?);
        }

        let mut context_buffers: HashMap<String, String> = HashMap::new();
        let mut outcomes_by_id: HashMap<String, MemberOutcome> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<(String, MemberOutcome)> = JoinSet::new();
        let mut ready: VecDeque<String> =
            in_degree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| id.clone()).collect();
        let mut in_flight = 0usize;

        loop {
            while let Some(id) = ready.pop_front() {
                let member = by_id.get(&id).expect("member exists").clone();
                let model = models.get(&id).expect("model resolved above").clone();
                let mut task = member.task.clone();
                if let Some(ctx) = context_buffers.get(&id) {
                    task.push_str("\n\n--- Dependency Output ---\n");
                    task.push_str(&truncate_chars(ctx, MAX_CONTEXT_CHARS));
                }
                let provider = self.provider.clone();
                let registry = registry.clone();
                let budget = budget.clone();
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| e.to_string())?;
                in_flight += 1;
                join_set.spawn(async move {
                    let outcome = run_member(provider, &member, &model, task, registry, budget).await;
                    drop(permit);
                    (member.id.clone(), outcome)
                });
            }

            if in_flight == 0 {
                break;
            }

            let joined = join_set
                .join_next()
                .await
                .expect("in_flight tracks outstanding joins");
            in_flight -= 1;
            let (id, outcome) = joined.map_err(|e| e.to_string())?;
            if let Some(err) = &outcome.error {
                return Err(format!("team member \"{id}\" failed: {err}"));
            }
            if let Some(deps) = dependents.get(&id) {
                for dep in deps {
                    let buf = context_buffers.entry(dep.clone()).or_default();
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(&outcome.content);
                    let entry = in_degree.get_mut(dep).expect("dependent id validated above");
                    *entry -= 1;
                    if *entry == 0 {
                        ready.push_back(dep.clone());
                    }
                }
            }
            outcomes_by_id.insert(id, outcome);
        }

        let outcomes = members.iter().filter_map(|m| outcomes_by_id.remove(&m.id)).collect();
        Ok(outcomes)
    }

    async fn run_evaluator_optimizer(
        &self,
        members: &[TeamMember],
        registry: Arc<ToolRegistry>,
        budget: Option<Arc<TokenBudget>>,
    ) -> Result<Vec<MemberOutcome>, String> {
        if members.len() != 2 {
            return Err("evaluator_optimizer strategy requires exactly two members (worker, evaluator)".to_string());
        }
        let worker = &members[0];
        let evaluator = &members[1];
        let worker_model = self.resolve_model(worker)?;
        let evaluator_model = self.resolve_model(evaluator)?;

        let worker_sender = format!("team:{}", worker.id);
        let mut worker_messages = vec![
            Message::system(format!("You are acting as: {}.", worker.role)),
            Message::user(worker.task.clone()),
        ];

        let mut last_worker_output = String::new();
        for _attempt in 0..EVALUATOR_MAX_ATTEMPTS {
            let worker_loop = ToolLoop::new(build_loop_config(
                self.provider.clone(),
                worker_model.clone(),
                worker_sender.clone(),
                budget.clone(),
                registry.clone(),
            ));
            let worker_outcome = worker_loop
                .run(&worker_sender, worker_messages.clone())
                .await
                .map_err(|e| format!("team member \"{}\" failed: {e}", worker.id))?;
            worker_messages = worker_outcome.messages;
            last_worker_output = worker_outcome.content;

            let judge_prompt = format!(
                "{}\n--- Worker Output ---\n{}\nReply strictly '[PASS]' if correct",
                evaluator.task,
                truncate_chars(&last_worker_output, MAX_CONTEXT_CHARS),
            );
            let evaluator_sender = format!("team:{}", evaluator.id);
            let evaluator_loop = ToolLoop::new(build_loop_config(
                self.provider.clone(),
                evaluator_model.clone(),
                evaluator_sender.clone(),
                budget.clone(),
                registry.clone(),
            ));
            let evaluator_outcome = evaluator_loop
                .run(
                    &evaluator_sender,
                    vec![
                        Message::system(format!("You are acting as: {}.", evaluator.role)),
                        Message::user(judge_prompt),
                    ],
                )
                .await
                .map_err(|e| format!("team member \"{}\" failed: {e}", evaluator.id))?;

            if evaluator_outcome.content.trim_start().starts_with("[PASS]") {
                return Ok(vec![
                    MemberOutcome {
                        member_id: worker.id.clone(),
                        content: last_worker_output,
                        error: None,
                    },
                    MemberOutcome {
                        member_id: evaluator.id.clone(),
                        content: evaluator_outcome.content,
                        error: None,
                    },
                ]);
            }

            worker_messages.push(Message::user(format!(
                "Evaluator feedback (attempt failed): {}\nRevise your output accordingly.",
                evaluator_outcome.content
            )));
        }

        Err(format!(
            "evaluator_optimizer exhausted {EVALUATOR_MAX_ATTEMPTS} attempts without a [PASS] verdict"
        ))
    }

    async fn run_auto_reviewer(
        &self,
        strategy: TeamStrategy,
        members: &[TeamMember],
        outcomes: &[MemberOutcome],
        registry: Arc<ToolRegistry>,
        budget: Option<Arc<TokenBudget>>,
    ) -> Option<String> {
        if matches!(strategy, TeamStrategy::EvaluatorOptimizer) {
            return None;
        }
        let mut produced: Vec<Produces> = members.iter().filter_map(|m| m.produces).collect();
        produced.dedup();
        if produced.is_empty() {
            return None;
        }

        let combined = outcomes
            .iter()
            .map(|o| format!("[{}]\n{}", o.member_id, o.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut notes = Vec::new();
        for produces in produced {
            let task = format!(
                "{}\n\n--- Team Output ---\n{}",
                canned_review_task(produces),
                truncate_chars(&combined, MAX_CONTEXT_CHARS)
            );
            let sender = "team:reviewer".to_string();
            let reviewer_loop = ToolLoop::new(build_loop_config(
                self.provider.clone(),
                self.default_model.clone(),
                sender.clone(),
                budget.clone(),
                registry.clone(),
            ));
            let messages = vec![
                Message::system("You are the team's quality reviewer."),
                Message::user(task),
            ];
            if let Ok(outcome) = reviewer_loop.run(&sender, messages).await {
                notes.push(outcome.content);
            }
        }
        if notes.is_empty() {
            None
        } else {
            Some(notes.join("\n\n"))
        }
    }
}
