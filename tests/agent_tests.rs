use async_trait::async_trait;
use mealmatch::agent::{AgentError, AgentResponse, RecipeAgent, Role};
use mealmatch::api_connection::{ApiConnectionError, ChatBackend, ChatMessage};
use mealmatch::config::AgentConfig;
use mealmatch::memory::{self, MemoryStore, SharedMemory};
use mealmatch::search::{HashingEmbedder, Metadata, SubstitutionRecord, VectorStore, RECIPES_COLLECTION};
use mealmatch::tools::{
    default_registry, AccessMemory, QueryVectorDb, ScrapeWebRecipe, SubstitutionFilter, ToolArguments,
    ToolDescription, ToolError, ToolFunction, ToolRegistry,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Replays canned completions and records every transcript it was sent.
struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f32,
    ) -> Result<String, ApiConnectionError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ApiConnectionError::EmptyCompletion)
    }
}

/// Counts invocations and returns a fixed value.
struct CountingTool {
    calls: AtomicUsize,
    result: Value,
}

impl CountingTool {
    fn new(result: Value) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), result })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolFunction for CountingTool {
    async fn call(&self, _arguments: &ToolArguments) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

struct FailingTool;

#[async_trait]
impl ToolFunction for FailingTool {
    async fn call(&self, _arguments: &ToolArguments) -> Result<Value, ToolError> {
        Err(ToolError::Failed("store offline".to_string()))
    }
}

fn call_block(name: &str, body: &str) -> String {
    format!("Call {}:\n```json\n{{\n{}\n}}\n```", name, body)
}

fn described(name: &str, function: Arc<dyn ToolFunction>) -> ToolDescription {
    ToolDescription::new(
        name,
        format!("{}(query: str)", name),
        "Test tool.",
        call_block(name, "\"query\": \"x\""),
        function,
    )
}

struct Fixture {
    _dir: TempDir,
    store: VectorStore,
    memory: SharedMemory,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path().join("chromadb"), Arc::new(HashingEmbedder::default())).unwrap();
        let memory = MemoryStore::reset(&store).unwrap().shared();
        Self { _dir: dir, store, memory }
    }

    fn memory_len(&self) -> usize {
        memory::lock(&self.memory).unwrap().len()
    }

    fn agent(&self, backend: Arc<ScriptedBackend>, tools: ToolRegistry, config: AgentConfig) -> RecipeAgent {
        RecipeAgent::new(backend, tools, self.memory.clone(), config).unwrap()
    }

    fn standard_tools(&self, table: Vec<SubstitutionRecord>) -> ToolRegistry {
        let mut recipes = self.store.get_or_create_collection(RECIPES_COLLECTION).unwrap();
        let metadata: Metadata = json!({"title": "Banana Bread", "url": "https://example.com/banana-bread"})
            .as_object()
            .unwrap()
            .clone();
        recipes
            .add(
                vec!["banana bread bananas flour eggs sugar".to_string()],
                Some(vec![metadata]),
                vec!["banana-bread".to_string()],
            )
            .unwrap();

        default_registry(
            QueryVectorDb::new(recipes),
            SubstitutionFilter::new(table),
            ScrapeWebRecipe::new(reqwest::Client::new()),
            AccessMemory::new(self.memory.clone()),
        )
    }
}

fn substitution(ingredient: &str, substitute: &str) -> SubstitutionRecord {
    let mut record = SubstitutionRecord::new();
    record.insert("Ingredient".to_string(), json!(ingredient));
    record.insert("Substitute".to_string(), json!(substitute));
    record
}

#[tokio::test]
async fn plain_answer_is_a_single_step_and_is_remembered() {
    let fixture = Fixture::new();
    let backend = ScriptedBackend::new(&["# Banana Bread\n\nMash three bananas..."]);
    let mut agent = fixture.agent(backend.clone(), fixture.standard_tools(Vec::new()), AgentConfig::default());

    let (response, steps) = agent.respond("Give me a banana bread recipe", true).await.unwrap();

    assert_eq!(response.text, "# Banana Bread\n\nMash three bananas...");
    assert_eq!(steps, vec![AgentResponse::Text(response.clone())]);
    assert_eq!(fixture.memory_len(), 1);
    assert!(agent.tool_results().is_empty());
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn no_memory_flag_skips_persistence() {
    let fixture = Fixture::new();
    let backend = ScriptedBackend::new(&["Some recipe"]);
    let mut agent = fixture.agent(backend, fixture.standard_tools(Vec::new()), AgentConfig::default());

    agent.respond("Give me a banana bread recipe", false).await.unwrap();
    assert_eq!(fixture.memory_len(), 0);
}

#[tokio::test]
async fn identical_answers_are_stored_once() {
    let fixture = Fixture::new();
    let backend = ScriptedBackend::new(&["Same recipe", "Same recipe"]);
    let mut agent = fixture.agent(backend, fixture.standard_tools(Vec::new()), AgentConfig::default());

    agent.respond("first", true).await.unwrap();
    agent.respond("second", true).await.unwrap();
    assert_eq!(fixture.memory_len(), 1);
}

#[tokio::test]
async fn recipe_search_call_is_executed_once_and_reported() {
    let fixture = Fixture::new();
    let first = format!("Let me search.\n{}", call_block("query_vectordb", "\"query\": \"banana bread recipe\""));
    let backend = ScriptedBackend::new(&[&first, "Here is your banana bread.\n\n## References\nhttps://example.com/banana-bread"]);
    let mut agent = fixture.agent(backend.clone(), fixture.standard_tools(Vec::new()), AgentConfig::default());

    let (response, steps) = agent.respond("Give me a banana bread recipe", true).await.unwrap();

    assert_eq!(steps.len(), 2);
    let tool_step = steps[0].as_tool().expect("tool step first");
    assert_eq!(tool_step.tool_name, "query_vectordb");
    assert_eq!(tool_step.text, r#"{"query":"banana bread recipe"}"#);
    assert_eq!(tool_step.tool_result[0]["title"], "Banana Bread");
    assert_eq!(steps[1].as_text(), Some(&response));

    // Only the tool that was mentioned shows up in the usage table.
    let used: Vec<_> = agent.tool_results().keys().cloned().collect();
    assert_eq!(used, vec!["query_vectordb".to_string()]);

    // The regeneration saw the tool result but not the assistant's call text.
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    let resend = &requests[1];
    assert!(resend.iter().all(|m| m.role != "assistant"));
    let report = &resend.last().unwrap().content;
    assert!(report.starts_with("Assistant Call query_vectordb:\n{\"query\":\"banana bread recipe\"}\nreturned:\n["));
    assert!(report.contains("Banana Bread"));
}

#[tokio::test]
async fn repeated_call_in_the_same_turn_is_refused() {
    let fixture = Fixture::new();
    let lookup = CountingTool::new(json!("found"));
    let tools = ToolRegistry::new(vec![described("lookup", lookup.clone())]).unwrap();
    let call = call_block("lookup", "\"query\": \"bread\"");
    let backend = ScriptedBackend::new(&[&call, &call, "done"]);
    let mut agent = fixture.agent(backend.clone(), tools, AgentConfig::default());

    let (response, steps) = agent.respond("bread please", false).await.unwrap();

    assert_eq!(response.text, "done");
    assert_eq!(lookup.calls(), 1);
    assert_eq!(steps.iter().filter(|s| s.as_tool().is_some()).count(), 1);

    let last_request = backend.requests().pop().unwrap();
    assert_eq!(
        last_request.last().map(|m| m.content.as_str()),
        Some("Already executed lookup. Do not use again.")
    );
}

#[tokio::test]
async fn usage_table_resets_every_turn() {
    let fixture = Fixture::new();
    let lookup = CountingTool::new(json!("found"));
    let tools = ToolRegistry::new(vec![described("lookup", lookup.clone())]).unwrap();
    let call = call_block("lookup", "\"query\": \"bread\"");
    let backend = ScriptedBackend::new(&[&call, "first done", &call, "second done"]);
    let mut agent = fixture.agent(backend, tools, AgentConfig::default());

    agent.respond("one", false).await.unwrap();
    agent.respond("two", false).await.unwrap();
    assert_eq!(lookup.calls(), 2);
}

#[tokio::test]
async fn iteration_cap_returns_the_last_generation() {
    let fixture = Fixture::new();
    let lookup = CountingTool::new(json!("found"));
    let tools = ToolRegistry::new(vec![described("lookup", lookup.clone())]).unwrap();
    let call = call_block("lookup", "\"query\": \"bread\"");
    let still_calling = format!("still going\n{}", call);
    let backend = ScriptedBackend::new(&[&call, &call, &still_calling]);
    let config = AgentConfig {
        max_internal_iteration: 2,
        ..AgentConfig::default()
    };
    let mut agent = fixture.agent(backend.clone(), tools, config);

    let (response, steps) = agent.respond("bread please", false).await.unwrap();

    // One initial generation plus one per iteration.
    assert_eq!(backend.requests().len(), 3);
    assert_eq!(response.text, still_calling);
    assert_eq!(lookup.calls(), 1);
    assert_eq!(steps.len(), 2);
}

#[tokio::test]
async fn zero_iterations_never_calls_tools() {
    let fixture = Fixture::new();
    let lookup = CountingTool::new(json!("found"));
    let tools = ToolRegistry::new(vec![described("lookup", lookup.clone())]).unwrap();
    let call = call_block("lookup", "\"query\": \"bread\"");
    let backend = ScriptedBackend::new(&[&call]);
    let config = AgentConfig {
        max_internal_iteration: 0,
        ..AgentConfig::default()
    };
    let mut agent = fixture.agent(backend, tools, config);

    let (response, steps) = agent.respond("bread please", false).await.unwrap();
    assert_eq!(response.text, call);
    assert_eq!(steps.len(), 1);
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn malformed_arguments_are_skipped_silently() {
    let fixture = Fixture::new();
    let lookup = CountingTool::new(json!("found"));
    let tools = ToolRegistry::new(vec![described("lookup", lookup.clone())]).unwrap();
    let backend = ScriptedBackend::new(&["Call lookup: for bread, please", "final recipe"]);
    let mut agent = fixture.agent(backend.clone(), tools, AgentConfig::default());

    let (response, steps) = agent.respond("bread please", false).await.unwrap();

    assert_eq!(response.text, "final recipe");
    assert_eq!(steps.len(), 1);
    assert_eq!(lookup.calls(), 0);
    assert!(agent.tool_results().is_empty());

    // Nothing was appended for the failed call: system prompt and user message only.
    let resend = &backend.requests()[1];
    let roles: Vec<_> = resend.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "user"]);
}

#[tokio::test]
async fn simultaneous_calls_follow_registry_order() {
    let fixture = Fixture::new();
    let first = CountingTool::new(json!(1));
    let second = CountingTool::new(json!(2));
    let tools = ToolRegistry::new(vec![described("first", first.clone()), described("second", second.clone())]).unwrap();
    let reply = format!(
        "{}\n{}",
        call_block("second", "\"query\": \"b\""),
        call_block("first", "\"query\": \"a\"")
    );
    let backend = ScriptedBackend::new(&[&reply, "done"]);
    let mut agent = fixture.agent(backend, tools, AgentConfig::default());

    let (_, steps) = agent.respond("both", false).await.unwrap();
    let order: Vec<_> = steps
        .iter()
        .filter_map(|s| s.as_tool())
        .map(|t| t.tool_name.as_str())
        .collect();
    assert_eq!(order, vec!["first", "second"]);
    assert_eq!((first.calls(), second.calls()), (1, 1));
}

#[tokio::test]
async fn failing_tool_aborts_the_turn() {
    let fixture = Fixture::new();
    let tools = ToolRegistry::new(vec![described("broken", Arc::new(FailingTool))]).unwrap();
    let backend = ScriptedBackend::new(&[&call_block("broken", "\"query\": \"x\""), "unused"]);
    let mut agent = fixture.agent(backend, tools, AgentConfig::default());

    let err = agent.respond("go", true).await.unwrap_err();
    assert!(matches!(err, AgentError::Tool { ref tool, .. } if tool == "broken"));
    assert_eq!(fixture.memory_len(), 0);
}

#[tokio::test]
async fn substitution_call_returns_matching_rows() {
    let fixture = Fixture::new();
    let table = vec![substitution("eggs", "flax egg"), substitution("butter", "margarine")];
    let first = call_block("substitution_filter", "\"to_replace\": [\"egg\"]");
    let backend = ScriptedBackend::new(&[&first, "Eggless banana bread"]);
    let mut agent = fixture.agent(backend, fixture.standard_tools(table), AgentConfig::default());

    let (_, steps) = agent.respond("Banana bread without eggs", false).await.unwrap();
    let tool = steps[0].as_tool().unwrap();
    assert_eq!(tool.tool_name, "substitution_filter");
    assert_eq!(tool.tool_result, json!([{"Ingredient": "eggs", "Substitute": "flax egg"}]));
}

#[tokio::test]
async fn memory_tool_recalls_previous_turns() {
    let fixture = Fixture::new();
    let recall = call_block("access_memory", "\"query\": \"banana bread\"");
    let backend = ScriptedBackend::new(&["Eggless banana bread with flax", &recall, "Same as before"]);
    let mut agent = fixture.agent(backend, fixture.standard_tools(Vec::new()), AgentConfig::default());

    agent.respond("Banana bread without eggs", true).await.unwrap();
    let (_, steps) = agent.respond("What did you suggest last time?", true).await.unwrap();

    let tool = steps[0].as_tool().unwrap();
    assert_eq!(tool.tool_result, json!(["Eggless banana bread with flax"]));
    assert_eq!(fixture.memory_len(), 2);
}

#[tokio::test]
async fn conversation_starts_with_the_system_prompt() {
    let fixture = Fixture::new();
    let backend = ScriptedBackend::new(&["a", "b"]);
    let mut agent = fixture.agent(backend, fixture.standard_tools(Vec::new()), AgentConfig::default());

    agent.respond("first", false).await.unwrap();
    agent.respond("second", false).await.unwrap();

    let conversation = agent.conversation();
    assert_eq!(conversation[0].role, Role::System);
    assert!(conversation[0].content.contains("You have access to 4 tools:"));
    assert!(conversation[0].content.contains("\n-substitution_filter(to_replace: list[str]): "));
}
