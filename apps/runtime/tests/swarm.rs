//! End-to-end swarm test
//!
//! A coordinator fans a task out to completion workers, which call a stub
//! completion endpoint and report back over the bus.

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_runtime::agents::{
    Agent, AgentConfig, AgentRole, AgentStatus, Capability, CompletionWorker, Coordinator,
};
use swarm_runtime::bus::{BusConfig, MemoryTransport, MessageBus};
use swarm_runtime::domain::repositories::TaskRepository;
use swarm_runtime::domain::task::{Task, TaskRequirements, TaskStatus};
use swarm_runtime::infrastructure::repositories::InMemoryTaskRepository;
use swarm_runtime::llm::{ApiClientConfig, CompletionClient};

/// Answers every completion with the prompt's task line
async fn completions(State(calls): State<Arc<AtomicUsize>>, Json(body): Json<Value>) -> Json<Value> {
    calls.fetch_add(1, Ordering::SeqCst);
    let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
    let task_line = prompt.lines().next().unwrap_or_default().to_string();

    Json(json!({
        "id": "cmpl",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-test",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": task_line}, "finish_reason": "stop"}]
    }))
}

async fn stub_endpoint(calls: Arc<AtomicUsize>) -> String {
    let app = Router::new()
        .route("/openai/deployments/:deployment/chat/completions", post(completions))
        .with_state(calls);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_coordinator_collects_worker_reports() {
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint = stub_endpoint(Arc::clone(&calls)).await;
    let client = Arc::new(CompletionClient::new(ApiClientConfig::new(endpoint, "key", "gpt-test")).unwrap());

    let bus = MessageBus::new(Arc::new(MemoryTransport::new()), BusConfig::default());
    bus.connect().await.unwrap();

    let coordinator = Agent::new(
        AgentConfig::new(AgentRole::Coordinator, Arc::new(Coordinator::new()))
            .with_capability(Capability::new("planning", "")),
        bus.clone(),
    );
    coordinator.initialize().await.unwrap();
    let mut workers = Vec::new();
    for _ in 0..2 {
        workers.push(
            coordinator
                .spawn(AgentConfig::new(
                    AgentRole::Worker,
                    Arc::new(CompletionWorker::new(Arc::clone(&client))),
                ))
                .await
                .unwrap(),
        );
    }

    let repository = InMemoryTaskRepository::new();
    let (task, _) = Task::new("plan", "Plan", json!({"subtasks": ["first", "second", "third"]})).unwrap();
    let task = task.with_requirements(TaskRequirements {
        capabilities: vec!["planning".to_string()],
        ..TaskRequirements::default()
    });
    repository.save(&task).await.unwrap();

    let mut claimed = repository
        .claim_next(coordinator.id(), &coordinator.capability_names().await)
        .await
        .unwrap()
        .expect("coordinator can claim the task");
    claimed.start().unwrap();
    let result = coordinator.execute(&claimed).await.unwrap();
    claimed.complete(result).unwrap();
    repository.save(&claimed).await.unwrap();

    let reports = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let reports = Coordinator::reports(&coordinator, claimed.id()).await;
            if reports.len() == 3 {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("all reports arrive");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let mut answers: Vec<(usize, String)> = reports
        .iter()
        .map(|r| {
            assert!(r.success, "report failed: {:?}", r.error);
            (r.index, r.data.as_ref().unwrap()["content"].as_str().unwrap().to_string())
        })
        .collect();
    answers.sort();
    assert_eq!(
        answers,
        vec![
            (0, "Task: first".to_string()),
            (1, "Task: second".to_string()),
            (2, "Task: third".to_string()),
        ]
    );

    let stored = repository.find_by_id(claimed.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Completed);
    for worker in &workers {
        assert_eq!(worker.status().await, AgentStatus::Idle);
        assert!(worker.recall("last_completion").await.is_some());
    }

    coordinator.terminate().await.unwrap();
    bus.disconnect().await.unwrap();
}
