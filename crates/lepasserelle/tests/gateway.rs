// Integration tests for the tool gateway
//
// These tests cover end-to-end workflows through MCP tool calls:
// - Planning, executing (as a job), approving and rolling back a full-lifecycle operation
// - A rejected approval gate leaves the workspace untouched
// - A manual holistic context update and its rollback
// - The stdio transport answering several requests in one session

use lecycle::JsonRegistryStore;
use lepasserelle::mcp::{JsonRpcRequest, McpServer};
use lepasserelle::{Engine, EngineConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const REGISTRY_FILE: &str = "docs/capability-registry.json";

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn seed_documents(dir: &TempDir) {
    write(dir.path(), "docs/NewConcepts/a.md", "# A\n\nUses PH-1.\n");
    JsonRegistryStore::new(dir.path(), REGISTRY_FILE)
        .register_placeholder("PH-1", "NewConcepts", Some(Path::new("docs/NewConcepts/a.md")))
        .unwrap();
}

fn server(dir: &TempDir) -> McpServer {
    let mut config = EngineConfig::default();
    config.coordination.approval_poll_interval_ms = 10;
    config.coordination.minimum_approvals = 1;
    let engine = Engine::open(dir.path(), config).unwrap();
    McpServer::new(Arc::new(engine))
}

/// Call a tool and return its structured payload
async fn call(server: &McpServer, name: &str, arguments: Value) -> Value {
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    }))
    .unwrap();

    let response = server.handle_request(request).await.unwrap();
    assert!(response.error.is_none(), "{}: {:?}", name, response.error);
    let result = response.result.unwrap();
    assert_eq!(
        result["isError"],
        result["structuredContent"]["success"] != json!(true)
    );
    result["structuredContent"].clone()
}

/// Answer every pending approval with `decision` until the job is terminal
async fn drive_job(server: &McpServer, job_id: &str, decision: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = call(server, "get-job-status", json!({ "jobId": job_id })).await;
        let job = status["job"].clone();
        if matches!(
            job["status"].as_str(),
            Some("completed" | "failed" | "cancelled")
        ) {
            return job;
        }

        let approvals = call(server, "get-approval-status", json!({})).await;
        for approval in approvals["pending"].as_array().unwrap() {
            let answer = call(
                server,
                "submit-approval-response",
                json!({
                    "approvalId": approval["approvalId"],
                    "approver": "reviewer",
                    "decision": decision,
                }),
            )
            .await;
            assert_eq!(answer["success"], true, "{}", answer);
        }

        assert!(Instant::now() < deadline, "job {} never finished", job_id);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_lifecycle_operation_through_tools() {
    let dir = tempfile::tempdir().unwrap();
    seed_documents(&dir);
    let registry_before = fs::read(dir.path().join(REGISTRY_FILE)).unwrap();
    let server = server(&dir);

    let plan = call(
        &server,
        "create-lifecycle-coordination-plan",
        json!({
            "operationType": "full-lifecycle",
            "placeholderIds": ["PH-1"],
            "documentPaths": ["docs/NewConcepts/a.md"],
            "targetDomain": "Analysis",
            "migrationReason": "concept settled"
        }),
    )
    .await;
    assert_eq!(plan["success"], true);
    assert!(plan["approvalGates"].as_u64().unwrap() >= 1);
    let plan_id = plan["planId"].as_str().unwrap().to_string();

    let started = call(
        &server,
        "execute-coordinated-operation",
        json!({ "planId": plan_id, "runAsJob": true }),
    )
    .await;
    assert_eq!(started["started"], true);
    let job_id = started["jobId"].as_str().unwrap().to_string();

    let job = drive_job(&server, &job_id, "approved").await;
    assert_eq!(job["status"], "completed", "{}", job);
    assert_eq!(job["type"], "coordinated-operation");
    let operation_id = job["result"]["operationId"].as_str().unwrap().to_string();

    assert!(dir.path().join("docs/Analysis/a.md").exists());
    assert!(!dir.path().join("docs/NewConcepts/a.md").exists());

    let status = call(
        &server,
        "get-coordination-status",
        json!({ "operationId": operation_id }),
    )
    .await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["rollbackAvailable"], true);
    assert_eq!(status["progress"]["completed"], status["progress"]["total"]);

    let rolled_back = call(
        &server,
        "rollback-coordinated-operation",
        json!({ "operationId": operation_id, "rollbackReason": "wrong domain" }),
    )
    .await;
    assert_eq!(rolled_back["rolledBack"], true);
    assert_eq!(rolled_back["status"], "rolled-back");
    assert!(rolled_back["recommendations"].as_array().unwrap().len() >= 2);

    assert!(dir.path().join("docs/NewConcepts/a.md").exists());
    assert!(!dir.path().join("docs/Analysis/a.md").exists());
    assert_eq!(fs::read(dir.path().join(REGISTRY_FILE)).unwrap(), registry_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_gate_leaves_workspace_untouched() {
    let dir = tempfile::tempdir().unwrap();
    seed_documents(&dir);
    let server = server(&dir);

    let plan = call(
        &server,
        "create-lifecycle-coordination-plan",
        json!({
            "operationType": "newconcepts-migration",
            "placeholderIds": ["PH-1"],
            "documentPaths": ["docs/NewConcepts/a.md"],
            "targetDomain": "Analysis"
        }),
    )
    .await;
    let started = call(
        &server,
        "execute-coordinated-operation",
        json!({ "planId": plan["planId"], "runAsJob": true }),
    )
    .await;

    let job = drive_job(&server, started["jobId"].as_str().unwrap(), "rejected").await;
    assert_eq!(job["status"], "failed");
    assert!(job["error"]
        .as_str()
        .unwrap()
        .contains("ApprovalRejectedError"));

    assert!(dir.path().join("docs/NewConcepts/a.md").exists());
    assert!(!dir.path().join("docs/Analysis/a.md").exists());
}

#[tokio::test]
async fn test_holistic_update_and_rollback_through_tools() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Analysis/x.cs", "public class X {}");
    let server = server(&dir);

    let update = call(
        &server,
        "execute-holistic-context-update",
        json!({ "changedFiles": ["Analysis/x.cs"], "performanceTimeout": 15 }),
    )
    .await;
    assert_eq!(update["success"], true, "{}", update);
    assert_eq!(update["affectedDomains"], json!(["Analysis"]));
    assert!(update["executionTime"].as_u64().unwrap() <= 15_000);
    assert_eq!(update["triggerType"], "manual");
    let update_id = update["updateId"].as_str().unwrap().to_string();
    let context_file = dir.path().join(".context/Analysis/CONTEXT.md");
    assert!(context_file.exists());

    let recent = call(&server, "get-recent-holistic-updates", json!({ "limit": 5 })).await;
    assert_eq!(recent["success"], true);

    let pending = call(&server, "list-pending-rollbacks", json!({})).await;
    assert!(pending.to_string().contains(&update_id));

    let rollback = call(
        &server,
        "rollback-holistic-update",
        json!({ "updateId": update_id }),
    )
    .await;
    assert_eq!(rollback["success"], true, "{}", rollback);
    assert!(!context_file.exists());

    let again = call(
        &server,
        "rollback-holistic-update",
        json!({ "updateId": "upd-unknown" }),
    )
    .await;
    assert_eq!(again["success"], false);
    assert_eq!(again["error"]["kind"], "ValidationError");
}

#[tokio::test]
async fn test_background_reindex_job() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Analysis/x.cs", "x");
    write(dir.path(), "Billing/y.cs", "y");
    let server = server(&dir);

    let started = call(
        &server,
        "start-full-repository-reindex",
        json!({ "batchSize": 1 }),
    )
    .await;
    assert_eq!(started["started"], true);

    let job = server
        .engine()
        .jobs()
        .wait_for_completion(started["jobId"].as_str().unwrap(), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(job.status, letravail::JobStatus::Completed, "{:?}", job.error);
    assert!(dir.path().join(".context/Analysis/CONTEXT.md").exists());
    assert!(dir.path().join(".context/Billing/CONTEXT.md").exists());
}

#[tokio::test]
async fn test_stdio_session() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);

    let input = [
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "get-job-status", "arguments": {} }
        }),
    ]
    .iter()
    .map(|v| format!("{}\n", v))
    .collect::<String>();

    let (mut client, server_end) = tokio::io::duplex(1 << 20);
    server.serve(input.as_bytes(), server_end).await.unwrap();

    let mut output = String::new();
    client.read_to_string(&mut output).await.unwrap();

    // requests run concurrently, so replies may arrive in any order
    let replies: HashMap<u64, Value> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .map(|reply| (reply["id"].as_u64().unwrap(), reply))
        .collect();

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[&1]["result"]["serverInfo"]["name"], "lecoord");
    assert_eq!(
        replies[&2]["result"]["tools"].as_array().unwrap().len(),
        14
    );
    assert_eq!(replies[&3]["result"]["isError"], false);
}
