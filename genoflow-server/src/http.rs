//! HTTP routes.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use genoflow::core::{LogEntry, ResultBundle, RunId};
use genoflow::submission::{qc_report, QcReport};
use genoflow::tracking::RunSnapshot;
use genoflow::utils::iso_timestamp;

use crate::error::ApiError;
use crate::uploads::receive_submission;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    run_id: RunId,
    qc: QcReport,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    since: Option<u64>,
}

fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownRun(raw.to_string()))
}

/// Builds the service router.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", delete(delete_job))
        .route("/jobs/{id}/start", post(start_job))
        .route("/jobs/{id}/status", get(job_status))
        .route("/jobs/{id}/logs", get(job_logs))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/result", get(job_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn index() -> &'static str {
    "Transposable Element Detector & Analyzer API is running!"
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let registry = state.orchestrator.registry();
    Json(json!({
        "status": "ok",
        "pipeline": state.orchestrator.definition().name,
        "runs": registry.len(),
        "activeRuns": registry.active_count(),
        "time": iso_timestamp(),
    }))
}

async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let inputs = receive_submission(multipart, &state.config.upload_dir).await?;
    let qc = qc_report(&inputs);
    let run_id = state.orchestrator.submit(inputs)?;
    info!(run_id = %run_id, files = qc.len(), "Job accepted");
    Ok((StatusCode::CREATED, Json(SubmitResponse { run_id, qc })))
}

async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_run_id(&id)?;
    let _detached = state.orchestrator.start(run_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "runId": run_id, "status": "running" })),
    ))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let run_id = parse_run_id(&id)?;
    Ok(Json(state.orchestrator.snapshot(run_id)?))
}

async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let run_id = parse_run_id(&id)?;
    Ok(Json(
        state.orchestrator.logs(run_id, query.since.unwrap_or(0))?,
    ))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_run_id(&id)?;
    state.orchestrator.cancel(run_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "runId": run_id, "cancelRequested": true })),
    ))
}

async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResultBundle>, ApiError> {
    let run_id = parse_run_id(&id)?;
    Ok(Json(state.orchestrator.result(run_id)?))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let run_id = parse_run_id(&id)?;
    state.orchestrator.delete(run_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use genoflow::adapters::AdapterRegistry;
    use genoflow::config::OrchestratorConfig;
    use genoflow::pipeline::{genomics_pipeline, Orchestrator};
    use genoflow::testing::{fast_retry, ScriptedRunner, Step};

    use crate::config::ServerConfig;

    const BOUNDARY: &str = "genoflow-test-boundary";

    struct TestApp {
        router: Router,
        _uploads: tempfile::TempDir,
        upload_dir: std::path::PathBuf,
    }

    fn test_app(overrides: &[(&str, Arc<ScriptedRunner>)], config: OrchestratorConfig) -> TestApp {
        let definition = genomics_pipeline(&fast_retry(3)).unwrap();
        let adapters = AdapterRegistry::uniform(&definition, Arc::new(ScriptedRunner::new()));
        for (name, runner) in overrides {
            adapters.register(*name, runner.clone());
        }
        let orchestrator = Orchestrator::new(definition, adapters, config).unwrap();

        let uploads = tempfile::tempdir().unwrap();
        let server_config = ServerConfig {
            upload_dir: uploads.path().to_path_buf(),
            ..ServerConfig::default()
        };
        TestApp {
            router: app_router(AppState::new(orchestrator, server_config)),
            upload_dir: uploads.path().to_path_buf(),
            _uploads: uploads,
        }
    }

    fn multipart(parts: &[(&str, &str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (field, file_name, content) in parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn four_files() -> Request<Body> {
        multipart(&[
            ("hostGenome", "host.fasta", ">chr1\nACGT\n"),
            ("parasiteGenome", "parasite.FA", ">p1\nTTGA\n"),
            ("hostTranscriptome", "host.fastq", "@r1\nACGT\n+\nIIII\n"),
            ("parasiteTranscriptome", "counts.csv", "gene,count\ng1,5\n"),
        ])
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn request(method: &str, uri: String) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn submit(router: &Router) -> String {
        let (status, body) = send(router, four_files()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["runId"].as_str().unwrap().to_string()
    }

    async fn wait_for_status(router: &Router, run_id: &str, expected: &str) -> Value {
        for _ in 0..500 {
            let (_, body) = send(router, request("GET", format!("/jobs/{run_id}/status"))).await;
            if body["status"] == expected {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} never reached {expected}");
    }

    #[tokio::test]
    async fn test_full_job_lifecycle() {
        let app = test_app(&[], OrchestratorConfig::default());

        let (status, body) = send(&app.router, four_files()).await;
        assert_eq!(status, StatusCode::CREATED);
        let run_id = body["runId"].as_str().unwrap().to_string();
        assert_eq!(body["qc"]["hostGenome"]["fileSize"], 11);
        assert_eq!(body["qc"]["hostGenome"]["status"], "uploaded");
        assert_eq!(body["qc"]["parasiteGenome"]["fileName"], "parasite.FA");
        assert_eq!(body["qc"]["hostGenome"]["sha256"].as_str().unwrap().len(), 64);

        let (status, _) = send(&app.router, request("GET", format!("/jobs/{run_id}/result"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app.router, request("POST", format!("/jobs/{run_id}/start"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "running");

        let snapshot = wait_for_status(&app.router, &run_id, "completed").await;
        assert_eq!(snapshot["progress"], 1.0);
        assert_eq!(snapshot["stages"].as_array().unwrap().len(), 6);

        let (status, bundle) = send(&app.router, request("GET", format!("/jobs/{run_id}/result"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bundle["stages"].as_array().unwrap().len(), 6);
        assert_eq!(bundle["runId"], run_id.as_str());

        let (status, _) = send(&app.router, request("POST", format!("/jobs/{run_id}/start"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_disallowed_extension_is_rejected() {
        let app = test_app(&[], OrchestratorConfig::default());

        let (status, body) = send(
            &app.router,
            multipart(&[
                ("hostGenome", "host.txt", "ACGT"),
                ("hostTranscriptome", "reads.fq", "@r\nA\n+\nI\n"),
            ]),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.get("runId").is_none());
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["field"], "hostGenome");
        assert_eq!(std::fs::read_dir(&app.upload_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_part_and_missing_genome() {
        let app = test_app(&[], OrchestratorConfig::default());

        let (status, body) = send(
            &app.router,
            multipart(&[("notes", "notes.txt", "hello"), ("hostTranscriptome", "r.fq", "x")]),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["field"].as_str())
            .collect();
        assert_eq!(fields, vec!["notes", "genome"]);
    }

    #[tokio::test]
    async fn test_quantification_failure_fails_run() {
        let salmon = Arc::new(ScriptedRunner::new().always(Step::Transient("salmon crashed".into())));
        let app = test_app(&[("salmon", salmon.clone())], OrchestratorConfig::default());

        let run_id = submit(&app.router).await;
        let (status, _) = send(&app.router, request("POST", format!("/jobs/{run_id}/start"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let snapshot = wait_for_status(&app.router, &run_id, "failed").await;
        let stages: Vec<&str> = snapshot["stages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["status"].as_str())
            .collect();
        assert_eq!(
            stages,
            vec!["completed", "completed", "failed", "skipped", "skipped", "skipped"]
        );
        assert_eq!(snapshot["failure"]["stageOrdinal"], 2);
        assert_eq!(snapshot["failure"]["task"], "salmon_quant");
        assert_eq!(salmon.attempts_for("salmon_quant"), 3);

        let (status, _) = send(&app.router, request("GET", format!("/jobs/{run_id}/result"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_logs_since_sequence() {
        let app = test_app(&[], OrchestratorConfig::default());
        let run_id = submit(&app.router).await;
        send(&app.router, request("POST", format!("/jobs/{run_id}/start"))).await;
        wait_for_status(&app.router, &run_id, "completed").await;

        let (status, all) = send(&app.router, request("GET", format!("/jobs/{run_id}/logs"))).await;
        assert_eq!(status, StatusCode::OK);
        let all = all.as_array().unwrap().clone();
        assert_eq!(all[0]["sequence"], 0);

        let (_, tail) = send(&app.router, request("GET", format!("/jobs/{run_id}/logs?since=5"))).await;
        assert_eq!(tail.as_array().unwrap().as_slice(), &all[5..]);

        let (status, empty) =
            send(&app.router, request("GET", format!("/jobs/{run_id}/logs?since=100000"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(empty, json!([]));
    }

    #[tokio::test]
    async fn test_cancel_pending_then_start_conflicts() {
        let app = test_app(&[], OrchestratorConfig::default());
        let run_id = submit(&app.router).await;

        let (status, body) = send(&app.router, request("POST", format!("/jobs/{run_id}/cancel"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["cancelRequested"], true);

        let (status, _) = send(&app.router, request("POST", format!("/jobs/{run_id}/start"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        wait_for_status(&app.router, &run_id, "cancelled").await;
    }

    #[tokio::test]
    async fn test_active_run_cap() {
        let slow = Arc::new(ScriptedRunner::new().with_delay(Duration::from_secs(60)));
        let app = test_app(
            &[("seqkit", slow)],
            OrchestratorConfig::default().with_max_active_runs(1),
        );
        let first = submit(&app.router).await;
        let second = submit(&app.router).await;

        let (status, _) = send(&app.router, request("POST", format!("/jobs/{first}/start"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = send(&app.router, request("POST", format!("/jobs/{second}/start"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_runs() {
        let app = test_app(&[], OrchestratorConfig::default());

        let (status, _) = send(&app.router, request("GET", "/jobs/not-a-run/status".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let missing = RunId::new();
        let (status, _) = send(&app.router, request("POST", format!("/jobs/{missing}/cancel"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let run_id = submit(&app.router).await;
        let (status, _) = send(&app.router, request("DELETE", format!("/jobs/{run_id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, request("GET", format!("/jobs/{run_id}/status"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(&[], OrchestratorConfig::default());
        let (status, body) = send(&app.router, request("GET", "/health".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pipeline"], "host-parasite-te-analysis");
        assert!(body["time"].as_str().unwrap().ends_with("+00:00"));
    }
}
