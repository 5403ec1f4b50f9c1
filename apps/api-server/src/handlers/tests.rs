use std::sync::Arc;
use std::time::Duration;

use actix_web::http::{StatusCode, header};
use actix_web::middleware::from_fn;
use actix_web::{App, test, web};
use stepwise_core::RelayConfig;
use stepwise_core::domain::{Assignment, ChatMessage, ChecklistStep, StepDraft, WindowPolicy};
use stepwise_core::ports::{AssignmentRepository, BaseRepository, StepRepository, TokenService};
use stepwise_core::testing::{RecordingIncidents, ScriptedProvider};
use stepwise_infra::{
    InMemoryAssignmentRepository, InMemoryStepRepository, InMemoryWindowStore, JwtConfig,
    JwtTokenService,
};
use tracing_actix_web::TracingLogger;
use uuid::Uuid;

use super::configure_routes;
use crate::config::{RateLimits, TokenBudgets};
use crate::middleware::request_id::echo_request_id;
use crate::state::{AppState, Services};

const CHECKLIST: &str = r#"{"valid": true, "title": "Lab Report", "steps": [
    {"title": "Read the handout", "description": "Skim it."},
    {"title": "Write methods", "description": "Describe the setup."}
]}"#;

struct Harness {
    state: AppState,
    tokens: Arc<dyn TokenService>,
    incidents: Arc<RecordingIncidents>,
}

impl Harness {
    fn new(provider: Arc<ScriptedProvider>) -> Self {
        let incidents = Arc::new(RecordingIncidents::default());
        let services = Services {
            store: Arc::new(InMemoryWindowStore::new()),
            provider,
            assignments: Arc::new(InMemoryAssignmentRepository::new()),
            steps: Arc::new(InMemoryStepRepository::new()),
            incidents: incidents.clone(),
        };
        let limits = RateLimits {
            parse: WindowPolicy::new(1, Duration::from_secs(24 * 3600)).unwrap(),
            chat: WindowPolicy::new(1, Duration::from_secs(300)).unwrap(),
        };
        let budgets = TokenBudgets {
            parse: 4096,
            chat: 2048,
        };

        Self {
            state: AppState::from_services(services, limits, budgets, RelayConfig::default()),
            tokens: Arc::new(JwtTokenService::new(JwtConfig::default())),
            incidents,
        }
    }

    fn bearer(&self, user_id: Uuid) -> (header::HeaderName, String) {
        let token = self.tokens.generate_token(user_id, None).unwrap();
        (header::AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn seed(&self, user_id: Uuid) -> (Assignment, Vec<ChecklistStep>) {
        let assignment = self
            .state
            .assignments
            .insert(Assignment::new(user_id, "Essay".into(), "Write 500 words".into()))
            .await
            .unwrap();
        let drafts = vec![
            StepDraft {
                title: "Pick a topic".into(),
                description: "Narrow it down.".into(),
            },
            StepDraft {
                title: "Outline".into(),
                description: "Three arguments.".into(),
            },
        ];
        let steps = self
            .state
            .steps
            .insert_many(ChecklistStep::numbered(assignment.id, drafts))
            .await
            .unwrap();
        (assignment, steps)
    }

    async fn chat_history(&self, step_id: Uuid) -> Vec<ChatMessage> {
        for _ in 0..100 {
            let step = self.state.steps.find_by_id(step_id).await.unwrap().unwrap();
            if !step.chat_history.is_empty() {
                return step.chat_history;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }
}

macro_rules! app {
    ($harness:expr) => {
        test::init_service(
            App::new()
                .wrap(from_fn(echo_request_id))
                .wrap(TracingLogger::default())
                .app_data(web::Data::new($harness.state.clone()))
                .app_data(web::Data::new($harness.tokens.clone()))
                .configure(configure_routes),
        )
        .await
    };
}

fn chat_body(assignment: &Assignment, step: &ChecklistStep) -> serde_json::Value {
    serde_json::json!({
        "assignmentId": assignment.id,
        "stepId": step.id,
        "message": "Where do I start?",
        "history": [{"role": "assistant", "content": "Hi! Ask me anything."}]
    })
}

#[actix_web::test]
async fn health_is_public_and_echoes_request_id() {
    let harness = Harness::new(Arc::new(ScriptedProvider::default()));
    let app = app!(harness);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/health").to_request()).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
}

#[actix_web::test]
async fn gated_routes_require_a_bearer_token() {
    let harness = Harness::new(Arc::new(ScriptedProvider::default()));
    let app = app!(harness);

    let req = test::TestRequest::post()
        .uri("/api/step-chat")
        .set_json(serde_json::json!({
            "assignmentId": Uuid::new_v4(),
            "stepId": Uuid::new_v4(),
            "message": "hi"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("x-request-id"));
}

#[actix_web::test]
async fn step_chat_streams_plain_text_and_saves_transcript() {
    let provider = Arc::new(ScriptedProvider::fragments(&["Start ", "with ", "the prompt."]));
    let harness = Harness::new(provider);
    let user = Uuid::new_v4();
    let (assignment, steps) = harness.seed(user).await;
    let app = app!(harness);

    let req = test::TestRequest::post()
        .uri("/api/step-chat")
        .insert_header(harness.bearer(user))
        .set_json(chat_body(&assignment, &steps[1]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap(),
        "text/plain; charset=utf-8"
    );
    let body = test::read_body(resp).await;
    assert_eq!(body, "Start with the prompt.");

    let history = harness.chat_history(steps[1].id).await;
    assert_eq!(
        history,
        vec![
            ChatMessage::assistant("Hi! Ask me anything."),
            ChatMessage::user("Where do I start?"),
            ChatMessage::assistant("Start with the prompt."),
        ]
    );
}

#[actix_web::test]
async fn second_chat_in_window_is_429_with_retry_after() {
    let provider = Arc::new(ScriptedProvider::fragments(&["ok"]));
    let harness = Harness::new(provider.clone());
    let user = Uuid::new_v4();
    let (assignment, steps) = harness.seed(user).await;
    let app = app!(harness);

    let first = test::TestRequest::post()
        .uri("/api/step-chat")
        .insert_header(harness.bearer(user))
        .set_json(chat_body(&assignment, &steps[0]))
        .to_request();
    let resp = test::call_service(&app, first).await;
    assert_eq!(resp.status(), StatusCode::OK);
    test::read_body(resp).await;

    let second = test::TestRequest::post()
        .uri("/api/step-chat")
        .insert_header(harness.bearer(user))
        .set_json(chat_body(&assignment, &steps[0]))
        .to_request();
    let resp = test::call_service(&app, second).await;

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 300);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], 429);
    assert!(body["detail"].as_str().unwrap().contains("minute"));
    assert_eq!(provider.calls(), 1);
}

#[actix_web::test]
async fn chat_on_someone_elses_assignment_is_not_found() {
    let harness = Harness::new(Arc::new(ScriptedProvider::fragments(&["paid"])));
    let (assignment, steps) = harness.seed(Uuid::new_v4()).await;
    let app = app!(harness);

    let req = test::TestRequest::post()
        .uri("/api/step-chat")
        .insert_header(harness.bearer(Uuid::new_v4()))
        .set_json(chat_body(&assignment, &steps[0]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn parse_saves_checklist_then_hits_daily_limit() {
    let provider = Arc::new(ScriptedProvider::default().with_completion(CHECKLIST));
    let harness = Harness::new(provider.clone());
    let user = Uuid::new_v4();
    let app = app!(harness);

    let upload = || {
        test::TestRequest::post()
            .uri("/api/parse-assignment")
            .insert_header(harness.bearer(user))
            .insert_header((header::CONTENT_TYPE, "application/pdf"))
            .set_payload(&b"%PDF-1.7 fake"[..])
            .to_request()
    };

    let resp = test::call_service(&app, upload()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["title"], "Lab Report");
    assert_eq!(body["steps"].as_array().unwrap().len(), 2);

    let saved = harness.state.assignments.find_by_user_id(user).await.unwrap();
    assert_eq!(saved.len(), 1);

    let resp = test::call_service(&app, upload()).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["detail"].as_str().unwrap().contains("hour"));
    assert_eq!(provider.calls(), 1);
}

#[actix_web::test]
async fn parse_rejects_empty_upload_without_spending_quota() {
    let provider = Arc::new(ScriptedProvider::default().with_completion(CHECKLIST));
    let harness = Harness::new(provider.clone());
    let app = app!(harness);

    let req = test::TestRequest::post()
        .uri("/api/parse-assignment")
        .insert_header(harness.bearer(Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls(), 0);
}

#[actix_web::test]
async fn parse_maps_model_verdicts() {
    let not_assignment = Arc::new(
        ScriptedProvider::default().with_completion(r#"{"valid": false, "reason": "This is a receipt."}"#),
    );
    let harness = Harness::new(not_assignment);
    let app = app!(harness);
    let req = test::TestRequest::post()
        .uri("/api/parse-assignment")
        .insert_header(harness.bearer(Uuid::new_v4()))
        .set_payload(&b"%PDF"[..])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "This is a receipt.");

    let garbled = Arc::new(ScriptedProvider::default().with_completion("Sure! Here it is:"));
    let harness = Harness::new(garbled);
    let app = app!(harness);
    let req = test::TestRequest::post()
        .uri("/api/parse-assignment")
        .insert_header(harness.bearer(Uuid::new_v4()))
        .set_payload(&b"%PDF"[..])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let reported = harness.incidents.take();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].kind(), "malformed_output");
}

#[actix_web::test]
async fn assignments_list_progress_and_steps_toggle() {
    let harness = Harness::new(Arc::new(ScriptedProvider::default()));
    let user = Uuid::new_v4();
    let (assignment, steps) = harness.seed(user).await;
    let app = app!(harness);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/steps/{}", steps[0].id))
        .insert_header(harness.bearer(user))
        .set_json(serde_json::json!({ "completed": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/assignments")
        .insert_header(harness.bearer(user))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body[0]["id"], assignment.id.to_string());
    assert_eq!(body[0]["completedCount"], 1);
    assert_eq!(body[0]["totalSteps"], 2);
    assert_eq!(body[0]["steps"][0]["completed"], true);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/steps/{}", steps[1].id))
        .insert_header(harness.bearer(Uuid::new_v4()))
        .set_json(serde_json::json!({ "completed": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn save_assignment_validates_and_numbers_steps() {
    let harness = Harness::new(Arc::new(ScriptedProvider::default()));
    let user = Uuid::new_v4();
    let app = app!(harness);

    let req = test::TestRequest::post()
        .uri("/api/save-assignment")
        .insert_header(harness.bearer(user))
        .set_json(serde_json::json!({ "title": "  ", "steps": [] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/save-assignment")
        .insert_header(harness.bearer(user))
        .set_json(serde_json::json!({
            "title": "Essay",
            "originalText": "Write 500 words",
            "steps": [{"title": "Draft", "description": "Write it."}]
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let id: Uuid = serde_json::from_value(body["id"].clone()).unwrap();

    let steps = harness.state.steps.find_by_assignment_id(id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_number, 1);
}
