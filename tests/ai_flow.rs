mod common;

use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, uuid_field, FakeProvider, TestApp, FAKE_PROVIDER};
use diesel::prelude::*;
use leadhub::ai::prompts::activate_prompt;
use leadhub::ai::{AiError, ChatMessage};
use leadhub::schema::{ai_prompts, jobs, person_attributes};
use leadhub::{default_handlers, Worker};
use serde_json::{json, Value};
use uuid::Uuid;

const PASSWORD: &str = "correct horse battery";

struct Fixture {
    app: TestApp,
    token: String,
    company: Uuid,
    person: Uuid,
}

async fn fixture() -> Result<Fixture> {
    let app = TestApp::new().await?;
    let account = app.register("coachee@example.com", PASSWORD).await?;
    let token = account.access_token;
    let company = app.create_company(&token, "Vandelay Industries").await?;
    let person = app.create_person(&token, company, "Art Vandelay").await?;
    Ok(Fixture {
        app,
        token,
        company,
        person,
    })
}

impl Fixture {
    async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        let response = self
            .app
            .post_json(
                &format!("/companies/{}{path}", self.company),
                &body,
                Some(&self.token),
            )
            .await?;
        let status = response.status();
        Ok((status, body_json(response).await?))
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let response = self
            .app
            .get(&format!("/companies/{}{path}", self.company), Some(&self.token))
            .await?;
        let status = response.status();
        Ok((status, body_json(response).await?))
    }

    async fn note(&self, content: &str) -> Result<Uuid> {
        let note = self
            .app
            .create_note(&self.token, self.company, self.person, "observation", content)
            .await?;
        uuid_field(&note, "id")
    }
}

fn keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn coach_chat_records_usage_and_conversation() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    f.app.provider.reply_with("Ask open questions.");

    let (status, body) = f.post("/ai/chat", json!({ "message": "How do I run a 1:1?" })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Ask open questions.");
    assert_eq!(keys(&body), vec!["response", "usage_id"]);
    let usage_id = uuid_field(&body, "usage_id")?;

    let calls = f.app.provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 2);
    assert_eq!(calls[0][1], ChatMessage::user("How do I run a 1:1?"));

    let rows = f.app.usage_rows().await?;
    assert_eq!(rows.len(), 1);
    let (uuid, request_type, input, output, total, cost) = rows[0].clone();
    let expected = FakeProvider::expected_usage();
    assert_eq!(uuid, usage_id);
    assert_eq!(request_type, "chat");
    assert_eq!(input as u32, expected.input_tokens);
    assert_eq!(output as u32, expected.output_tokens);
    assert_eq!(total, input + output);
    // 1200 input at 2.5/M plus 300 output at 10/M.
    assert!((cost - 0.006).abs() < 1e-9, "cost was {cost}");
    assert_eq!(f.app.conversation_count().await?, 1);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn person_chat_sends_context_about_the_person() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    f.post(
        &format!("/people/{}/notes", f.person),
        json!({ "note_type": "one_on_one", "content": "Wants to lead the import team" }),
    )
    .await?;
    let response = f
        .app
        .put_json(
            &format!("/companies/{}/people/{}/attributes", f.company, f.person),
            &json!({ "attributes": { "hobby": "architecture" } }),
            Some(&f.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = f
        .post(
            &format!("/people/{}/ai/chat", f.person),
            json!({ "message": "What should we discuss next?" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let calls = f.app.provider.calls();
    let messages = calls.last().ok_or_else(|| anyhow!("provider was not called"))?;
    assert_eq!(messages.len(), 3);
    let context = &messages[1].content;
    assert!(context.starts_with("CONTEXT ABOUT Art Vandelay:"));
    assert!(context.contains("- hobby: architecture"));
    assert!(context.contains("Wants to lead the import team"));
    assert!(context.contains("LAST 1:1 MEETING:"));

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failing_usage_write_does_not_change_the_reply() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    let request = json!({ "message": "Give me a tip" });

    let (healthy_status, healthy) = f.post("/ai/chat", request.clone()).await?;

    f.app
        .execute_sql(
            "ALTER TABLE ai_usage_trackers ADD CONSTRAINT reject_all CHECK (false) NOT VALID",
        )
        .await?;
    let (status, degraded) = f.post("/ai/chat", request).await?;

    assert_eq!(status, healthy_status);
    assert_eq!(degraded["response"], healthy["response"]);
    assert_eq!(keys(&degraded), keys(&healthy));
    uuid_field(&degraded, "usage_id")?;
    assert_eq!(f.app.usage_rows().await?.len(), 1);
    assert_eq!(f.app.conversation_count().await?, 1);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn provider_failure_surfaces_and_records_nothing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    f.app
        .provider
        .fail_next(AiError::RequestFailed("HTTP 500".into()));

    let (status, body) = f.post("/ai/chat", json!({ "message": "Hello?" })).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "provider_error");
    assert!(f.app.usage_rows().await?.is_empty());

    let (status, _) = f.post("/ai/chat", json!({ "message": "   " })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = f
        .post("/ai/chat", json!({ "message": "Hi", "provider": "nobody" }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = f
        .post("/ai/chat", json!({ "message": "Hi", "provider": FAKE_PROVIDER }))
        .await?;
    assert_eq!(status, StatusCode::OK);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unconfigured_ai_answers_service_unavailable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::without_ai().await?;
    let account = app.register("noai@example.com", PASSWORD).await?;
    let company = app.create_company(&account.access_token, "Offline").await?;

    let response = app
        .post_json(
            &format!("/companies/{company}/ai/chat"),
            &json!({ "message": "Anyone there?" }),
            Some(&account.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unreadable_extraction_output_yields_no_attributes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    let note = f.note("Mentioned a new puppy").await?;
    f.app.provider.reply_with("not json at all");

    let (status, body) = f.post(&format!("/notes/{note}/ai/extract"), json!({})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attributes"], json!({}));
    let usage_id = uuid_field(&body, "usage_id")?;

    let rows = f.app.usage_rows().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, usage_id);
    assert_eq!(rows[0].1, "extraction");

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn extraction_upserts_attributes_from_the_note() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    let response = f
        .app
        .put_json(
            &format!("/companies/{}/people/{}/attributes", f.company, f.person),
            &json!({ "attributes": { "kids": "1", "role": "importer" } }),
            Some(&f.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let note = f.note("Second kid arrived, still loves latex").await?;
    f.app
        .provider
        .reply_with("```json\n{\"kids\": 2, \"interest\": \"latex\"}\n```");

    let (status, body) = f.post(&format!("/notes/{note}/ai/extract"), json!({})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attributes"], json!({ "interest": "latex", "kids": "2" }));

    let (_, attributes) = f.get(&format!("/people/{}/attributes", f.person)).await?;
    let by_key = |key: &str| -> Value {
        attributes
            .as_array()
            .unwrap()
            .iter()
            .find(|attribute| attribute["key"] == key)
            .cloned()
            .unwrap_or(Value::Null)
    };
    assert_eq!(by_key("kids")["value"], "2");
    assert_eq!(by_key("kids")["source"], "ai_extracted");
    assert_eq!(by_key("kids")["source_note_id"], note.to_string());
    assert_eq!(by_key("role")["source"], "manual");

    let (status, _) = f
        .post(&format!("/notes/{}/ai/extract", Uuid::new_v4()), json!({}))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn worker_runs_queued_extraction() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;
    f.app.provider.reply_with("{\"sport\": \"golf\"}");
    f.note("Played golf with the team").await?;

    let worker = Worker::new(f.app.state.clone(), default_handlers(), Duration::from_millis(10));
    assert!(worker.tick().await?);
    assert!(!worker.tick().await?);

    let (statuses, values) = f
        .app
        .with_conn(|conn| {
            let statuses: Vec<String> = jobs::table.select(jobs::status).load(conn)?;
            let values: Vec<String> = person_attributes::table
                .filter(person_attributes::key.eq("sport"))
                .select(person_attributes::value)
                .load(conn)?;
            Ok((statuses, values))
        })
        .await?;
    assert_eq!(statuses, vec!["succeeded".to_string()]);
    assert_eq!(values, vec!["golf".to_string()]);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn usage_report_and_feedback() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let f = fixture().await?;

    let (_, first) = f.post("/ai/chat", json!({ "message": "One" })).await?;
    let (_, second) = f.post("/ai/chat", json!({ "message": "Two" })).await?;
    let first_id = uuid_field(&first, "usage_id")?;

    let (status, body) = f
        .post(
            &format!("/ai/usage/{first_id}/feedback"),
            json!({ "feedback": "helpful", "comment": "spot on" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["feedback"], "helpful");
    assert_eq!(body["feedback_comment"], "spot on");

    let second_id = uuid_field(&second, "usage_id")?;
    let (status, _) = f
        .post(
            &format!("/ai/usage/{second_id}/feedback"),
            json!({ "feedback": "not_helpful" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = f.get("/ai/usage").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["period"], "month");
    assert_eq!(report["total_requests"], 2);
    assert_eq!(
        report["total_tokens"],
        2 * FakeProvider::expected_usage().total_tokens
    );
    assert_eq!(report["helpful_count"], 1);
    assert_eq!(report["unhelpful_count"], 1);

    let (status, all) = f.get("/ai/usage?period=all").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total_requests"], 2);

    let (status, _) = f.get("/ai/usage?period=decade").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = f
        .post(
            &format!("/ai/usage/{}/feedback", Uuid::new_v4()),
            json!({ "feedback": "helpful" }),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = f
        .post(
            &format!("/ai/usage/{first_id}/feedback"),
            json!({ "feedback": "meh" }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    f.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_activations_leave_one_active_prompt() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let candidates: Vec<i64> = app
        .with_conn(|conn| {
            let ids = diesel::insert_into(ai_prompts::table)
                .values(&vec![
                    (
                        ai_prompts::prompt_type.eq("leadership_coach"),
                        ai_prompts::version.eq(2),
                        ai_prompts::prompt_text.eq("Coach, second edition"),
                    ),
                    (
                        ai_prompts::prompt_type.eq("leadership_coach"),
                        ai_prompts::version.eq(3),
                        ai_prompts::prompt_text.eq("Coach, third edition"),
                    ),
                ])
                .returning(ai_prompts::id)
                .get_results(conn)?;
            Ok(ids)
        })
        .await?;

    let mut handles = Vec::new();
    for round in 0..6 {
        let pool = app.state.pool.clone();
        let prompt_id = candidates[round % candidates.len()];
        handles.push(tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            activate_prompt(&mut conn, prompt_id)?;
            Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let active: Vec<i64> = app
        .with_conn(|conn| {
            Ok(ai_prompts::table
                .filter(ai_prompts::prompt_type.eq("leadership_coach"))
                .filter(ai_prompts::is_active.eq(true))
                .select(ai_prompts::id)
                .load(conn)?)
        })
        .await?;
    assert_eq!(active.len(), 1);
    assert!(candidates.contains(&active[0]));

    let extraction_active: i64 = app
        .with_conn(|conn| {
            Ok(ai_prompts::table
                .filter(ai_prompts::prompt_type.eq("attribute_extraction"))
                .filter(ai_prompts::is_active.eq(true))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(extraction_active, 1);

    app.cleanup().await?;
    Ok(())
}
