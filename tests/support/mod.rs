#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use pdfchat::AppConfig;

const DIM: usize = 32;

/// In-memory stand-in for the Ollama and Qdrant HTTP APIs.
#[derive(Clone, Default)]
pub struct FakeServices {
    collections: Arc<Mutex<HashMap<String, HashMap<String, (Vec<f32>, Value)>>>>,
    chat_calls: Arc<Mutex<usize>>,
}

impl FakeServices {
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|points| points.len())
            .unwrap_or(0)
    }

    pub fn owner_point_count(&self, collection: &str, owner: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|points| {
                points
                    .values()
                    .filter(|(_, payload)| payload["owner"] == owner)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn chat_calls(&self) -> usize {
        *self.chat_calls.lock().unwrap()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/embed", post(embed))
            .route("/api/chat", post(chat))
            .route(
                "/collections/:name",
                get(get_collection).put(create_collection),
            )
            .route("/collections/:name/index", put(create_index))
            .route("/collections/:name/points", put(upsert_points))
            .route("/collections/:name/points/search", post(search_points))
            .route("/collections/:name/points/delete", post(delete_points))
            .with_state(self.clone())
    }
}

/// Word-bucket embedding: texts sharing words point the same way.
pub fn fake_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        let bucket = word.bytes().fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        vector[bucket % DIM] += 1.0;
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

async fn embed(Json(body): Json<Value>) -> Json<Value> {
    let input = body["input"].as_str().unwrap_or_default();
    Json(json!({ "embeddings": [fake_embedding(input)] }))
}

async fn chat(State(fake): State<FakeServices>, Json(body): Json<Value>) -> Json<Value> {
    *fake.chat_calls.lock().unwrap() += 1;

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let has_tools = body
        .get("tools")
        .and_then(|t| t.as_array())
        .is_some_and(|t| !t.is_empty());
    let last_tool = messages
        .iter()
        .rev()
        .find(|m| m["role"] == "tool")
        .and_then(|m| m["content"].as_str());
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m["role"] == "user")
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();

    let message = match (has_tools, last_tool) {
        (true, None) => json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"function": {"name": "search_knowledge_base", "arguments": {"query": last_user}}}
            ]
        }),
        (_, Some(found)) => json!({
            "role": "assistant",
            "content": format!("From the document: {found}")
        }),
        (false, None) => json!({
            "role": "assistant",
            "content": format!("From the prompt: {last_user}")
        }),
    };

    Json(json!({ "message": message, "done": true }))
}

async fn get_collection(
    State(fake): State<FakeServices>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if fake.collections.lock().unwrap().contains_key(&name) {
        (StatusCode::OK, Json(json!({ "result": { "status": "green" } })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": { "error": "Not found" } })),
        )
    }
}

async fn create_collection(
    State(fake): State<FakeServices>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let mut collections = fake.collections.lock().unwrap();
    if collections.contains_key(&name) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "status": { "error": "already exists" } })),
        );
    }
    collections.insert(name, HashMap::new());
    (StatusCode::OK, Json(json!({ "result": true })))
}

async fn create_index(Path(_name): Path<String>) -> Json<Value> {
    Json(json!({ "result": { "status": "completed" } }))
}

/// Applies a Qdrant `{"must": [{"key", "match": {"value"}}]}` filter to a payload.
fn matches_filter(filter: &Value, payload: &Value) -> bool {
    filter["must"]
        .as_array()
        .map(|conditions| {
            conditions.iter().all(|condition| {
                let key = condition["key"].as_str().unwrap_or_default();
                payload[key] == condition["match"]["value"]
            })
        })
        .unwrap_or(true)
}

async fn delete_points(
    State(fake): State<FakeServices>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut collections = fake.collections.lock().unwrap();
    let Some(points) = collections.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "status": "missing" })));
    };

    points.retain(|_, (_, payload)| !matches_filter(&body["filter"], payload));
    (StatusCode::OK, Json(json!({ "result": { "status": "completed" } })))
}

async fn upsert_points(
    State(fake): State<FakeServices>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut collections = fake.collections.lock().unwrap();
    let Some(points) = collections.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "status": "missing" })));
    };

    for point in body["points"].as_array().cloned().unwrap_or_default() {
        let id = point["id"].as_str().unwrap_or_default().to_string();
        let vector: Vec<f32> = point["vector"]
            .as_array()
            .map(|v| v.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
            .unwrap_or_default();
        points.insert(id, (vector, point["payload"].clone()));
    }

    (StatusCode::OK, Json(json!({ "result": { "status": "completed" } })))
}

async fn search_points(
    State(fake): State<FakeServices>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let collections = fake.collections.lock().unwrap();
    let Some(points) = collections.get(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "status": "missing" })));
    };

    let query: Vec<f32> = body["vector"]
        .as_array()
        .map(|v| v.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default();
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;

    let mut scored: Vec<(f32, &String, &Value)> = points
        .iter()
        .filter(|(_, (_, payload))| matches_filter(&body["filter"], payload))
        .map(|(id, (vector, payload))| (cosine(&query, vector), id, payload))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let result: Vec<Value> = scored
        .into_iter()
        .take(limit)
        .map(|(score, id, payload)| json!({ "id": id, "score": score, "payload": payload }))
        .collect();

    (StatusCode::OK, Json(json!({ "result": result })))
}

pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Config pointing every collaborator at `services_url`, with data under `data_dir`.
pub fn test_config(services_url: &str, data_dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::from_env();
    config.data_dir = data_dir.path().to_path_buf();
    config.ollama_base_url = services_url.to_string();
    config.qdrant_base_url = services_url.to_string();
    config.qdrant_collection = "pdf_chatbot_test".to_string();
    config.knowledge.chunk_target_tokens = 40;
    config.knowledge.chunk_overlap_tokens = 5;
    config.knowledge.search_limit = 3;
    config.knowledge.recreate_collection = false;
    config.agent.search_knowledge = true;
    config.agent.markdown = true;
    config
}

pub fn manual_pages() -> Vec<pdfchat::models::PageText> {
    vec![
        pdfchat::models::PageText {
            page: Some(1),
            content: "Safety overview. Always disconnect the battery before servicing the engine."
                .to_string(),
        },
        pdfchat::models::PageText {
            page: Some(2),
            content: "Wheel installation. Tighten lug nuts with a torque wrench to 110 newton metres in a star pattern."
                .to_string(),
        },
        pdfchat::models::PageText {
            page: Some(3),
            content: "Warranty terms. Coverage lasts three years or sixty thousand kilometres."
                .to_string(),
        },
    ]
}

/// Builds a minimal PDF with one Helvetica text line per page.
pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    let font_id = 3 + 2 * page_count;
    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    let widths = vec!["500"; 95].join(" ");

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{kids}] /Count {page_count} >>"),
    ];
    for (i, text) in pages.iter().enumerate() {
        let stream = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {} 0 R >>",
            4 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{stream}\nendstream",
            stream.len()
        ));
    }
    objects.push(format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding \
         /FirstChar 32 /LastChar 126 /Widths [{widths}] >>"
    ));

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        xref.push_str(&format!("{offset:010} 00000 n \n"));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    out.extend_from_slice(xref.as_bytes());
    out
}

pub fn manual_pdf() -> Vec<u8> {
    let pages = manual_pages();
    let texts: Vec<&str> = pages.iter().map(|p| p.content.as_str()).collect();
    build_pdf(&texts)
}
