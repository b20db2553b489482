//! HTTP-level tests for the upload and predict routes, with the remote
//! services replaced by in-process fakes.

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redesigner::AppState;
use redesigner::errors::RedesignError;
use redesigner::handlers::{self, NSFW_REJECTION_MESSAGE};
use redesigner::models::*;
use redesigner::services::rate_limiter::InMemoryWindowStore;
use redesigner::services::replicate_service::{PollPolicy, PredictionBackend};
use redesigner::services::safety_classifier::{ClassificationModel, ModelLoader};
use redesigner::services::{FileHost, GenerationService, RateLimiter, SafetyClassifier};

const BOUNDARY: &str = "----redesignerboundary";

struct FakeHost {
    hosted: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl FileHost for FakeHost {
    async fn host(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, RedesignError> {
        self.hosted
            .lock()
            .unwrap()
            .push((file_name.to_string(), content_type.to_string(), data.len()));
        Ok(format!("https://upcdn.io/W142hJk/raw/uploads/{}", file_name))
    }
}

struct FixedModel {
    porn: f32,
}

#[async_trait]
impl ClassificationModel for FixedModel {
    async fn classify(
        &self,
        _image: &[u8],
        _top_k: usize,
    ) -> Result<Vec<ClassificationPrediction>, RedesignError> {
        Ok(vec![
            ClassificationPrediction::new("Neutral", 1.0 - self.porn),
            ClassificationPrediction::new("Porn", self.porn),
        ])
    }
}

struct FakeLoader {
    porn: Option<f32>,
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self) -> Result<Arc<dyn ClassificationModel>, RedesignError> {
        match self.porn {
            Some(porn) => Ok(Arc::new(FixedModel { porn })),
            None => Err(RedesignError::ModelLoad("model host unreachable".into())),
        }
    }
}

struct FakeReplicate {
    final_status: PredictionStatus,
    creates: AtomicUsize,
}

#[async_trait]
impl PredictionBackend for FakeReplicate {
    async fn create_prediction(
        &self,
        _body: &CreatePrediction,
    ) -> Result<Prediction, RedesignError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Prediction {
            id: "p1".into(),
            status: PredictionStatus::Starting,
            output: None,
            error: None,
        })
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, RedesignError> {
        Ok(Prediction {
            id: id.to_string(),
            status: self.final_status.clone(),
            output: Some(vec!["a".into(), "b".into()]),
            error: None,
        })
    }
}

struct Harness {
    state: AppState,
    host: Arc<FakeHost>,
    replicate: Arc<FakeReplicate>,
}

fn harness(porn: Option<f32>, final_status: PredictionStatus, rate_limited: bool) -> Harness {
    let host = Arc::new(FakeHost {
        hosted: Mutex::new(Vec::new()),
    });
    let replicate = Arc::new(FakeReplicate {
        final_status,
        creates: AtomicUsize::new(0),
    });
    let rate_limiter = if rate_limited {
        RateLimiter::new(Arc::new(InMemoryWindowStore::new()), 5, Duration::from_secs(30))
    } else {
        RateLimiter::disabled(5, Duration::from_secs(30))
    };

    let state = AppState {
        rate_limiter: Arc::new(rate_limiter),
        generation: Arc::new(GenerationService::new(
            replicate.clone(),
            "v-test".into(),
            PollPolicy {
                interval: Duration::from_millis(1),
                max_attempts: 5,
            },
        )),
        classifier: Arc::new(SafetyClassifier::new(Arc::new(FakeLoader { porn }))),
        file_host: host.clone(),
        allowed_image_hosts: Arc::new(vec!["upcdn.io".into()]),
        trust_proxy_headers: false,
    };

    Harness {
        state,
        host,
        replicate,
    }
}

fn multipart_body(files: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, mime, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                 Content-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(files: &[(&str, &str, &str)]) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/upload")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(files))
}

fn room_request() -> GenerationRequest {
    GenerationRequest {
        image_url: "https://upcdn.io/W142hJk/raw/uploads/photo.jpg".into(),
        room_type: Some("Living Room".into()),
        room_theme: Some("Modern".into()),
        ..Default::default()
    }
}

#[actix_web::test]
async fn upload_accepts_safe_image() {
    let h = harness(Some(0.01), PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        upload_request(&[("photo.png", "image/png", "PNGDATA")]).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let uploaded: UploadedFile = test::read_body_json(resp).await;
    assert_eq!(uploaded.original_file_name, "photo.png");
    assert_eq!(uploaded.hosted_url, "https://upcdn.io/W142hJk/raw/uploads/photo.png");
    assert_eq!(
        h.host.hosted.lock().unwrap().as_slice(),
        &[("photo.png".to_string(), "image/png".to_string(), 7)]
    );
}

#[actix_web::test]
async fn upload_rejects_nsfw_image_before_hosting() {
    let h = harness(Some(0.9), PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        upload_request(&[("photo.jpg", "image/jpeg", "JPEG")]).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], NSFW_REJECTION_MESSAGE);
    assert!(h.host.hosted.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn upload_fails_closed_without_model() {
    let h = harness(None, PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        upload_request(&[("photo.jpg", "image/jpeg", "JPEG")]).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(h.host.hosted.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn upload_enforces_type_and_count() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let gif = test::call_service(
        &app,
        upload_request(&[("anim.gif", "image/gif", "GIF89a")]).to_request(),
    )
    .await;
    assert_eq!(gif.status(), StatusCode::BAD_REQUEST);

    let two = test::call_service(
        &app,
        upload_request(&[("a.png", "image/png", "A"), ("b.png", "image/png", "B")]).to_request(),
    )
    .await;
    assert_eq!(two.status(), StatusCode::BAD_REQUEST);

    let none = test::call_service(&app, upload_request(&[]).to_request()).await;
    assert_eq!(none.status(), StatusCode::BAD_REQUEST);
    assert!(h.host.hosted.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn predict_returns_final_output() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    for route in ["/predict", "/restore"] {
        let req = test::TestRequest::post()
            .uri(route)
            .set_json(room_request())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("x-ratelimit-limit").is_none());

        let result: PredictionResult = test::read_body_json(resp).await;
        assert_eq!(result.predicted_image_url, "b");
    }
}

#[actix_web::test]
async fn sixth_predict_in_window_is_rate_limited() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, true);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    for expected_remaining in (0..5).rev() {
        let req = test::TestRequest::post()
            .uri("/predict")
            .peer_addr("203.0.113.7:40000".parse().unwrap())
            .set_json(room_request())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(
            resp.headers().get("x-ratelimit-remaining").unwrap(),
            expected_remaining.to_string().as_str()
        );
    }

    let req = test::TestRequest::post()
        .uri("/predict")
        .peer_addr("203.0.113.7:40001".parse().unwrap())
        .set_json(room_request())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(h.replicate.creates.load(Ordering::SeqCst), 5);

    let other = test::TestRequest::post()
        .uri("/predict")
        .peer_addr("198.51.100.1:40000".parse().unwrap())
        .set_json(room_request())
        .to_request();
    assert_eq!(test::call_service(&app, other).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn rotating_forwarded_for_does_not_reset_the_limit() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, true);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let mut statuses = Vec::new();
    for i in 0..8 {
        let req = test::TestRequest::post()
            .uri("/predict")
            .peer_addr("203.0.113.7:40000".parse().unwrap())
            .insert_header(("x-forwarded-for", format!("10.9.8.{}", i)))
            .set_json(room_request())
            .to_request();
        statuses.push(test::call_service(&app, req).await.status());
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
    assert!(statuses[5..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(h.replicate.creates.load(Ordering::SeqCst), 5);
}

#[actix_web::test]
async fn forwarded_for_is_the_key_behind_a_trusted_proxy() {
    let mut h = harness(Some(0.0), PredictionStatus::Succeeded, true);
    h.state.trust_proxy_headers = true;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let from = |client: &str| {
        test::TestRequest::post()
            .uri("/predict")
            .peer_addr("10.0.0.1:8000".parse().unwrap())
            .insert_header(("x-forwarded-for", client.to_string()))
            .set_json(room_request())
            .to_request()
    };

    for _ in 0..5 {
        assert_eq!(test::call_service(&app, from("198.51.100.4")).await.status(), StatusCode::OK);
    }
    assert_eq!(
        test::call_service(&app, from("198.51.100.4")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(test::call_service(&app, from("198.51.100.5")).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn invalid_predict_requests_do_not_use_quota() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, true);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let peer: std::net::SocketAddr = "203.0.113.9:5000".parse().unwrap();
    let unstyled = GenerationRequest {
        image_url: room_request().image_url,
        ..Default::default()
    };
    for _ in 0..10 {
        let req = test::TestRequest::post()
            .uri("/predict")
            .peer_addr(peer)
            .set_json(unstyled.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    let req = test::TestRequest::post()
        .uri("/predict")
        .peer_addr(peer)
        .set_json(room_request())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "4");
}

#[actix_web::test]
async fn predict_rejects_foreign_image_urls_and_missing_style() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let mut foreign = room_request();
    foreign.image_url = "https://example.com/photo.jpg".into();
    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/predict").set_json(foreign).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let unstyled = GenerationRequest {
        image_url: room_request().image_url,
        ..Default::default()
    };
    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/predict").set_json(unstyled).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.replicate.creates.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn failed_generation_is_a_bad_gateway() {
    let h = harness(Some(0.0), PredictionStatus::Failed, false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/predict").set_json(room_request()).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Generation failed");
}

#[actix_web::test]
async fn health_reports_rate_limit_mode() {
    let h = harness(Some(0.0), PredictionStatus::Succeeded, true);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.state.clone()))
            .configure(handlers::configure),
    )
    .await;

    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rateLimiting"], "enabled");
}

#[actix_web::test]
async fn client_uploads_and_predicts_against_running_server() {
    use redesigner::client::{RedesignClient, RedesignSession, Style};

    let h = harness(Some(0.01), PredictionStatus::Succeeded, false);
    let state = h.state.clone();
    let server = actix_web::HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("photo.jpg");
    std::fs::write(&photo, [0xffu8, 0xd8, 0xff, 0xe0]).unwrap();

    let client = RedesignClient::new(&format!("http://{}", addr));
    let mut session = RedesignSession::new(Style::Room {
        room_type: "Living Room".into(),
        theme: "Modern".into(),
    });

    let uploaded = client.upload(&photo).await.unwrap();
    assert_eq!(uploaded.original_file_name, "photo.jpg");
    session.accept_upload(uploaded);

    let request = session.generation_request().unwrap();
    let url = client.predict(&request).await.unwrap();
    assert_eq!(url, "b");
    assert_eq!(session.download_name().unwrap(), "photo-modern-living-room.jpg");
    assert_eq!(h.host.hosted.lock().unwrap().len(), 1);
}
