use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moderator::classifier::{Category, ClassificationError, Classifier, HttpClassifier};
use moderator::download::LocalResource;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\npixels";

async fn resource(dir: &std::path::Path) -> LocalResource {
    LocalResource::write(dir, "png", "image/png", PNG).await.unwrap()
}

#[tokio::test]
async fn posts_image_and_parses_scores() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/classify"))
        .and(query_param("model", "mobilenet_v2_140_224"))
        .and(header("content-type", "image/png"))
        .and(body_bytes(PNG))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "drawings": 0.02, "hentai": 0.01, "neutral": 0.9, "porn": 0.05, "sexy": 0.02
        })))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(
        &format!("{}/v1/classify", server.uri()),
        "mobilenet_v2_140_224",
    )
    .unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let scores = classifier.classify(&resource(scratch.path()).await).await.unwrap();

    assert_eq!(scores.get(Category::Neutral), Some(0.9));
    assert_eq!(scores.get(Category::Porn), Some(0.05));
}

#[tokio::test]
async fn unwraps_path_keyed_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "/models/input/img.png": { "porn": 0.8, "sexy": 0.1, "hentai": 0.0 }
        })))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(&server.uri(), "m").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let scores = classifier.classify(&resource(scratch.path()).await).await.unwrap();

    assert_eq!(scores.get(Category::Porn), Some(0.8));
}

#[tokio::test]
async fn server_errors_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(&server.uri(), "m").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let err = classifier
        .classify(&resource(scratch.path()).await)
        .await
        .unwrap_err();

    assert!(matches!(err, ClassificationError::Status { status: 500, ref body } if body == "out of memory"));
}

#[tokio::test]
async fn non_json_bodies_are_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(&server.uri(), "m").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let err = classifier
        .classify(&resource(scratch.path()).await)
        .await
        .unwrap_err();

    assert!(matches!(err, ClassificationError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() {
    // Nothing listens on the discard port
    let classifier = HttpClassifier::new("http://127.0.0.1:9/classify", "m").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let err = classifier
        .classify(&resource(scratch.path()).await)
        .await
        .unwrap_err();

    assert!(matches!(err, ClassificationError::Unavailable(_)));
}

#[test]
fn invalid_endpoint_is_refused() {
    assert!(HttpClassifier::new("not a url", "m").is_err());
}
