use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use capsule_api::auth::{AppState, AppStateInner};
use capsule_api::storage::BlobStore;
use capsule_client::{Attachment, CapsuleClient, ClientError, Credentials, NewCapsule};
use capsule_db::Database;

struct Server {
    addr: SocketAddr,
    _dir: TempDir,
}

async fn spawn_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open(&dir.path().join("capsules.db")).unwrap(),
        blobs: BlobStore::new(dir.path().join("uploads")).await.unwrap(),
        jwt_secret: "e2e-secret".into(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = capsule_api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server { addr, _dir: dir }
}

fn client_for(server: &Server) -> CapsuleClient {
    CapsuleClient::new(format!("http://{}", server.addr))
}

fn api_status(err: ClientError) -> u16 {
    match err {
        ClientError::Api { status, .. } => status,
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn owner_and_stranger_see_the_gate() {
    let server = spawn_server().await;
    let client = client_for(&server);

    let alice = client.register("alice", "alice@example.com", "password1").await.unwrap();
    let bob = client.register("bob", "bob@example.com", "password2").await.unwrap();

    let capsule = client
        .create_capsule(
            &alice,
            NewCapsule {
                title: "For later".into(),
                message: Some("hello future".into()),
                unlock_at: Utc::now() + Duration::days(365),
                files: vec![Attachment {
                    filename: "note.txt".into(),
                    mime_type: "text/plain".into(),
                    data: b"abc".to_vec(),
                }],
            },
        )
        .await
        .unwrap();
    assert_eq!(capsule.files.len(), 1);
    assert!(!capsule.unlocked);

    let err = client.get_capsule(&bob, capsule.id).await.unwrap_err();
    assert_eq!(api_status(err), 403);

    let fetched = client.get_capsule(&alice, capsule.id).await.unwrap();
    assert_eq!(fetched.message.as_deref(), Some("hello future"));

    let bytes = client.download_file(&alice, capsule.id, 0).await.unwrap();
    assert_eq!(bytes.as_ref(), b"abc");

    let err = client.download_file(&bob, capsule.id, 0).await.unwrap_err();
    assert_eq!(api_status(err), 403);

    let err = client.delete_capsule(&bob, capsule.id).await.unwrap_err();
    assert_eq!(api_status(err), 401);

    let msg = client.delete_capsule(&alice, capsule.id).await.unwrap();
    assert_eq!(msg, "Time Capsule removed successfully");

    let err = client.get_capsule(&alice, capsule.id).await.unwrap_err();
    assert_eq!(api_status(err), 404);
}

#[tokio::test]
async fn unlocked_capsule_is_readable_by_anyone() {
    let server = spawn_server().await;
    let client = client_for(&server);

    let alice = client.register("alice", "alice@example.com", "password1").await.unwrap();
    let bob = client.register("bob", "bob@example.com", "password2").await.unwrap();

    let capsule = client
        .create_capsule(
            &alice,
            NewCapsule {
                title: "Already open".into(),
                message: None,
                unlock_at: Utc::now() - Duration::minutes(1),
                files: Vec::new(),
            },
        )
        .await
        .unwrap();

    let seen = client.get_capsule(&bob, capsule.id).await.unwrap();
    assert!(seen.unlocked);
    assert_eq!(seen.title, "Already open");

    let listed = client.list_capsules(&alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(client.list_capsules(&bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn login_and_profile_round_trip() {
    let server = spawn_server().await;
    let client = client_for(&server);

    client.register("carol", "Carol@Example.com", "password3").await.unwrap();
    let creds = client.login("carol@example.com", "password3").await.unwrap();

    let profile = client.current_user(&creds).await.unwrap();
    assert_eq!(profile.username, "carol");
    assert_eq!(profile.email, "carol@example.com");

    let err = client.login("carol@example.com", "wrong-pass").await.unwrap_err();
    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid Credentials");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn bad_token_and_validation_errors_surface() {
    let server = spawn_server().await;
    let client = client_for(&server);

    let err = client
        .list_capsules(&Credentials::new("not-a-token"))
        .await
        .unwrap_err();
    assert_eq!(api_status(err), 401);

    let creds = client.register("dave", "dave@example.com", "password4").await.unwrap();
    let err = client
        .create_capsule(
            &creds,
            NewCapsule {
                title: "   ".into(),
                message: None,
                unlock_at: Utc::now(),
                files: Vec::new(),
            },
        )
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.starts_with("title:"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = client.get_capsule(&creds, Uuid::new_v4()).await.unwrap_err();
    assert_eq!(api_status(err), 404);
}
