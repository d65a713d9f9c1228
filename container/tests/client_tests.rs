//! DockerClient tests against a mock Engine API on a Unix socket.

use quay_container::{ContainerRuntime, CreateSpec, DockerClient, Error, HostConfig, ListFilter};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

/// Answer one connection per canned response and return the requests seen.
fn serve(socket: &Path, responses: Vec<String>) -> JoinHandle<Vec<String>> {
    let listener = UnixListener::bind(socket)
        .unwrap_or_else(|e| panic!("bind {}: {e}", socket.display()));
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            seen.push(String::from_utf8_lossy(&buf[..n]).to_string());
            let _ = stream.write_all(response.as_bytes()).await;
        }
        seen
    })
}

fn json(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

mod inspect {
    use super::*;

    #[tokio::test]
    async fn test_inspect_parses_handle() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let server = serve(
            &sock,
            vec![json(
                "200 OK",
                r#"{"Id":"c0ffee","Name":"/console","Config":{"Image":"quay/console"}}"#,
            )],
        );

        let client = DockerClient::new(&sock);
        let handle = client.inspect("console").await.unwrap();
        assert_eq!(handle.id, "c0ffee");
        assert_eq!(handle.image, "quay/console");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /containers/console/json HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_inspect_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let _server = serve(
            &sock,
            vec![json("404 Not Found", r#"{"message":"No such container: reboot"}"#)],
        );

        let err = DockerClient::new(&sock).inspect("reboot").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = DockerClient::new(dir.path().join("absent.sock"))
            .inspect("x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_create_sends_spec() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let server = serve(
            &sock,
            vec![json("201 Created", r#"{"Id":"new1","Warnings":[]}"#)],
        );

        let spec = CreateSpec {
            name: "reboot".to_string(),
            image: "quay/console".to_string(),
            command: vec!["reboot".to_string(), "-f".to_string()],
            env: vec!["IN_DOCKER=true".to_string()],
            host_config: HostConfig {
                pid_mode: "host".to_string(),
                volumes_from: vec!["c0ffee".to_string()],
                privileged: true,
            },
        };
        let handle = DockerClient::new(&sock).create(&spec).await.unwrap();
        assert_eq!(handle.id, "new1");
        assert_eq!(handle.name, "reboot");

        let request = &server.await.unwrap()[0];
        assert!(request.starts_with("POST /containers/create?name=reboot HTTP/1.1"));
        assert!(request.contains(r#""Privileged":true"#));
        assert!(request.contains(r#""VolumesFrom":["c0ffee"]"#));
        assert!(request.contains(r#""Env":["IN_DOCKER=true"]"#));
    }

    #[tokio::test]
    async fn test_stop_wait_remove() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let server = serve(
            &sock,
            vec![
                "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n".to_string(),
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0f\r\n{\"StatusCode\":3\r\n01\r\n}\r\n0\r\n\r\n"
                    .to_string(),
                "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n".to_string(),
            ],
        );

        let client = DockerClient::new(&sock);
        client.stop("ntp", 7).await.unwrap();
        assert_eq!(client.wait("ntp").await.unwrap().status_code, 3);
        client.remove("ntp").await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /containers/ntp/stop?t=7 "));
        assert!(requests[1].starts_with("POST /containers/ntp/wait "));
        assert!(requests[2].starts_with("DELETE /containers/ntp "));
    }

    #[tokio::test]
    async fn test_start_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let _server = serve(
            &sock,
            vec![json("500 Internal Server Error", r#"{"message":"cannot start"}"#)],
        );

        let err = DockerClient::new(&sock).start("x").await.unwrap_err();
        assert_eq!(err.to_string(), "Container runtime error (HTTP 500): cannot start");
    }
}

mod list {
    use super::*;

    #[tokio::test]
    async fn test_list_running_filter() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let server = serve(
            &sock,
            vec![json(
                "200 OK",
                r#"[{"Id":"a","Names":["/ntp"],"Image":"ntp"},{"Id":"b","Names":["/udev"],"Image":"udev"}]"#,
            )],
        );

        let containers = DockerClient::new(&sock)
            .list(&ListFilter::running())
            .await
            .unwrap();
        let ids: Vec<_> = containers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let request = &server.await.unwrap()[0];
        assert!(request.starts_with("GET /containers/json?all=1&filters="));
        assert!(request.contains("running"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_from_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("docker.sock");
        let _server = serve(
            &sock,
            vec![json("200 OK", r#"[{"Id":"a","Names":["/ntp"],"Image":"ntp"}]"#)],
        );

        let client = DockerClient::new(&sock);
        let containers = tokio::spawn(async move { client.list(&ListFilter::running()).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "ntp");
    }
}
