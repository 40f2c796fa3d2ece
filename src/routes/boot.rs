//! Boot script endpoint handler.
//!
//! GET /boot.ipxe?mac={mac}&arch={arch}&serial={serial}
//! Returns an iPXE script chosen by the boot decision service.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use macaddr::MacAddr6;
use serde::Deserialize;

use crate::bootconfig::{BootConfigRequest, BootConfigRetriever};
use crate::error::{AppError, AppResult};

/// Query parameters for the boot endpoint. Missing ones are empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BootQuery {
    pub mac: String,
    pub arch: String,
    pub serial: String,
}

/// Handle GET /boot.ipxe
///
/// Any resolution failure becomes a bare 404 so the firmware falls back
/// to its own retry loop.
pub async fn handle_boot_script(
    State(retriever): State<BootConfigRetriever>,
    Query(query): Query<BootQuery>,
) -> AppResult<Response> {
    let mac = normalize_mac(&query.mac);
    let BootQuery { arch, serial, .. } = query;

    tracing::info!(mac = %mac, serial = %serial, arch = %arch, "Sending boot request");

    let request = BootConfigRequest::new(mac.clone(), arch.clone(), serial.clone());
    let response = match retriever.resolve(request).await {
        Ok(response) => response,
        Err(source) => {
            tracing::error!(
                mac = %mac,
                serial = %serial,
                arch = %arch,
                endpoint = %retriever.endpoint(),
                error = %source,
                "Failed to get boot response"
            );
            return Err(AppError::Resolve { mac, source });
        }
    };

    tracing::info!(mac = %mac, serial = %serial, arch = %arch, "Transmitting boot response");

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        response.render_script(),
    )
        .into_response())
}

/// Canonical lowercase, colon separated form for anything that parses as a
/// MAC; other input is passed through trimmed so the decision service
/// still sees what the client sent.
fn normalize_mac(mac: &str) -> String {
    let mac = mac.trim();
    match mac.parse::<MacAddr6>() {
        Ok(parsed) => parsed.to_string().to_lowercase(),
        Err(_) => mac.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootconfig::test_support::StubClient;
    use crate::bootconfig::HttpDecisionClient;
    use crate::error::ResolveError;
    use crate::routes::create_router;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    mod normalize_mac_tests {
        use super::*;

        #[test]
        fn test_hyphen_and_case() {
            assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
            assert_eq!(normalize_mac(" aa:bb:cc:dd:ee:ff "), "aa:bb:cc:dd:ee:ff");
        }

        #[test]
        fn test_invalid_passes_through() {
            assert_eq!(normalize_mac("not-a-mac"), "not-a-mac");
            assert_eq!(normalize_mac(""), "");
        }
    }

    mod handler_tests {
        use super::*;

        #[tokio::test]
        async fn test_success_renders_script() {
            let stub = Arc::new(StubClient::new());
            let router = create_router(BootConfigRetriever::new(stub.clone()));

            let (status, content_type, body) =
                get(router, "/boot.ipxe?mac=aa:bb:cc:dd:ee:ff&arch=arm64&serial=42").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
            assert_eq!(
                body,
                "#!ipxe\nkernel vmlinuz-arm64 mac=aa:bb:cc:dd:ee:ff\ninitrd initrd.img\nboot"
            );
        }

        #[tokio::test]
        async fn test_failure_is_bare_404() {
            let stub = Arc::new(StubClient::failing(ResolveError::Transport(
                "connection refused".to_string(),
            )));
            let router = create_router(BootConfigRetriever::new(stub));

            let (status, _, body) = get(router, "/boot.ipxe?mac=aa:bb:cc:dd:ee:ff").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body.is_empty());
        }

        #[tokio::test]
        async fn test_missing_params_are_empty() {
            let stub = Arc::new(StubClient::new());
            let router = create_router(BootConfigRetriever::new(stub.clone()));

            let (status, _, body) = get(router, "/boot.ipxe").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "#!ipxe\nkernel vmlinuz- mac=\ninitrd initrd.img\nboot");
        }

        #[tokio::test]
        async fn test_mac_spellings_share_cache_entry() {
            let stub = Arc::new(StubClient::new());
            let router = create_router(BootConfigRetriever::new(stub.clone()));

            get(router.clone(), "/boot.ipxe?mac=AA-BB-CC-DD-EE-FF&arch=arm64").await;
            get(router, "/boot.ipxe?mac=aa:bb:cc:dd:ee:ff&arch=arm64").await;
            assert_eq!(stub.calls(), 1);
        }

        #[tokio::test]
        async fn test_unknown_route() {
            let router = create_router(BootConfigRetriever::new(Arc::new(StubClient::new())));
            let (status, _, _) = get(router, "/other").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
    }

    mod upstream_status_tests {
        use super::*;
        use axum::routing::post;

        #[tokio::test]
        async fn test_upstream_500_gives_404_and_is_not_cached() {
            let hits = Arc::new(AtomicUsize::new(0));
            let upstream = {
                let hits = hits.clone();
                axum::Router::new().route(
                    "/decide",
                    post(move || {
                        let hits = hits.clone();
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            StatusCode::INTERNAL_SERVER_ERROR
                        }
                    }),
                )
            };
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, upstream).await.unwrap();
            });

            let client =
                HttpDecisionClient::new(format!("http://{addr}/decide"), Duration::from_secs(1))
                    .unwrap();
            let router = create_router(BootConfigRetriever::new(Arc::new(client)));

            let uri = "/boot.ipxe?mac=aa:bb:cc:dd:ee:ff&arch=arm64&serial=1";
            let (first, _, _) = get(router.clone(), uri).await;
            assert_eq!(first, StatusCode::NOT_FOUND);

            let (second, _, _) = get(router, uri).await;
            assert_eq!(second, StatusCode::NOT_FOUND);
            assert_eq!(hits.load(Ordering::SeqCst), 2);
        }
    }
}
