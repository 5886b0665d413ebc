//! Member (points) API client.

use super::{ApiClient, ClientError};
use async_trait::async_trait;
use ledgerbridge_engine::{ExternalError, Member, MemberDirectory, Points};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct AdjustRequest<'a> {
    delta: Points,
    reason: &'a str,
}

/// [`MemberDirectory`] backed by the member HTTP API.
#[derive(Clone)]
pub struct HttpMemberDirectory {
    api: ApiClient,
}

impl HttpMemberDirectory {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            api: ApiClient::new(base_url, token, timeout)?,
        })
    }
}

#[async_trait]
impl MemberDirectory for HttpMemberDirectory {
    async fn ping(&self) -> Result<(), ExternalError> {
        let url = self.api.url(&["health"])?;
        self.api.send(self.api.get(url)).await?;
        Ok(())
    }

    async fn list_members(&self, family_id: &str) -> Result<Vec<Member>, ExternalError> {
        let url = self.api.url(&["families", family_id, "members"])?;
        self.api.send_json(self.api.get(url)).await
    }

    async fn adjust_points(
        &self,
        member_id: &str,
        delta: Points,
        reason: &str,
    ) -> Result<(), ExternalError> {
        let url = self.api.url(&["members", member_id, "points", "adjust"])?;
        let request = self.api.post(url).json(&AdjustRequest { delta, reason });
        self.api.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::stub;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    async fn directory(router: Router) -> HttpMemberDirectory {
        let base = stub::serve(router).await;
        HttpMemberDirectory::new(&base, Some("member-token"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn lists_members_with_bearer_token() {
        let router = Router::new().route(
            "/families/{family_id}/members",
            get(|Path(family_id): Path<String>, headers: HeaderMap| async move {
                assert_eq!(family_id, "fam-1");
                assert_eq!(headers["authorization"], "Bearer member-token");
                Json(json!([
                    {"id": "kid-1", "displayName": "Ada", "points": 150},
                    {"id": "kid-2", "displayName": "Bo", "points": -5}
                ]))
            }),
        );
        let members = directory(router).await.list_members("fam-1").await.unwrap();

        assert_eq!(
            members,
            vec![Member::new("kid-1", "Ada", 150), Member::new("kid-2", "Bo", -5)]
        );
    }

    #[tokio::test]
    async fn adjust_posts_delta_and_reason() {
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let recorded = seen.clone();
        let router = Router::new().route(
            "/members/{member_id}/points/adjust",
            post(move |Path(member_id): Path<String>, Json(body): Json<Value>| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(json!({"member": member_id, "body": body}));
                    StatusCode::NO_CONTENT
                }
            }),
        );
        directory(router)
            .await
            .adjust_points("kid-1", -20, "Ledger sync: manual entry (-2.00 USD)")
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["member"], "kid-1");
        assert_eq!(seen[0]["body"]["delta"], -20);
        assert_eq!(seen[0]["body"]["reason"], "Ledger sync: manual entry (-2.00 USD)");
    }

    #[tokio::test]
    async fn rejected_adjustment_keeps_status() {
        let router = Router::new().route(
            "/members/{member_id}/points/adjust",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "delta exceeds limit") }),
        );
        let err = directory(router)
            .await
            .adjust_points("kid-1", 5000, "too much")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExternalError::Rejected {
                status: 422,
                message: "delta exceeds limit".into()
            }
        );
    }

    #[tokio::test]
    async fn ping_reports_unavailable_service() {
        let router =
            Router::new().route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let err = directory(router).await.ping().await.unwrap_err();
        assert!(matches!(err, ExternalError::Unavailable(_)));
    }
}
