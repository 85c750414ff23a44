use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;

use stockledger_auth::Principal;
use stockledger_core::InventoryId;

use crate::ClientError;

/// Client-facing view of the viewer's manager assignments.
#[async_trait]
pub trait AssignmentQuery: Send + Sync {
    /// Inventories the viewer currently manages.
    async fn my_inventories(&self) -> Result<BTreeSet<InventoryId>, ClientError>;
}

#[derive(Debug, Deserialize)]
struct MyInventoriesResponse {
    inventory_ids: Vec<InventoryId>,
}

/// `GET /assignments/me` against the ledger API.
#[derive(Debug, Clone)]
pub struct HttpAssignmentQuery {
    base_url: String,
    viewer: Principal,
    http: reqwest::Client,
}

impl HttpAssignmentQuery {
    pub fn new(base_url: impl Into<String>, viewer: Principal) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            viewer,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AssignmentQuery for HttpAssignmentQuery {
    async fn my_inventories(&self) -> Result<BTreeSet<InventoryId>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/assignments/me", self.base_url))
            .header("x-user-id", self.viewer.user_id.to_string())
            .header("x-user-role", self.viewer.role.as_str())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(ClientError::Api(status, resp.text().await.unwrap_or_default()));
        }

        let body: MyInventoriesResponse = resp.json().await?;
        Ok(body.inventory_ids.into_iter().collect())
    }
}
