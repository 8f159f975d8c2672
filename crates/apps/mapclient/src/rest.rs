use foundation::{CaseId, GeoBounds};
use geodata::{
    decode_json, BackendError, BoxFuture, CaseSummary, GeodataBackend, JurisdictionCollection,
    PoiCollection, PoiRecord, PoiType, TimelineEvent,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

/// Reads against the hosted backend's REST, RPC and edge-function endpoints.
pub struct SupabaseRest {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseRest {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let resp = req
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .send()
            .await
            .map_err(BackendError::transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(BackendError::transport)?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        decode_json(&body)
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<T, BackendError> {
        debug!(rpc = name, "calling rpc");
        let req = self
            .client
            .post(self.url(&format!("rest/v1/rpc/{name}")))
            .json(&args);
        self.send(req).await
    }
}

/// Extracts the human-readable part of an error body.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect())
}

impl GeodataBackend for SupabaseRest {
    fn fetch_jurisdiction_boundaries(
        &self,
        bounds: GeoBounds,
        zoom: f64,
    ) -> BoxFuture<'_, Result<JurisdictionCollection, BackendError>> {
        Box::pin(async move {
            let req = self
                .client
                .get(self.url("functions/v1/jurisdiction-boundaries"))
                .query(&[
                    ("west", bounds.west),
                    ("south", bounds.south),
                    ("east", bounds.east),
                    ("north", bounds.north),
                    ("zoom", zoom),
                ]);
            self.send(req).await
        })
    }

    fn fetch_points_of_interest(
        &self,
        bounds: GeoBounds,
        types: Vec<PoiType>,
    ) -> BoxFuture<'_, Result<PoiCollection, BackendError>> {
        Box::pin(async move {
            let rows: Option<Vec<PoiRecord>> = self
                .rpc(
                    "get_pois_in_bounds",
                    json!({
                        "p_west": bounds.west,
                        "p_south": bounds.south,
                        "p_east": bounds.east,
                        "p_north": bounds.north,
                        "p_types": types,
                    }),
                )
                .await?;
            PoiCollection::from_rows(rows.unwrap_or_default())
        })
    }

    fn search_cases(
        &self,
        text: String,
        limit: u32,
        offset: u32,
    ) -> BoxFuture<'_, Result<Vec<CaseSummary>, BackendError>> {
        Box::pin(async move {
            let rows: Option<Vec<CaseSummary>> = self
                .rpc(
                    "search_cases",
                    json!({
                        "search_query": text,
                        "result_limit": limit,
                        "result_offset": offset,
                    }),
                )
                .await?;
            Ok(rows.unwrap_or_default())
        })
    }

    fn fetch_case_snapshot(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Vec<TimelineEvent>, BackendError>> {
        Box::pin(async move {
            let case_filter = format!("eq.{case_id}");
            let req = self.client.get(self.url("rest/v1/case_timeline")).query(&[
                ("select", "*"),
                ("case_id", case_filter.as_str()),
                ("order", "created_at.desc"),
            ]);
            self.send(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{error_message, SupabaseRest};

    #[test]
    fn joins_paths_without_double_slash() {
        let rest = SupabaseRest::new("https://demo.supabase.co/", "anon");
        assert_eq!(
            rest.url("rest/v1/rpc/search_cases"),
            "https://demo.supabase.co/rest/v1/rpc/search_cases"
        );
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(error_message(r#"{"message":"JWT expired"}"#), "JWT expired");
        assert_eq!(error_message(r#"{"error":"Missing required parameters"}"#), "Missing required parameters");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
