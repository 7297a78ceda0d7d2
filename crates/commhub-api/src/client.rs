use crate::error::{ApiError, ApiResult};
use crate::types::*;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

pub struct HubClient {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HubClient {
    /// Create a client rooted at `base_url` (e.g. `https://app.example.com/api/v1/`)
    pub fn new(base_url: &str, access_token: Option<String>) -> ApiResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        })
    }

    pub(crate) fn endpoint(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ApiError { status, body });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))
    }

    pub(crate) fn inbox_url(&self, view: InboxView, limit: u32) -> ApiResult<Url> {
        let mut url = self.endpoint("inbox")?;
        url.query_pairs_mut()
            .append_pair("status", view.as_query())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    /// List one inbox view. Rows that fail to decode are dropped individually.
    pub async fn list_inbox(&self, view: InboxView, limit: u32) -> ApiResult<Vec<InboxItemDto>> {
        let url = self.inbox_url(view, limit)?;
        debug!("Hub: listing inbox view={} limit={}", view, limit);

        let list: ListResponse<serde_json::Value> = self.get_json(url).await?;
        let items: Vec<InboxItemDto> = list
            .into_items()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<InboxItemDto>(raw) {
                Ok(dto) => Some(dto),
                Err(e) => {
                    warn!("Hub: dropping undecodable inbox row in view {}: {}", view, e);
                    None
                }
            })
            .collect();

        debug!("Hub: got {} items for view {}", items.len(), view);
        Ok(items)
    }

    pub async fn get_thread(&self, thread_id: i64) -> ApiResult<ThreadDetailDto> {
        let url = self.endpoint(&format!("threads/{}", thread_id))?;
        debug!("Hub: fetching thread {}", thread_id);
        self.get_json(url).await
    }

    pub async fn get_email(&self, composite_id: &str) -> ApiResult<EmailDetailDto> {
        let url = self.endpoint(&format!("email/{}", composite_id))?;
        debug!("Hub: fetching email {}", composite_id);
        self.get_json(url).await
    }

    pub async fn send_thread_message(
        &self,
        thread_id: i64,
        message: &OutgoingThreadMessage,
    ) -> ApiResult<()> {
        let url = self.endpoint(&format!("threads/{}/messages", thread_id))?;
        debug!("Hub: posting message to thread {}", thread_id);

        let response = self
            .authorize(self.client.post(url))
            .json(message)
            .send()
            .await?;
        Self::check(response).await?;

        info!("Hub: sent message to thread {}", thread_id);
        Ok(())
    }

    pub async fn send_email(&self, email: &OutgoingEmail) -> ApiResult<()> {
        let url = self.endpoint("emails/send")?;
        debug!("Hub: sending email to {} recipients", email.to.len());

        let response = self
            .authorize(self.client.post(url))
            .json(email)
            .send()
            .await?;
        Self::check(response).await?;

        info!("Hub: email sent, party_id={:?}", email.party_id);
        Ok(())
    }

    pub async fn patch_thread(&self, thread_id: i64, patch: &ThreadFlagsPatch) -> ApiResult<()> {
        let url = self.endpoint(&format!("threads/{}", thread_id))?;
        debug!("Hub: patching thread {} {:?}", thread_id, patch);

        let response = self
            .authorize(self.client.patch(url))
            .json(patch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn bulk_action(&self, request: &BulkRequest) -> ApiResult<BulkResponse> {
        let url = self.endpoint("communications/bulk")?;
        debug!(
            "Hub: bulk {:?} on {} ids",
            request.action,
            request.ids.len()
        );

        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        // Some deployments answer 204 with no body; treat that as full success
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(BulkResponse {
                success: true,
                failed_ids: None,
            });
        }
        serde_json::from_str(&text).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    pub async fn get_counts(&self) -> ApiResult<CountsDto> {
        let url = self.endpoint("communications/counts")?;
        self.get_json(url).await
    }

    pub async fn create_draft(&self, draft: &DraftPayload) -> ApiResult<i64> {
        let url = self.endpoint("drafts")?;
        debug!("Hub: creating draft, channel={}", draft.channel);

        let response = self
            .authorize(self.client.post(url))
            .json(draft)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let created: DraftCreated = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        info!("Hub: created draft, id={}", created.id);
        Ok(created.id)
    }

    pub async fn update_draft(&self, draft_id: i64, draft: &DraftPayload) -> ApiResult<()> {
        let url = self.endpoint(&format!("drafts/{}", draft_id))?;
        debug!("Hub: updating draft {}", draft_id);

        let response = self
            .authorize(self.client.put(url))
            .json(draft)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_draft(&self, draft_id: i64) -> ApiResult<()> {
        let url = self.endpoint(&format!("drafts/{}", draft_id))?;
        debug!("Hub: deleting draft {}", draft_id);

        let response = self.authorize(self.client.delete(url)).send().await?;
        Self::check(response).await?;

        info!("Hub: deleted draft {}", draft_id);
        Ok(())
    }

    pub(crate) fn lookup_url(&self, emails: &[String]) -> ApiResult<Url> {
        let mut url = self.endpoint("parties/lookup-by-email")?;
        url.query_pairs_mut()
            .append_pair("emails", &emails.join(","));
        Ok(url)
    }

    pub async fn lookup_by_email(&self, emails: &[String]) -> ApiResult<LookupResponse> {
        let url = self.lookup_url(emails)?;
        debug!("Hub: looking up {} addresses", emails.len());
        self.get_json(url).await
    }

    pub async fn list_templates(&self) -> ApiResult<Vec<EmailTemplate>> {
        let url = self.endpoint("templates")?;
        let list: ListResponse<EmailTemplate> = self.get_json(url).await?;
        Ok(list.into_items())
    }

    pub async fn list_contacts(&self) -> ApiResult<Vec<ContactSummary>> {
        let url = self.endpoint("contacts")?;
        let list: ListResponse<ContactSummary> = self.get_json(url).await?;
        Ok(list.into_items())
    }

    pub async fn list_tags(&self) -> ApiResult<Vec<TagSummary>> {
        let url = self.endpoint("tags")?;
        let list: ListResponse<TagSummary> = self.get_json(url).await?;
        Ok(list.into_items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_without_trailing_slash() {
        let client = HubClient::new("https://hub.example.com/api/v1", None).unwrap();
        assert_eq!(
            client.endpoint("threads/4").unwrap().as_str(),
            "https://hub.example.com/api/v1/threads/4"
        );
        assert_eq!(
            client.endpoint("/communications/counts").unwrap().as_str(),
            "https://hub.example.com/api/v1/communications/counts"
        );
    }

    #[test]
    fn test_inbox_query() {
        let client = HubClient::new("https://hub.example.com/api/", None).unwrap();
        let url = client.inbox_url(InboxView::Sent, 50).unwrap();
        assert_eq!(url.path(), "/api/inbox");
        assert_eq!(url.query(), Some("status=sent&limit=50"));
    }

    #[test]
    fn test_lookup_query_is_csv() {
        let client = HubClient::new("https://hub.example.com/", None).unwrap();
        let url = client
            .lookup_url(&["a@x.com".to_string(), "b@y.org".to_string()])
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("emails".to_string(), "a@x.com,b@y.org".to_string())]);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HubClient::new("not a url", None),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
