//! Avatar download over HTTP.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rr_call::{AvatarError, AvatarSupplier};
use rr_core::UserId;
use rr_timeline::{Raster, png};

use crate::{USER_AGENT, WebhookError};

const AVATAR_TIMEOUT: Duration = Duration::from_secs(10);
/// Placeholder replaced by the user ID in avatar URL templates.
pub const USER_PLACEHOLDER: &str = "{user}";

/// Fetches PNG avatars from a URL template such as
/// `https://avatars.example/{user}.png`.
#[derive(Clone)]
pub struct HttpAvatarSupplier {
    http: reqwest::Client,
    template: String,
}

impl fmt::Debug for HttpAvatarSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAvatarSupplier")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl HttpAvatarSupplier {
    pub fn new(template: impl Into<String>) -> Result<Self, WebhookError> {
        let template = template.into();
        let http = reqwest::Client::builder()
            .timeout(AVATAR_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(WebhookError::ClientBuild)?;
        Ok(Self { http, template })
    }

    pub fn url_for(&self, user: UserId) -> String {
        self.template
            .replace(USER_PLACEHOLDER, &user.get().to_string())
    }

    async fn download(&self, user: UserId) -> Result<Vec<u8>, String> {
        let response = self
            .http
            .get(self.url_for(user))
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }
        let bytes = response.bytes().await.map_err(|err| err.to_string())?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AvatarSupplier for HttpAvatarSupplier {
    async fn fetch(&self, user: UserId) -> Result<Raster, AvatarError> {
        let bytes = self
            .download(user)
            .await
            .map_err(|reason| AvatarError::Fetch { user, reason })?;
        let avatar = png::decode(&bytes)?;
        tracing::trace!(user = %user, width = avatar.width(), height = avatar.height(), "fetched avatar");
        Ok(avatar)
    }
}
