//! RFC 3161 timestamp authority client.
//!
//! One POST per signature; failures surface to the caller, which decides
//! whether the operation proceeds without a timestamp. No automatic
//! retries.

use crate::domain::crypto::DigestAlgorithm;
use crate::domain::tsp;
use crate::domain::types::TsaOptions;
use crate::infra::error::{SignError, SignResult};
use crate::infra::http::HttpSettings;

const CONTENT_TYPE_QUERY: &str = "application/timestamp-query";
const CONTENT_TYPE_REPLY: &str = "application/timestamp-reply";

pub struct TimestampClient {
    options: TsaOptions,
    client: reqwest::Client,
}

impl TimestampClient {
    pub fn new(options: TsaOptions, http: &HttpSettings) -> SignResult<Self> {
        Ok(Self {
            options,
            client: http.build_client()?,
        })
    }

    /// Request a token over the signer's signature octets and validate the
    /// returned MessageImprint before accepting it.
    pub async fn request_token(
        &self,
        digest: DigestAlgorithm,
        signature_octets: &[u8],
    ) -> SignResult<Vec<u8>> {
        let request = tsp::build_timestamp_request(digest, signature_octets);
        let token = self.exchange(request).await?;
        tsp::verify_token_imprint(&token, signature_octets)?;
        log::info!("timestamp token accepted ({} bytes)", token.len());
        Ok(token)
    }

    /// Request a token over an already-computed digest (document
    /// timestamps imprint the ByteRange digest directly).
    pub async fn request_token_for_digest(
        &self,
        digest: DigestAlgorithm,
        document_digest: &[u8],
    ) -> SignResult<Vec<u8>> {
        let request = tsp::build_timestamp_request_prehashed(digest, document_digest);
        let token = self.exchange(request).await?;
        tsp::verify_token_imprint_prehashed(&token, document_digest)?;
        log::info!("document timestamp token accepted ({} bytes)", token.len());
        Ok(token)
    }

    async fn exchange(&self, request: Vec<u8>) -> SignResult<Vec<u8>> {
        log::info!(
            "requesting timestamp from {} ({} byte TSQ)",
            self.options.url,
            request.len()
        );

        let mut post = self
            .client
            .post(self.options.url.as_str())
            .header("Content-Type", CONTENT_TYPE_QUERY)
            .header("Accept", CONTENT_TYPE_REPLY)
            .body(request);
        if let Some(username) = &self.options.username {
            post = post.basic_auth(username, self.options.password.as_deref());
        }

        let response = post
            .send()
            .await
            .map_err(|e| SignError::TsaFailure(format!("request to {} failed: {e}", self.options.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignError::TsaFailure(format!(
                "{} returned HTTP {status}",
                self.options.url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(CONTENT_TYPE_REPLY) {
            log::warn!("TSA answered with content type {content_type:?}, parsing anyway");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SignError::TsaFailure(format!("reading TSA response failed: {e}")))?;

        tsp::parse_timestamp_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TsaUrl;

    #[test]
    fn client_builds_with_defaults() {
        let options = TsaOptions {
            url: TsaUrl::new("http://tsa.example/tsr").unwrap(),
            username: None,
            password: None,
        };
        assert!(TimestampClient::new(options, &HttpSettings::default()).is_ok());
    }

    #[tokio::test]
    async fn unreachable_tsa_is_a_tsa_failure() {
        let options = TsaOptions {
            // reserved TEST-NET-1 address, nothing listens there
            url: TsaUrl::new("http://192.0.2.1:1/tsr").unwrap(),
            username: None,
            password: None,
        };
        let http = HttpSettings {
            timeout: Some(std::time::Duration::from_millis(200)),
            proxy_url: None,
        };
        let client = TimestampClient::new(options, &http).unwrap();
        let err = client
            .request_token(DigestAlgorithm::Sha256, b"sig")
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::TsaFailure(_)));
    }
}
