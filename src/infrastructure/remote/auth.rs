//! Shared Key Lite request signing

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{Method, Url};
use sha2::Sha256;

use crate::domain::{DomainError, StorageAccount, StorageService};

type HmacSha256 = Hmac<Sha256>;

/// Signs storage requests with the account key
#[derive(Clone)]
pub struct SharedKeySigner {
    account_name: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account_name", &self.account_name)
            .finish()
    }
}

impl SharedKeySigner {
    pub fn new(account: &StorageAccount) -> Self {
        Self {
            account_name: account.account_name().to_string(),
            key: account.account_key().to_vec(),
        }
    }

    /// Canonical string covered by the signature
    ///
    /// `headers` must contain the `x-ms-date` header; names are matched
    /// case-insensitively.
    pub fn string_to_sign(
        &self,
        service: StorageService,
        method: &Method,
        url: &Url,
        content_type: &str,
        headers: &[(String, String)],
    ) -> String {
        let resource = self.canonicalized_resource(url);

        match service {
            StorageService::Table => {
                let date = headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("x-ms-date"))
                    .map(|(_, value)| value.as_str())
                    .unwrap_or_default();

                format!("{}\n{}", date, resource)
            }
            StorageService::Blob | StorageService::Queue => {
                let mut canonical_headers: Vec<(String, &str)> = headers
                    .iter()
                    .filter(|(name, _)| name.to_ascii_lowercase().starts_with("x-ms-"))
                    .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
                    .collect();
                canonical_headers.sort();

                let canonical_headers: String = canonical_headers
                    .iter()
                    .map(|(name, value)| format!("{}:{}\n", name, value))
                    .collect();

                format!(
                    "{}\n\n{}\n\n{}{}",
                    method.as_str(),
                    content_type,
                    canonical_headers,
                    resource
                )
            }
        }
    }

    /// Value of the `Authorization` header
    pub fn authorization(
        &self,
        service: StorageService,
        method: &Method,
        url: &Url,
        content_type: &str,
        headers: &[(String, String)],
    ) -> Result<String, DomainError> {
        let string_to_sign = self.string_to_sign(service, method, url, content_type, headers);

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DomainError::internal(format!("Invalid signing key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKeyLite {}:{}", self.account_name, signature))
    }

    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account_name, url.path());

        if let Some((_, comp)) = url.query_pairs().find(|(name, _)| name == "comp") {
            resource.push_str("?comp=");
            resource.push_str(&comp);
        }

        resource
    }
}
