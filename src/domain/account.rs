//! Storage account credentials and connection string parsing

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::domain::DomainError;

/// Account name of the local storage emulator
pub const DEVELOPMENT_ACCOUNT_NAME: &str = "devstoreaccount1";

/// Published key of the local storage emulator
pub const DEVELOPMENT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

static ACCOUNT_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{3,24}$").unwrap());

static DEVELOPMENT_ACCOUNT: Lazy<StorageAccount> = Lazy::new(|| {
    let endpoint = |port: u16| {
        Url::parse(&format!("http://127.0.0.1:{}/{}", port, DEVELOPMENT_ACCOUNT_NAME)).unwrap()
    };

    StorageAccount {
        account_name: DEVELOPMENT_ACCOUNT_NAME.to_string(),
        account_key: STANDARD.decode(DEVELOPMENT_ACCOUNT_KEY).unwrap(),
        blob_endpoint: endpoint(10000),
        queue_endpoint: endpoint(10001),
        table_endpoint: endpoint(10002),
    }
});

/// Storage service addressed by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageService {
    Blob,
    Queue,
    Table,
}

impl StorageService {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageService::Blob => "blob",
            StorageService::Queue => "queue",
            StorageService::Table => "table",
        }
    }
}

impl fmt::Display for StorageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated credentials and endpoints of a remote storage account
#[derive(Clone, PartialEq, Eq)]
pub struct StorageAccount {
    account_name: String,
    account_key: Vec<u8>,
    blob_endpoint: Url,
    queue_endpoint: Url,
    table_endpoint: Url,
}

impl fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccount")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("blob_endpoint", &self.blob_endpoint.as_str())
            .field("queue_endpoint", &self.queue_endpoint.as_str())
            .field("table_endpoint", &self.table_endpoint.as_str())
            .finish()
    }
}

impl StorageAccount {
    /// Creates an account with the default public endpoints over HTTPS
    pub fn new(
        account_name: impl Into<String>,
        account_key: impl AsRef<str>,
    ) -> Result<Self, DomainError> {
        Self::with_suffix(account_name.into(), account_key.as_ref(), "https", DEFAULT_ENDPOINT_SUFFIX)
    }

    /// The well-known local emulator account
    pub fn development() -> Self {
        DEVELOPMENT_ACCOUNT.clone()
    }

    /// Parses a `Key=Value;Key=Value` connection string
    pub fn parse(connection_string: &str) -> Result<Self, DomainError> {
        ConnectionString::parse(connection_string)?.into_account()
    }

    pub fn with_blob_endpoint(mut self, endpoint: &str) -> Result<Self, DomainError> {
        self.blob_endpoint = parse_endpoint("BlobEndpoint", endpoint)?;
        Ok(self)
    }

    pub fn with_queue_endpoint(mut self, endpoint: &str) -> Result<Self, DomainError> {
        self.queue_endpoint = parse_endpoint("QueueEndpoint", endpoint)?;
        Ok(self)
    }

    pub fn with_table_endpoint(mut self, endpoint: &str) -> Result<Self, DomainError> {
        self.table_endpoint = parse_endpoint("TableEndpoint", endpoint)?;
        Ok(self)
    }

    /// Points all three services at the same base URL
    pub fn with_endpoint(self, endpoint: &str) -> Result<Self, DomainError> {
        self.with_blob_endpoint(endpoint)?
            .with_queue_endpoint(endpoint)?
            .with_table_endpoint(endpoint)
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn account_key(&self) -> &[u8] {
        &self.account_key
    }

    pub fn endpoint(&self, service: StorageService) -> &Url {
        match service {
            StorageService::Blob => &self.blob_endpoint,
            StorageService::Queue => &self.queue_endpoint,
            StorageService::Table => &self.table_endpoint,
        }
    }

    pub fn is_development(&self) -> bool {
        self.account_name == DEVELOPMENT_ACCOUNT_NAME
    }

    fn with_suffix(
        account_name: String,
        account_key: &str,
        protocol: &str,
        suffix: &str,
    ) -> Result<Self, DomainError> {
        if !ACCOUNT_NAME_PATTERN.is_match(&account_name) {
            return Err(DomainError::configuration(format!(
                "Invalid storage account name '{}': expected 3 to 24 lowercase letters or digits",
                account_name
            )));
        }

        let account_key = decode_key(account_key)?;
        let endpoint = |service: StorageService| {
            parse_endpoint(
                service.as_str(),
                &format!("{}://{}.{}.{}", protocol, account_name, service, suffix),
            )
        };

        Ok(Self {
            blob_endpoint: endpoint(StorageService::Blob)?,
            queue_endpoint: endpoint(StorageService::Queue)?,
            table_endpoint: endpoint(StorageService::Table)?,
            account_name,
            account_key,
        })
    }
}

impl FromStr for StorageAccount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decode_key(account_key: &str) -> Result<Vec<u8>, DomainError> {
    let key = account_key.trim();

    if key.is_empty() {
        return Err(DomainError::configuration("Storage account key is empty"));
    }

    STANDARD
        .decode(key)
        .map_err(|e| DomainError::configuration(format!("Storage account key is not valid base64: {}", e)))
}

fn parse_endpoint(name: &str, endpoint: &str) -> Result<Url, DomainError> {
    let url = Url::parse(endpoint).map_err(|e| {
        DomainError::configuration(format!("Invalid {} endpoint '{}': {}", name, endpoint, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DomainError::configuration(format!(
            "Invalid {} endpoint '{}': unsupported scheme '{}'",
            name, endpoint, other
        ))),
    }
}

/// Raw settings extracted from a connection string
#[derive(Default)]
struct ConnectionString {
    use_development_storage: bool,
    protocol: Option<String>,
    account_name: Option<String>,
    account_key: Option<String>,
    endpoint_suffix: Option<String>,
    blob_endpoint: Option<String>,
    queue_endpoint: Option<String>,
    table_endpoint: Option<String>,
}

impl ConnectionString {
    fn parse(input: &str) -> Result<Self, DomainError> {
        let mut parsed = Self::default();
        let mut seen = HashSet::new();

        for segment in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| invalid(format!("segment '{}' is not a Key=Value pair", segment)))?;

            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            if !seen.insert(key.clone()) {
                return Err(invalid(format!("setting '{}' appears more than once", key)));
            }

            match key.as_str() {
                "usedevelopmentstorage" => {
                    parsed.use_development_storage = match value.to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        _ => {
                            return Err(invalid(format!(
                                "UseDevelopmentStorage must be true or false, got '{}'",
                                value
                            )))
                        }
                    }
                }
                "defaultendpointsprotocol" => {
                    let protocol = value.to_ascii_lowercase();
                    if protocol != "http" && protocol != "https" {
                        return Err(invalid(format!(
                            "DefaultEndpointsProtocol must be http or https, got '{}'",
                            value
                        )));
                    }
                    parsed.protocol = Some(protocol);
                }
                "accountname" => parsed.account_name = Some(value),
                "accountkey" => parsed.account_key = Some(value),
                "endpointsuffix" => parsed.endpoint_suffix = Some(value),
                "blobendpoint" => parsed.blob_endpoint = Some(value),
                "queueendpoint" => parsed.queue_endpoint = Some(value),
                "tableendpoint" => parsed.table_endpoint = Some(value),
                _ => return Err(invalid(format!("unknown setting '{}'", key))),
            }
        }

        Ok(parsed)
    }

    fn into_account(self) -> Result<StorageAccount, DomainError> {
        let mut account = if self.use_development_storage {
            if self.account_name.is_some() || self.account_key.is_some() {
                return Err(invalid(
                    "UseDevelopmentStorage cannot be combined with AccountName or AccountKey",
                ));
            }
            StorageAccount::development()
        } else {
            let name = self
                .account_name
                .ok_or_else(|| invalid("AccountName is missing"))?;
            let key = self
                .account_key
                .ok_or_else(|| invalid("AccountKey is missing"))?;
            let protocol = self.protocol.as_deref().unwrap_or("https");
            let suffix = self
                .endpoint_suffix
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);

            StorageAccount::with_suffix(name, &key, protocol, suffix).map_err(wrap)?
        };

        if let Some(endpoint) = &self.blob_endpoint {
            account = account.with_blob_endpoint(endpoint).map_err(wrap)?;
        }
        if let Some(endpoint) = &self.queue_endpoint {
            account = account.with_queue_endpoint(endpoint).map_err(wrap)?;
        }
        if let Some(endpoint) = &self.table_endpoint {
            account = account.with_table_endpoint(endpoint).map_err(wrap)?;
        }

        Ok(account)
    }
}

fn invalid(reason: impl fmt::Display) -> DomainError {
    DomainError::configuration(format!("Invalid storage connection string: {}", reason))
}

fn wrap(error: DomainError) -> DomainError {
    match error {
        DomainError::Configuration { message } => invalid(message),
        other => other,
    }
}
