//! AbuseIPDB adapter - IP reputation
//!
//! Scores an address from its abuse confidence, with adjustments for Tor
//! exits, whitelisting, report volume, hosting type and reporter count.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lens_core::{EnrichmentData, EnrichmentResult, IndicatorType};
use lens_feeds::{check_status, create_http_client, FetchError, HttpConfig};

use crate::traits::to_data;
use crate::{AdapterError, ProviderAdapter};

const DEFAULT_BASE_URL: &str = "https://api.abuseipdb.com";
const MAX_AGE_DAYS: u32 = 90;

#[derive(Debug, Deserialize)]
struct CheckResponse {
    data: CheckData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckData {
    ip_address: Option<String>,
    abuse_confidence_score: Option<f64>,
    country_code: Option<String>,
    country_name: Option<String>,
    usage_type: Option<String>,
    isp: Option<String>,
    domain: Option<String>,
    is_whitelisted: Option<bool>,
    is_tor: Option<bool>,
    total_reports: Option<u64>,
    num_distinct_users: Option<u64>,
    last_reported_at: Option<String>,
}

/// Normalized AbuseIPDB report stored as result data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpReport {
    pub ip_address: Option<String>,
    pub abuse_confidence_score: Option<f64>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub usage_type: Option<String>,
    pub isp: Option<String>,
    pub domain: Option<String>,
    pub is_whitelisted: Option<bool>,
    pub is_tor: Option<bool>,
    pub total_reports: Option<u64>,
    pub num_distinct_users: Option<u64>,
    pub last_reported_at: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl From<CheckData> for IpReport {
    fn from(d: CheckData) -> Self {
        let message = match d.abuse_confidence_score {
            Some(confidence) => format!(
                "Abuse confidence score {}% with {} total reports",
                confidence,
                d.total_reports.unwrap_or(0)
            ),
            None => "No recent abuse reports for this IP".to_string(),
        };
        Self {
            ip_address: d.ip_address,
            abuse_confidence_score: d.abuse_confidence_score,
            country_code: d.country_code,
            country_name: d.country_name,
            usage_type: d.usage_type,
            isp: d.isp,
            domain: d.domain,
            is_whitelisted: d.is_whitelisted,
            is_tor: d.is_tor,
            total_reports: d.total_reports,
            num_distinct_users: d.num_distinct_users,
            last_reported_at: d.last_reported_at,
            message,
        }
    }
}

/// Risk score for an AbuseIPDB report
pub fn reputation_score(report: &IpReport) -> f64 {
    let mut score = 0.0;

    if let Some(confidence) = report.abuse_confidence_score.filter(|c| *c > 0.0) {
        score += confidence / 100.0 * 8.5;
    }
    if report.is_tor == Some(true) {
        score += 1.5;
    }
    if report.is_whitelisted == Some(true) {
        score = f64::max(0.0, score - 2.0);
    }

    match report.total_reports.unwrap_or(0) {
        n if n > 100 => score += 1.0,
        n if n > 50 => score += 0.5,
        _ => {}
    }

    if report.usage_type.as_deref() == Some("Data Center") {
        score += 0.5;
    }
    if report.num_distinct_users.unwrap_or(0) > 10 {
        score += 0.5;
    }

    score.clamp(0.0, 10.0)
}

/// IP reputation through the AbuseIPDB v2 check endpoint
pub struct AbuseIpDbAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AbuseIpDbAdapter {
    pub fn new(api_key: Option<String>, http: &HttpConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_http_client(http)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn check(&self, ip: &str) -> Result<IpReport, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::MissingApiKey("AbuseIPDB".to_string()))?;

        let url = format!(
            "{}/api/v2/check?ipAddress={}&maxAgeInDays={}&verbose",
            self.base_url,
            urlencoding::encode(ip),
            MAX_AGE_DAYS
        );

        let response = self
            .client
            .get(&url)
            .header("Key", api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(FetchError::from)?;

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(FetchError::from)?;

        parse_check_response(&body)
    }
}

/// Parse a check endpoint body into a report
pub fn parse_check_response(body: &str) -> Result<IpReport, AdapterError> {
    let parsed: CheckResponse =
        serde_json::from_str(body).map_err(|e| AdapterError::Parse(e.to_string()))?;
    Ok(parsed.data.into())
}

#[async_trait]
impl ProviderAdapter for AbuseIpDbAdapter {
    fn enrichment_type(&self) -> &str {
        "ip_reputation"
    }

    fn provider(&self) -> &str {
        "abuseipdb"
    }

    fn is_applicable(&self, indicator_type: IndicatorType) -> bool {
        indicator_type == IndicatorType::Ip
    }

    async fn enrich(&self, value: &str, indicator_type: IndicatorType) -> EnrichmentResult {
        if !self.is_applicable(indicator_type) {
            return self.not_applicable(indicator_type);
        }

        match self.check(value).await {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(data) => {
                    let result = self.succeed(to_data(data));
                    debug!(indicator = %value, score = ?result.score, "AbuseIPDB lookup complete");
                    result
                }
                Err(e) => self.fail_with(&AdapterError::Parse(e.to_string())),
            },
            Err(e) => {
                warn!(indicator = %value, error = %e, "AbuseIPDB lookup failed");
                self.fail_with(&e)
            }
        }
    }

    fn score_of(&self, data: &EnrichmentData) -> Option<f64> {
        let report: IpReport =
            serde_json::from_value(serde_json::Value::Object(data.clone())).ok()?;
        Some(reputation_score(&report))
    }
}
