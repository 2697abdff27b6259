// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hosted lookup against the ipinfo.io API.
//!
//! `GET {base_url}/{addr}?token={token}` returns a JSON document whose `loc`
//! field is `"lat,lon"`. Private and reserved ranges come back as bogons
//! without `loc`, which maps to "no data".

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{LocationProvider, ProviderError};
use crate::location::{Estimate, DEFAULT_ACCURACY_RADIUS};

pub const IPINFO_PROVIDER: &str = "ipinfo";
const IPINFO_CONFIDENCE: f64 = 80.0;
const USER_AGENT: &str = concat!("geo-resolve/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct IpinfoResponse {
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    bogon: bool,
}

pub struct HostedApiProvider {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    weight: f64,
}

impl HostedApiProvider {
    /// Build a client for `base_url` (no trailing slash needed).
    ///
    /// `request_timeout` is a transport-level cap; the pipeline applies its own
    /// per-call budget on top.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        weight: f64,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            weight,
        })
    }
}

#[async_trait]
impl LocationProvider for HostedApiProvider {
    fn name(&self) -> &str {
        IPINFO_PROVIDER
    }

    async fn lookup(&self, address: IpAddr) -> Result<Option<Estimate>, ProviderError> {
        let url = format!("{}/{}", self.base_url, address);
        debug!(%address, url = %url, "Querying ipinfo");

        let response = self
            .http_client
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Http(format!("status {}", status.as_u16())));
        }

        let body: IpinfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let Some(loc) = body.loc else {
            debug!(%address, bogon = body.bogon, "ipinfo has no location");
            return Ok(None);
        };

        let (latitude, longitude) = parse_loc(&loc)?;
        Ok(Some(
            Estimate::new(IPINFO_PROVIDER, latitude, longitude, IPINFO_CONFIDENCE)
                .with_accuracy(DEFAULT_ACCURACY_RADIUS)
                .with_weight(self.weight),
        ))
    }
}

/// Parse ipinfo's `"lat,lon"` string.
pub fn parse_loc(loc: &str) -> Result<(f64, f64), ProviderError> {
    let malformed = || ProviderError::Malformed(format!("bad loc: {:?}", loc));
    let (lat, lon) = loc.split_once(',').ok_or_else(malformed)?;
    let latitude = lat.trim().parse::<f64>().map_err(|_| malformed())?;
    let longitude = lon.trim().parse::<f64>().map_err(|_| malformed())?;
    Ok((latitude, longitude))
}
