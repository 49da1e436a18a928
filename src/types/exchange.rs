//! Records of raw API exchanges observed by the driver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One request/response pair (or request/error) reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiExchange {
    pub request: HttpRequestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpRequestRecord {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponseRecord {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}
