//! Built-in upstream proxy-list sources and their hourly rotation

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::sources::dedup::fnv1a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    All,
    Http,
    Https,
    Socks4,
    Socks5,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 5] = [
        SourceCategory::All,
        SourceCategory::Http,
        SourceCategory::Https,
        SourceCategory::Socks4,
        SourceCategory::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::All => "all",
            SourceCategory::Http => "http",
            SourceCategory::Https => "https",
            SourceCategory::Socks4 => "socks4",
            SourceCategory::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Some(SourceCategory::All),
            "http" => Some(SourceCategory::Http),
            "https" => Some(SourceCategory::Https),
            "socks4" => Some(SourceCategory::Socks4),
            "socks5" => Some(SourceCategory::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body layout of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One proxy per line
    Lines,
    /// ProxyScrape v4: `{"proxies": [{"proxy": "ip:port"}, ...]}`
    ProxyScrape,
    /// Geonode: `{"data": [{"ip": "...", "port": "..."}, ...]}`
    Geonode,
}

impl SourceFormat {
    /// Extract raw proxy strings from a response body
    pub fn parse(&self, body: &str) -> Result<Vec<String>> {
        match self {
            SourceFormat::Lines => Ok(body
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            SourceFormat::ProxyScrape => {
                let data: Value = serde_json::from_str(body)?;
                Ok(data
                    .get("proxies")
                    .and_then(Value::as_array)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| e.get("proxy").and_then(Value::as_str))
                            .map(|p| p.trim().to_string())
                            .collect()
                    })
                    .unwrap_or_default())
            }
            SourceFormat::Geonode => {
                let data: Value = serde_json::from_str(body)?;
                let Some(entries) = data.get("data").and_then(Value::as_array) else {
                    return Ok(Vec::new());
                };
                Ok(entries
                    .iter()
                    .filter_map(|e| {
                        let ip = e.get("ip").and_then(Value::as_str)?;
                        let port = match e.get("port")? {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            _ => return None,
                        };
                        Some(format!("{}:{}", ip.trim(), port.trim()))
                    })
                    .collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub url: String,
    pub format: SourceFormat,
}

impl SourceSpec {
    pub fn lines(url: &str) -> Self {
        Self {
            url: url.to_string(),
            format: SourceFormat::Lines,
        }
    }

    fn api(url: &str, format: SourceFormat) -> Self {
        Self {
            url: url.to_string(),
            format,
        }
    }
}

/// A source together with its stable position in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSource {
    pub index: usize,
    pub spec: SourceSpec,
}

const PROXYSCRAPE_API: &str = "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=ipport&format=json";
const GEONODE_API: &str =
    "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc";
const PROXYLIST_DOWNLOAD_API: &str = "https://www.proxy-list.download/api/v1/get?type=http";
const PROXYSCAN_API: &str = "https://www.proxyscan.io/download?type=http";

const ALL_LISTS: &[&str] = &[
    "https://raw.githubusercontent.com/mzyui/proxy-list/refs/heads/main/all.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/HTTPS.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS4.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS5.txt",
    "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/all.txt",
    "https://raw.githubusercontent.com/fate0/proxylist/master/proxy.list",
    "https://vakhov.github.io/fresh-proxy-list/proxylist.txt",
    "https://raw.githubusercontent.com/antoinevastel/avastel-bot-ips-lists/master/avastel-proxy-bot-ips-1day.txt",
    "https://raw.githubusercontent.com/antoinevastel/avastel-bot-ips-lists/master/avastel-proxy-bot-ips-blocklist-5days.txt",
    "https://raw.githubusercontent.com/antoinevastel/avastel-bot-ips-lists/master/avastel-proxy-bot-ips-blocklist-8days.txt",
    "https://raw.githubusercontent.com/FifzzSENZE/Master-Proxy/master/proxies/all.txt",
    "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/proxies.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/proxy.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/all.txt",
    "https://raw.githubusercontent.com/prxchk/proxy-list/main/all.txt",
    "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/proxy.txt",
    "https://raw.githubusercontent.com/almroot/proxylist/master/list.txt",
    "https://raw.githubusercontent.com/aslisk/proxyhttps/main/https.txt",
    "https://raw.githubusercontent.com/B4RC0DE-TM/proxy-list/main/HTTP.txt",
    "https://raw.githubusercontent.com/rdavydov/proxy-list/main/proxies/all.txt",
];

const HTTP_LISTS: &[&str] = &[
    "https://raw.githubusercontent.com/mzyui/proxy-list/refs/heads/main/http.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://vakhov.github.io/fresh-proxy-list/http.txt",
    "https://raw.githubusercontent.com/SoliSpirit/proxy-list/main/http.txt",
    "https://raw.githubusercontent.com/FifzzSENZE/Master-Proxy/master/proxies/http.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/http/data.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
    "https://raw.githubusercontent.com/prxchk/proxy-list/main/http.txt",
    "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/http.txt",
    "https://raw.githubusercontent.com/rdavydov/proxy-list/main/proxies/http.txt",
];

const HTTPS_LISTS: &[&str] = &[
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/HTTPS.txt",
    "https://vakhov.github.io/fresh-proxy-list/https.txt",
    "https://raw.githubusercontent.com/SoliSpirit/proxy-list/main/https.txt",
    "https://raw.githubusercontent.com/FifzzSENZE/Master-Proxy/master/proxies/https.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/https/data.txt",
    "https://raw.githubusercontent.com/mzyui/proxy-list/refs/heads/main/https.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
];

const SOCKS4_LISTS: &[&str] = &[
    "https://raw.githubusercontent.com/mzyui/proxy-list/refs/heads/main/socks4.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS4.txt",
    "https://vakhov.github.io/fresh-proxy-list/socks4.txt",
    "https://raw.githubusercontent.com/SoliSpirit/proxy-list/main/socks4.txt",
    "https://raw.githubusercontent.com/FifzzSENZE/Master-Proxy/master/proxies/socks4.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks4/data.txt",
];

const SOCKS5_LISTS: &[&str] = &[
    "https://raw.githubusercontent.com/mzyui/proxy-list/refs/heads/main/socks5.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS5.txt",
    "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
    "https://vakhov.github.io/fresh-proxy-list/socks5.txt",
    "https://raw.githubusercontent.com/SoliSpirit/proxy-list/main/socks5.txt",
    "https://raw.githubusercontent.com/FifzzSENZE/Master-Proxy/master/proxies/socks5.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks5/data.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks5.txt",
    "https://raw.githubusercontent.com/prxchk/proxy-list/main/socks5.txt",
    "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks5.txt",
    "https://raw.githubusercontent.com/rdavydov/proxy-list/main/proxies/socks5.txt",
];

#[derive(Debug, Clone)]
pub struct SourceCatalog {
    lists: HashMap<SourceCategory, Vec<SourceSpec>>,
}

impl SourceCatalog {
    pub fn new(lists: HashMap<SourceCategory, Vec<SourceSpec>>) -> Self {
        Self { lists }
    }

    pub fn builtin() -> Self {
        let lines = |urls: &[&str]| urls.iter().map(|u| SourceSpec::lines(u)).collect::<Vec<_>>();
        let proxyscrape = SourceSpec::api(PROXYSCRAPE_API, SourceFormat::ProxyScrape);
        let geonode = SourceSpec::api(GEONODE_API, SourceFormat::Geonode);
        let proxylist = SourceSpec::api(PROXYLIST_DOWNLOAD_API, SourceFormat::Lines);

        let mut all = lines(ALL_LISTS);
        all.extend([
            proxyscrape.clone(),
            geonode.clone(),
            proxylist.clone(),
            SourceSpec::api(PROXYSCAN_API, SourceFormat::Lines),
        ]);

        let mut http = lines(HTTP_LISTS);
        http.extend([proxyscrape.clone(), geonode.clone(), proxylist]);

        let mut https = lines(HTTPS_LISTS);
        https.extend([proxyscrape, geonode]);

        let mut lists = HashMap::new();
        lists.insert(SourceCategory::All, all);
        lists.insert(SourceCategory::Http, http);
        lists.insert(SourceCategory::Https, https);
        lists.insert(SourceCategory::Socks4, lines(SOCKS4_LISTS));
        lists.insert(SourceCategory::Socks5, lines(SOCKS5_LISTS));

        Self { lists }
    }

    pub fn sources(&self, category: SourceCategory) -> &[SourceSpec] {
        self.lists.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Hour-seeded offset so consecutive runs start from different sources
    pub fn rotation_offset(category: SourceCategory, len: usize, now: DateTime<Utc>) -> usize {
        if len == 0 {
            return 0;
        }
        let hour = now.timestamp().div_euclid(3600);
        let seed = format!("proxy_{}_{}", category.as_str(), hour);
        (fnv1a(seed.as_bytes()) % len as u64) as usize
    }

    /// The category's sources starting at the rotation offset, each with its stable index
    pub fn rotated(&self, category: SourceCategory, now: DateTime<Utc>) -> Vec<IndexedSource> {
        let sources = self.sources(category);
        let offset = Self::rotation_offset(category, sources.len(), now);

        sources
            .iter()
            .enumerate()
            .cycle()
            .skip(offset)
            .take(sources.len())
            .map(|(index, spec)| IndexedSource {
                index,
                spec: spec.clone(),
            })
            .collect()
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
