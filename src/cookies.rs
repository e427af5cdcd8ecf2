use anyhow::{Context, Result};
use std::collections::BTreeSet;

/// The two domains the session's cookies must stay in sync across. Named
/// generically here (not `twitter.com`/`x.com` literals scattered through
/// the module) so the cross-expansion logic in [`normalize`] reads as one
/// rule instead of two copy-pasted branches.
pub const PLATFORM_DOMAINS: [&str; 2] = ["x.com", "twitter.com"];

pub const REQUIRED_COOKIE_NAMES: [&str; 2] = ["auth_token", "ct0"];

/// A single normalized cookie, already projected to one platform domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NormalizedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl NormalizedCookie {
    fn as_header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Parse a free-form cookie blob in any of the three shapes this crate
/// accepts, de-duplicate, and cross-expand names found on one platform
/// domain to both. Idempotent: `normalize(render(normalize(x))) ==
/// normalize(x)`.
pub fn normalize(raw: &str) -> Result<Vec<NormalizedCookie>> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("cookie input is empty");
    }

    let parsed = if is_netscape_jar(raw) {
        parse_netscape_jar(raw)
    } else if raw.lines().filter(|l| !l.trim().is_empty()).count() > 1 {
        parse_multiline(raw)
    } else {
        parse_header_line(raw)
    }
    .context("failed to parse cookie input")?;

    Ok(expand_and_dedupe(parsed))
}

/// Render a normalized cookie set back to a single `Cookie:` header value,
/// collapsing to one `name=value` pair per distinct name (first domain
/// encountered wins, matching how a browser would coalesce them for a
/// single request).
pub fn render_header(cookies: &[NormalizedCookie]) -> String {
    let mut seen = BTreeSet::new();
    let mut parts = Vec::new();
    for cookie in cookies {
        if seen.insert(cookie.name.clone()) {
            parts.push(cookie.as_header_pair());
        }
    }
    parts.join("; ")
}

/// Names (case-insensitive) missing from `cookies` out of `required`.
pub fn missing_required(cookies: &[NormalizedCookie], required: &[&str]) -> Vec<String> {
    let present: BTreeSet<String> = cookies
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();
    required
        .iter()
        .filter(|name| !present.contains(&name.to_ascii_lowercase()))
        .map(|s| s.to_string())
        .collect()
}

pub fn value_of<'a>(cookies: &'a [NormalizedCookie], name: &str) -> Option<&'a str> {
    cookies
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.value.as_str())
}

pub fn values_of<'a>(cookies: &'a [NormalizedCookie], name: &str) -> Vec<&'a str> {
    cookies
        .iter()
        .filter(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.value.as_str())
        .collect()
}

fn is_netscape_jar(raw: &str) -> bool {
    raw.lines()
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .all(|l| l.split('\t').count() == 7)
        && raw.lines().any(|l| l.split('\t').count() == 7)
}

fn parse_netscape_jar(raw: &str) -> Result<Vec<(String, String, String)>> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let stripped = line.trim_start_matches("#HttpOnly_");
        if stripped.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = stripped.split('\t').collect();
        if fields.len() != 7 {
            continue;
        }
        let domain = fields[0];
        let name = fields[5];
        let value = fields[6];
        out.push((name.to_string(), value.to_string(), domain.to_string()));
    }
    Ok(out)
}

fn parse_multiline(raw: &str) -> Result<Vec<(String, String, String)>> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        out.extend(parse_header_line(line)?.into_iter());
    }
    Ok(out)
}

fn parse_header_line(raw: &str) -> Result<Vec<(String, String, String)>> {
    let mut out = Vec::new();
    for segment in raw.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim();
        // Skip attribute-looking segments that occasionally leak into a
        // pasted header line (Domain=, Path=, etc.) rather than a real
        // cookie name.
        if matches!(
            name.to_ascii_lowercase().as_str(),
            "domain" | "path" | "expires" | "max-age" | "samesite"
        ) {
            continue;
        }
        out.push((name.to_string(), value.trim().to_string(), String::new()));
    }
    if out.is_empty() {
        anyhow::bail!("no name=value cookie pairs found");
    }
    Ok(out)
}

fn expand_and_dedupe(parsed: Vec<(String, String, String)>) -> Vec<NormalizedCookie> {
    let mut out = BTreeSet::new();
    for (name, value, domain) in parsed {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        let belongs_to_platform = domain.is_empty()
            || PLATFORM_DOMAINS
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));

        if belongs_to_platform {
            for platform in PLATFORM_DOMAINS {
                out.insert(NormalizedCookie {
                    name: name.clone(),
                    value: value.clone(),
                    domain: platform.to_string(),
                });
            }
        } else {
            out.insert(NormalizedCookie {
                name,
                value,
                domain,
            });
        }
    }
    out.into_iter().collect()
}
